use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use pagewire::{HostConfig, PluginManager};

/// Pagewire - load viewer plugins and run the commands they provide
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Plugin library to load (repeatable)
    #[arg(short, long = "plugin", value_name = "PATH")]
    plugins: Vec<PathBuf>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List the commands provided by the loaded plugins
    List,
    /// Run a plugin command and print its output lines
    Run {
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = &args.config {
        HostConfig::load_from_file(config_path)?
    } else {
        HostConfig::load_default()?
    };

    let log_level = if args.debug || config.logging.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // Logs go to stderr so plugin output on stdout stays clean
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    let manager = PluginManager::from_config(&config);
    for path in &args.plugins {
        manager
            .load_plugin(path)
            .with_context(|| format!("Failed to load plugin {}", path.display()))?;
    }

    match args.action {
        Action::List => {
            for info in manager.list_commands() {
                println!("{:<16} {:<24} {}", info.command, info.plugin_name, info.usage);
            }
        }
        Action::Run { command, args } => {
            let lines = manager.run_command(&command, &args)?;
            for line in lines {
                println!("{line}");
            }
        }
    }

    manager.unload_all();
    Ok(())
}
