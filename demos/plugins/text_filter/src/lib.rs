//! Text filter plugin - reshapes viewer lines before they are rendered.
//!
//! Usage: `filter <mode> <line>...` where mode is one of `upper`, `lower`,
//! `number` or `squeeze` (drop repeated blank lines).

use std::sync::atomic::{AtomicU64, Ordering};

use pagewire::plugins::abi::PluginFlags;
use pagewire::{declare_plugin, on_plugin_load, on_plugin_unload};

static CALLS: AtomicU64 = AtomicU64::new(0);

fn filter(args: Vec<String>) -> Result<Vec<String>, String> {
    CALLS.fetch_add(1, Ordering::Relaxed);

    let mut args = args.into_iter();
    let mode = args.next().ok_or("missing mode")?;
    let lines: Vec<String> = args.collect();

    match mode.as_str() {
        "upper" => Ok(lines.iter().map(|line| line.to_uppercase()).collect()),
        "lower" => Ok(lines.iter().map(|line| line.to_lowercase()).collect()),
        "number" => {
            let width = lines.len().to_string().len();
            Ok(lines
                .iter()
                .enumerate()
                .map(|(i, line)| format!("{:>width$} | {line}", i + 1))
                .collect())
        }
        "squeeze" => {
            let mut out: Vec<String> = Vec::with_capacity(lines.len());
            for line in lines {
                let blank = line.trim().is_empty();
                if blank && out.last().is_some_and(|prev| prev.trim().is_empty()) {
                    continue;
                }
                out.push(line);
            }
            Ok(out)
        }
        other => Err(format!("unknown mode `{other}`")),
    }
}

declare_plugin! {
    name: "Text Filter",
    command: "filter",
    args: ["mode", "lines?"],
    flags: PluginFlags::empty(),
    run: filter,
}

on_plugin_load!(|| {
    CALLS.store(0, Ordering::Relaxed);
    Ok(())
});

on_plugin_unload!(|| {
    CALLS.store(0, Ordering::Relaxed);
    Ok(())
});
