//! Pagewire - native plugin host for a command-line text viewer
//!
//! Plugins are independently compiled shared libraries that contribute
//! commands (preprocessing, formatting, filtering) to the viewer. This crate
//! is the host side of that boundary, plus the macros plugin authors use to
//! implement it.
//!
//! # Modules
//!
//! - [`plugins`]: ABI, buffer ownership, loading, version negotiation and
//!   command dispatch
//! - [`config`]: Host configuration and serialization

pub mod config;
pub mod plugins;

pub use config::HostConfig;
pub use plugins::{DispatchError, LoadError, PluginId, PluginManager};
