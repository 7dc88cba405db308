//! Native plugin system.
//!
//! Plugins are shared libraries implementing the C ABI in [`abi`]. The
//! [`PluginManager`] loads them, negotiates their ABI version, tracks their
//! lifecycle, and dispatches commands to them, marshaling argument and result
//! lists through the [`codec`] wire format with explicit buffer ownership
//! ([`buffer`]).
//!
//! Plugins run in-process with full host privileges. A crash inside plugin
//! code takes the host down with it, and a plugin that never returns from
//! `run` stalls the calling thread (the optional dispatch watchdog only stops
//! waiting, it cannot interrupt native code).

pub mod abi;
pub mod buffer;
pub mod codec;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod loader;
pub mod manager;
pub mod sdk;
pub mod version;

pub use abi::{PluginAbi, PluginFlags, RawBuffer};
pub use buffer::BufferStats;
pub use descriptor::PluginDescriptor;
pub use dispatch::DispatchOptions;
pub use error::{DecodeError, DispatchError, LoadError};
pub use handle::{HandleState, PluginId};
pub use loader::{EntryPoints, NativeLibrary};
pub use manager::{CommandInfo, PluginManager};
pub use version::{AbiVersion, HOST_ABI_VERSION};
