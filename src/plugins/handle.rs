//! One loaded plugin and its lifecycle.
//!
//! ```text
//!   open() ──► Unloaded ──start()──► Loaded ──first run──► Active
//!                 │                    │                     │
//!                 └──on_load fails──►  Failed ◄──ABI violation┘
//!   unload(): Loaded | Active | Failed(after start) ──on_unload──► Unloaded
//! ```
//!
//! Every native call into the plugin (hooks and `run`) happens while holding
//! the handle's mutex, so a plugin never sees two calls at once.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::abi::{symbols, PluginAbi, HOOK_OK};
use super::buffer::{BorrowedArgs, BufferLedger, BufferStats};
use super::codec;
use super::descriptor::PluginDescriptor;
use super::error::{DispatchError, LoadError};
use super::version::AbiVersion;

/// Identifier handed out by the manager for each successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(pub(crate) u64);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Unloaded,
    Loaded,
    Active,
    Failed,
}

struct HandleInner {
    /// `None` once the library has been released.
    abi: Option<Box<dyn PluginAbi>>,
    state: HandleState,
    /// Set once `on_load` completed; `on_unload` only runs when this is set.
    started: bool,
    ledger: BufferLedger,
}

/// A plugin library owned by the host.
pub struct PluginHandle {
    id: PluginId,
    descriptor: PluginDescriptor,
    inner: Mutex<HandleInner>,
}

impl PluginHandle {
    /// Read the descriptor of a freshly opened plugin. No hook runs yet.
    ///
    /// On error the plugin is released before returning.
    pub(crate) fn open(
        id: PluginId,
        abi: Box<dyn PluginAbi>,
        host: &AbiVersion,
    ) -> Result<Self, LoadError> {
        let mut ledger = BufferLedger::default();
        let descriptor = match PluginDescriptor::read(abi.as_ref(), &mut ledger, host) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!("Rejected plugin {}: {}", abi.origin(), err);
                return Err(err);
            }
        };

        debug!(
            "Plugin {} from {}: {} v{} registers `{}`",
            id,
            abi.origin(),
            descriptor.name,
            descriptor.version,
            descriptor.command
        );

        Ok(Self {
            id,
            descriptor,
            inner: Mutex::new(HandleInner {
                abi: Some(abi),
                state: HandleState::Unloaded,
                started: false,
                ledger,
            }),
        })
    }

    /// Run `on_load` and move to `Loaded`.
    ///
    /// A failing hook moves the handle to `Failed` and releases the library
    /// without calling `on_unload`.
    pub(crate) fn start(&self) -> Result<(), LoadError> {
        let mut inner = self.lock();
        let Some(abi) = inner.abi.as_deref() else {
            return Err(self.init_failed("plugin library already released"));
        };

        match abi.on_load() {
            None | Some(HOOK_OK) => {
                inner.started = true;
                inner.state = HandleState::Loaded;
                info!(
                    "Loaded plugin {} v{} providing `{}`",
                    self.descriptor.name, self.descriptor.version, self.descriptor.command
                );
                Ok(())
            }
            Some(status) => {
                inner.state = HandleState::Failed;
                inner.abi = None;
                Err(self.init_failed(&format!(
                    "`{}` returned status {status}",
                    symbols::display(symbols::ON_LOAD)
                )))
            }
        }
    }

    /// Run `on_unload` if `on_load` completed, then release the library.
    ///
    /// Hook failures are logged, never propagated. Calling this on a handle
    /// that holds no library is a no-op.
    pub(crate) fn unload(&self) {
        let mut inner = self.lock();
        let Some(abi) = inner.abi.take() else {
            return;
        };

        if inner.started {
            match abi.on_unload() {
                None | Some(HOOK_OK) => {}
                Some(status) => warn!(
                    "Plugin {} `{}` returned status {}, unloading anyway",
                    self.descriptor.name,
                    symbols::display(symbols::ON_UNLOAD),
                    status
                ),
            }
        }

        let stats = inner.ledger.stats();
        if stats.outstanding() != 0 {
            warn!(
                "Plugin {} unloaded with {} unreleased buffer(s)",
                self.descriptor.name,
                stats.outstanding()
            );
        }

        drop(abi);
        inner.state = HandleState::Unloaded;
        debug!("Unloaded plugin {} ({})", self.descriptor.name, self.id);
    }

    /// Invoke the plugin's `run` entry point.
    ///
    /// Blocks while another call into this plugin is in flight.
    pub(crate) fn run(&self, args: &[String], max_len: usize) -> Result<Vec<String>, DispatchError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        match inner.state {
            HandleState::Loaded | HandleState::Active => {}
            HandleState::Failed => {
                return Err(DispatchError::PluginError(format!(
                    "plugin {} is disabled after an earlier failure",
                    self.descriptor.name
                )))
            }
            HandleState::Unloaded => {
                return Err(DispatchError::PluginError(format!(
                    "plugin {} is not loaded",
                    self.descriptor.name
                )))
            }
        }
        let Some(abi) = inner.abi.as_deref() else {
            return Err(DispatchError::PluginError(format!(
                "plugin {} is not loaded",
                self.descriptor.name
            )));
        };

        let input = BorrowedArgs::encode(args);
        // SAFETY: `input` outlives the call and is never touched by the plugin
        // afterwards; we keep ownership of it.
        let raw = unsafe { abi.run(input.lend()) };

        let buffer = match inner.ledger.adopt(abi, raw, Some(&input)) {
            Ok(Some(buffer)) => buffer,
            Ok(None) => {
                return Err(DispatchError::PluginError(format!(
                    "`{}` returned no result",
                    self.descriptor.command
                )))
            }
            Err(violation) => {
                warn!(
                    "Disabling plugin {}: {}",
                    self.descriptor.name, violation
                );
                inner.state = HandleState::Failed;
                return Err(DispatchError::PluginError(violation.to_string()));
            }
        };

        if buffer.len() > max_len {
            return Err(DispatchError::PluginError(format!(
                "result of {} bytes exceeds the {} byte limit",
                buffer.len(),
                max_len
            )));
        }
        let items = buffer.decode()?;
        drop(buffer);
        drop(input);

        let lines = codec::into_result(items).map_err(DispatchError::PluginError)?;
        if inner.state == HandleState::Loaded {
            inner.state = HandleState::Active;
        }
        Ok(lines)
    }

    #[must_use]
    pub fn id(&self) -> PluginId {
        self.id
    }

    #[must_use]
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Current state. Waits for an in-flight call to finish.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.lock().state
    }

    #[must_use]
    pub fn buffer_stats(&self) -> BufferStats {
        self.lock().ledger.stats()
    }

    fn lock(&self) -> MutexGuard<'_, HandleInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_failed(&self, reason: &str) -> LoadError {
        LoadError::InitFailed {
            name: self.descriptor.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        self.unload();
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
