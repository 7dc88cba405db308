use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, trace, warn};

use super::abi::PluginAbi;
use super::buffer::BufferStats;
use super::descriptor::PluginDescriptor;
use super::dispatch::{self, DispatchOptions};
use super::error::{DispatchError, LoadError};
use super::handle::{HandleState, PluginHandle, PluginId};
use super::loader::NativeLibrary;
use super::version::{AbiVersion, HOST_ABI_VERSION};
use crate::config::HostConfig;

/// A registered command, as shown to the CLI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub command: String,
    pub plugin_name: String,
    pub plugin_id: PluginId,
    pub usage: String,
}

#[derive(Default)]
struct Registry {
    handles: BTreeMap<PluginId, Arc<PluginHandle>>,
    /// Command name -> owning plugin. Rebuilt on every insert and removal.
    commands: HashMap<String, PluginId>,
}

impl Registry {
    fn reindex(&mut self) {
        self.commands = self
            .handles
            .iter()
            .map(|(id, handle)| (handle.descriptor().command.clone(), *id))
            .collect();
    }

    fn owner_of(&self, command: &str) -> Option<&Arc<PluginHandle>> {
        self.commands
            .get(command)
            .and_then(|id| self.handles.get(id))
    }
}

/// Plugin manager for loading, dispatching to and unloading plugins.
///
/// The manager is the only component that adds or removes handles. It is
/// `Sync`: commands of different plugins may run concurrently from several
/// threads, while calls into the same plugin are serialized by its handle.
/// Dropping the manager unloads every plugin.
pub struct PluginManager {
    host_version: AbiVersion,
    options: DispatchOptions,
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl PluginManager {
    /// Create a manager with an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(DispatchOptions::default())
    }

    #[must_use]
    pub fn with_options(options: DispatchOptions) -> Self {
        Self {
            host_version: HOST_ABI_VERSION,
            options,
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &HostConfig) -> Self {
        Self::with_options(DispatchOptions::from(config))
    }

    /// Override the ABI version plugins are negotiated against.
    #[must_use]
    pub fn with_host_version(mut self, version: AbiVersion) -> Self {
        self.host_version = version;
        self
    }

    #[must_use]
    pub fn host_version(&self) -> AbiVersion {
        self.host_version
    }

    /// Load a plugin from a dynamic library.
    ///
    /// Blocks while the OS loader and the plugin's `on_plugin_load` run.
    ///
    /// # Errors
    /// Any [`LoadError`]; no handle is registered when loading fails.
    pub fn load_plugin<P: AsRef<Path>>(&self, path: P) -> Result<PluginId, LoadError> {
        let library = NativeLibrary::open(path.as_ref())?;
        self.load_abi(Box::new(library))
    }

    /// Load a plugin from any [`PluginAbi`] implementation, e.g. one linked
    /// into the host binary.
    ///
    /// # Errors
    /// Any [`LoadError`]; no handle is registered when loading fails.
    pub fn load_abi(&self, abi: Box<dyn PluginAbi>) -> Result<PluginId, LoadError> {
        let id = PluginId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = PluginHandle::open(id, abi, &self.host_version)?;

        // Reject conflicts before on_load runs; checked again on insert
        // because the registry lock is not held across the hook.
        self.check_conflict(&self.read(), &handle)?;
        handle.start()?;

        let handle = Arc::new(handle);
        let mut registry = self.write();
        if let Err(err) = self.check_conflict(&registry, &handle) {
            drop(registry);
            handle.unload();
            return Err(err);
        }
        registry.handles.insert(id, handle);
        registry.reindex();
        Ok(id)
    }

    /// Unload a plugin. Returns `false` when `id` is not registered.
    ///
    /// Waits for an in-flight command on that plugin to finish first.
    pub fn unload_plugin(&self, id: PluginId) -> bool {
        let removed = {
            let mut registry = self.write();
            let removed = registry.handles.remove(&id);
            registry.reindex();
            removed
        };

        match removed {
            Some(handle) => {
                handle.unload();
                info!("Unloaded plugin {}", handle.descriptor().name);
                true
            }
            None => {
                debug!("Unload of unknown plugin {} ignored", id);
                false
            }
        }
    }

    /// Unload every plugin, most recently loaded first.
    pub fn unload_all(&self) {
        let drained: Vec<_> = {
            let mut registry = self.write();
            let handles = std::mem::take(&mut registry.handles);
            registry.reindex();
            handles.into_values().rev().collect()
        };
        if !drained.is_empty() {
            trace!("Unloading {} plugin(s)", drained.len());
        }
        for handle in drained {
            handle.unload();
        }
    }

    /// Registered commands, sorted by name.
    #[must_use]
    pub fn list_commands(&self) -> Vec<CommandInfo> {
        let registry = self.read();
        let mut commands: Vec<_> = registry
            .handles
            .values()
            .map(|handle| {
                let descriptor = handle.descriptor();
                CommandInfo {
                    command: descriptor.command.clone(),
                    plugin_name: descriptor.name.clone(),
                    plugin_id: handle.id(),
                    usage: descriptor.usage(),
                }
            })
            .collect();
        commands.sort_by(|a, b| a.command.cmp(&b.command));
        commands
    }

    /// Run a registered command.
    ///
    /// # Errors
    /// [`DispatchError::UnknownCommand`] when no plugin registered `command`,
    /// otherwise whatever the dispatch reports.
    pub fn run_command(&self, command: &str, args: &[String]) -> Result<Vec<String>, DispatchError> {
        let handle = self
            .read()
            .owner_of(command)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownCommand(command.to_string()))?;

        dispatch::dispatch(&handle, args, &self.options).inspect_err(|err| {
            warn!("Command `{}` failed: {}", command, err);
        })
    }

    #[must_use]
    pub fn descriptor(&self, id: PluginId) -> Option<PluginDescriptor> {
        self.handle(id).map(|handle| handle.descriptor().clone())
    }

    #[must_use]
    pub fn state(&self, id: PluginId) -> Option<HandleState> {
        self.handle(id).map(|handle| handle.state())
    }

    #[must_use]
    pub fn buffer_stats(&self, id: PluginId) -> Option<BufferStats> {
        self.handle(id).map(|handle| handle.buffer_stats())
    }

    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.read().handles.len()
    }

    fn handle(&self, id: PluginId) -> Option<Arc<PluginHandle>> {
        self.read().handles.get(&id).cloned()
    }

    fn check_conflict(&self, registry: &Registry, handle: &PluginHandle) -> Result<(), LoadError> {
        let command = &handle.descriptor().command;
        match registry.owner_of(command) {
            Some(existing) => Err(LoadError::CommandConflict {
                command: command.clone(),
                existing: existing.descriptor().name.clone(),
            }),
            None => Ok(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.unload_all();
    }
}
