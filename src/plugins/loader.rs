//! Native plugin loading using libloading.

use std::ffi::c_char;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::debug;

use super::abi::{
    symbols, ArgsFn, FlagsFn, FreeFn, HookFn, PluginAbi, PluginFlags, RawBuffer, RunFn, StringFn,
};
use super::error::LoadError;

/// Raw entry points of a plugin.
///
/// Resolved from a [`NativeLibrary`], or filled in directly for a plugin
/// linked into the host binary (see [`declare_plugin!`](crate::declare_plugin)).
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub name: StringFn,
    pub version: StringFn,
    pub command: StringFn,
    pub args: ArgsFn,
    pub run: RunFn,
    pub free: Option<FreeFn>,
    pub flags: Option<FlagsFn>,
    pub on_load: Option<HookFn>,
    pub on_unload: Option<HookFn>,
}

/// A plugin living in a shared library (`.so`, `.dylib`, `.dll`).
///
/// The resolved function pointers are only valid while `library` is open;
/// both live and die together in this struct.
pub struct NativeLibrary {
    path: PathBuf,
    entry: EntryPoints,
    _library: Library,
}

impl NativeLibrary {
    /// Open a library and resolve its entry points.
    ///
    /// Nothing inside the plugin is called here besides the platform loader's
    /// own initializers.
    ///
    /// # Errors
    /// [`LoadError::OpenFailed`] when the OS loader rejects the file,
    /// [`LoadError::SymbolMissing`] when a required entry point is absent.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        debug!("Opening plugin library {}", path.display());

        // SAFETY: opening a library runs its initializers. Plugins are trusted
        // at build time and run with full host privileges.
        let library = unsafe { Library::new(path) }.map_err(|err| LoadError::OpenFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        // SAFETY: every type alias matches the signature the ABI documents
        // for the symbol it is resolved from.
        let entry = unsafe {
            EntryPoints {
                name: required(&library, symbols::NAME)?,
                version: required(&library, symbols::VERSION)?,
                command: required(&library, symbols::COMMAND)?,
                args: required(&library, symbols::ARGS)?,
                run: required(&library, symbols::RUN)?,
                free: optional(&library, symbols::FREE),
                flags: optional(&library, symbols::FLAGS),
                on_load: optional(&library, symbols::ON_LOAD),
                on_unload: optional(&library, symbols::ON_UNLOAD),
            }
        };

        if entry.free.is_none() {
            debug!(
                "{} exports no `{}`, its buffers are treated as static",
                path.display(),
                symbols::display(symbols::FREE)
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            entry,
            _library: library,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

unsafe fn required<T: Copy>(library: &Library, symbol: &[u8]) -> Result<T, LoadError> {
    library
        .get::<T>(symbol)
        .map(|resolved| *resolved)
        .map_err(|_| LoadError::SymbolMissing(symbols::display(symbol)))
}

unsafe fn optional<T: Copy>(library: &Library, symbol: &[u8]) -> Option<T> {
    library.get::<T>(symbol).ok().map(|resolved| *resolved)
}

// SAFETY (all calls below): the pointers implement the documented signatures
// and, for a library, stay valid while the owning `NativeLibrary` is alive.
impl PluginAbi for EntryPoints {
    fn name(&self) -> *const c_char {
        unsafe { (self.name)() }
    }

    fn version(&self) -> *const c_char {
        unsafe { (self.version)() }
    }

    fn command(&self) -> *const c_char {
        unsafe { (self.command)() }
    }

    fn args(&self) -> RawBuffer {
        unsafe { (self.args)() }
    }

    fn flags(&self) -> PluginFlags {
        self.flags.map_or_else(PluginFlags::empty, |flags| {
            PluginFlags::from_bits_truncate(unsafe { flags() })
        })
    }

    unsafe fn run(&self, input: RawBuffer) -> RawBuffer {
        (self.run)(input)
    }

    fn exposes_free(&self) -> bool {
        self.free.is_some()
    }

    unsafe fn free(&self, buffer: RawBuffer) {
        if let Some(free) = self.free {
            free(buffer);
        }
    }

    fn on_load(&self) -> Option<i32> {
        self.on_load.map(|hook| unsafe { hook() })
    }

    fn on_unload(&self) -> Option<i32> {
        self.on_unload.map(|hook| unsafe { hook() })
    }

    fn origin(&self) -> String {
        "in-process plugin".to_string()
    }
}

impl PluginAbi for NativeLibrary {
    fn name(&self) -> *const c_char {
        self.entry.name()
    }

    fn version(&self) -> *const c_char {
        self.entry.version()
    }

    fn command(&self) -> *const c_char {
        self.entry.command()
    }

    fn args(&self) -> RawBuffer {
        self.entry.args()
    }

    fn flags(&self) -> PluginFlags {
        self.entry.flags()
    }

    unsafe fn run(&self, input: RawBuffer) -> RawBuffer {
        self.entry.run(input)
    }

    fn exposes_free(&self) -> bool {
        self.entry.exposes_free()
    }

    unsafe fn free(&self, buffer: RawBuffer) {
        self.entry.free(buffer);
    }

    fn on_load(&self) -> Option<i32> {
        self.entry.on_load()
    }

    fn on_unload(&self) -> Option<i32> {
        self.entry.on_unload()
    }

    fn origin(&self) -> String {
        self.path.display().to_string()
    }
}
