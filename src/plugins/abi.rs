//! The fixed C ABI shared by the host and every plugin library.
//!
//! A plugin is a `cdylib` exporting the symbols listed below. Strings and
//! lists travel as [`RawBuffer`]s so neither side depends on the other's
//! in-memory representation of `String` or `Vec`.
//!
//! ```c
//! typedef struct { uint8_t *data; uintptr_t len; } RawBuffer;
//!
//! const char *pagewire_plugin_name(void);
//! const char *pagewire_plugin_version(void);
//! const char *pagewire_plugin_command(void);
//! RawBuffer   pagewire_plugin_args(void);
//! RawBuffer   pagewire_plugin_run(RawBuffer arguments);
//!
//! // optional
//! void     pagewire_plugin_free(RawBuffer buffer);
//! uint32_t pagewire_plugin_flags(void);
//! int32_t  on_plugin_load(void);
//! int32_t  on_plugin_unload(void);
//! ```

use std::ffi::c_char;

/// Symbol names, NUL-terminated for `libloading`.
pub mod symbols {
    pub const NAME: &[u8] = b"pagewire_plugin_name\0";
    pub const VERSION: &[u8] = b"pagewire_plugin_version\0";
    pub const COMMAND: &[u8] = b"pagewire_plugin_command\0";
    pub const ARGS: &[u8] = b"pagewire_plugin_args\0";
    pub const RUN: &[u8] = b"pagewire_plugin_run\0";
    pub const FREE: &[u8] = b"pagewire_plugin_free\0";
    pub const FLAGS: &[u8] = b"pagewire_plugin_flags\0";
    pub const ON_LOAD: &[u8] = b"on_plugin_load\0";
    pub const ON_UNLOAD: &[u8] = b"on_plugin_unload\0";

    /// Printable form of a symbol constant, for error messages.
    #[must_use]
    pub fn display(symbol: &[u8]) -> String {
        String::from_utf8_lossy(symbol.strip_suffix(b"\0").unwrap_or(symbol)).into_owned()
    }
}

pub type StringFn = unsafe extern "C" fn() -> *const c_char;
pub type ArgsFn = unsafe extern "C" fn() -> RawBuffer;
pub type RunFn = unsafe extern "C" fn(RawBuffer) -> RawBuffer;
pub type FreeFn = unsafe extern "C" fn(RawBuffer);
pub type FlagsFn = unsafe extern "C" fn() -> u32;
pub type HookFn = unsafe extern "C" fn() -> i32;

/// Status a lifecycle hook returns on success.
pub const HOOK_OK: i32 = 0;

/// Status the SDK macros return when a hook body fails or panics.
pub const HOOK_FAILED: i32 = 1;

bitflags::bitflags! {
    /// Capabilities a plugin declares through `pagewire_plugin_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PluginFlags: u32 {
        /// The argument count must match the declared argument names.
        const STRICT_ARITY = 1;
    }
}

/// A pointer + length pair crossing the boundary.
///
/// `len == 0` allows a null `data`. Otherwise `data` points at exactly `len`
/// readable bytes. The type is deliberately neither `Clone` nor `Copy`: a
/// `RawBuffer` moving by value is an ownership transfer.
#[repr(C)]
#[derive(Debug)]
pub struct RawBuffer {
    pub data: *mut u8,
    pub len: usize,
}

impl RawBuffer {
    /// The null buffer, used by `run` as its failure sentinel.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }

    /// Hand a heap allocation to the other side of the boundary.
    ///
    /// The result must come back through [`RawBuffer::free_boxed`] in the
    /// same binary that produced it.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let boxed = bytes.into_boxed_slice();
        let len = boxed.len();
        let data = Box::into_raw(boxed).cast::<u8>();
        Self { data, len }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// View the referenced bytes.
    ///
    /// # Safety
    /// `data` must point at `len` readable bytes that stay alive and unchanged
    /// for `'a`.
    #[must_use]
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.data.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.data, self.len)
        }
    }

    /// Release a buffer created by [`RawBuffer::from_vec`].
    ///
    /// # Safety
    /// The buffer must come from `from_vec` in this same binary and must not
    /// have been released already.
    pub unsafe fn free_boxed(self) {
        if self.data.is_null() {
            return;
        }
        let slice = std::ptr::slice_from_raw_parts_mut(self.data, self.len);
        drop(Box::from_raw(slice));
    }
}

/// The raw entry points of one plugin, as seen by the host.
///
/// [`NativeLibrary`](super::loader::NativeLibrary) implements this over a
/// shared library; in-process plugins and test doubles implement it directly.
/// Methods mirror the exported symbols one to one and perform no marshaling:
/// decoding and ownership bookkeeping happen in the host.
pub trait PluginAbi: Send {
    fn name(&self) -> *const c_char;

    fn version(&self) -> *const c_char;

    fn command(&self) -> *const c_char;

    /// Expected argument names as an `EncodedList`, ownership moves to the host.
    fn args(&self) -> RawBuffer;

    fn flags(&self) -> PluginFlags {
        PluginFlags::empty()
    }

    /// Run the command.
    ///
    /// # Safety
    /// `input` must reference `input.len` readable bytes for the duration of
    /// the call. The plugin borrows it and must not free or retain it.
    unsafe fn run(&self, input: RawBuffer) -> RawBuffer;

    /// Whether the plugin exports a free function.
    fn exposes_free(&self) -> bool;

    /// Return a buffer to the plugin's allocator.
    ///
    /// # Safety
    /// `buffer` must have been produced by this plugin and not freed before.
    unsafe fn free(&self, buffer: RawBuffer);

    /// `None` when the plugin does not export the hook.
    fn on_load(&self) -> Option<i32> {
        None
    }

    /// `None` when the plugin does not export the hook.
    fn on_unload(&self) -> Option<i32> {
        None
    }

    /// Where the plugin came from, for log lines.
    fn origin(&self) -> String;
}
