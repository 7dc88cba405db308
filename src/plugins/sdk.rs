//! Plugin-author side of the ABI.
//!
//! A plugin crate is a `cdylib` depending on this crate and invoking the
//! macros below once:
//!
//! ```rust,ignore
//! use pagewire::{declare_plugin, on_plugin_load};
//!
//! fn greet(args: Vec<String>) -> Result<Vec<String>, String> {
//!     Ok(args.iter().map(|who| format!("hello, {who}")).collect())
//! }
//!
//! declare_plugin! {
//!     name: "Greeter",
//!     command: "greet",
//!     args: ["name"],
//!     run: greet,
//! }
//!
//! on_plugin_load!(|| Ok(()));
//! ```
//!
//! Panics inside a body are caught on the plugin side and reported through
//! the ABI, so unwinding never crosses into the host.

use std::panic::{self, AssertUnwindSafe};

use super::abi::{RawBuffer, HOOK_FAILED, HOOK_OK};
use super::codec;

/// Body of a generated `pagewire_plugin_run`.
///
/// Reads the borrowed `input` without taking ownership and returns a fresh
/// allocation for the host to hand back through `pagewire_plugin_free`.
pub fn run_entry<F>(input: &RawBuffer, body: F) -> RawBuffer
where
    F: FnOnce(Vec<String>) -> Result<Vec<String>, String>,
{
    // SAFETY: the host guarantees `input` is readable for this call.
    let bytes = unsafe { input.as_slice() };
    let args = match codec::decode(bytes) {
        Ok(args) => args,
        Err(err) => return RawBuffer::from_vec(codec::error_frame(&format!("bad arguments: {err}"))),
    };

    let encoded = match panic::catch_unwind(AssertUnwindSafe(|| body(args))) {
        Ok(Ok(lines)) => codec::encode(&lines),
        Ok(Err(details)) => codec::error_frame(&details),
        Err(payload) => codec::error_frame(&format!("plugin panicked: {}", panic_message(&*payload))),
    };
    RawBuffer::from_vec(encoded)
}

/// Body of a generated lifecycle hook.
pub fn hook_entry<F>(body: F) -> i32
where
    F: FnOnce() -> Result<(), String>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => HOOK_OK,
        Ok(Err(_)) | Err(_) => HOOK_FAILED,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

/// Export the required entry points plus `pagewire_plugin_free` and
/// `pagewire_plugin_flags`.
///
/// `name` and `command` must be string literals. `run` is any expression of
/// type `FnOnce(Vec<String>) -> Result<Vec<String>, String>`.
#[macro_export]
macro_rules! declare_plugin {
    (
        name: $name:literal,
        command: $command:literal,
        args: [$($arg:literal),* $(,)?],
        $(flags: $flags:expr,)?
        run: $run:expr $(,)?
    ) => {
        #[no_mangle]
        pub extern "C" fn pagewire_plugin_name() -> *const ::std::ffi::c_char {
            concat!($name, "\0").as_ptr().cast()
        }

        #[no_mangle]
        pub extern "C" fn pagewire_plugin_version() -> *const ::std::ffi::c_char {
            $crate::plugins::version::ABI_VERSION_CSTR.as_ptr()
        }

        #[no_mangle]
        pub extern "C" fn pagewire_plugin_command() -> *const ::std::ffi::c_char {
            concat!($command, "\0").as_ptr().cast()
        }

        #[no_mangle]
        pub extern "C" fn pagewire_plugin_args() -> $crate::plugins::abi::RawBuffer {
            let names: &[&str] = &[$($arg),*];
            $crate::plugins::abi::RawBuffer::from_vec($crate::plugins::codec::encode(names))
        }

        #[no_mangle]
        pub extern "C" fn pagewire_plugin_flags() -> u32 {
            ($crate::plugins::abi::PluginFlags::empty() $(| $flags)?).bits()
        }

        #[no_mangle]
        pub extern "C" fn pagewire_plugin_run(
            input: $crate::plugins::abi::RawBuffer,
        ) -> $crate::plugins::abi::RawBuffer {
            $crate::plugins::sdk::run_entry(&input, $run)
        }

        /// # Safety
        /// `buffer` must come from one of this plugin's entry points.
        #[no_mangle]
        pub unsafe extern "C" fn pagewire_plugin_free(buffer: $crate::plugins::abi::RawBuffer) {
            buffer.free_boxed();
        }
    };
}

/// Export `on_plugin_load` running `$body: FnOnce() -> Result<(), String>`.
#[macro_export]
macro_rules! on_plugin_load {
    ($body:expr) => {
        #[no_mangle]
        pub extern "C" fn on_plugin_load() -> i32 {
            $crate::plugins::sdk::hook_entry($body)
        }
    };
}

/// Export `on_plugin_unload` running `$body: FnOnce() -> Result<(), String>`.
#[macro_export]
macro_rules! on_plugin_unload {
    ($body:expr) => {
        #[no_mangle]
        pub extern "C" fn on_plugin_unload() -> i32 {
            $crate::plugins::sdk::hook_entry($body)
        }
    };
}
