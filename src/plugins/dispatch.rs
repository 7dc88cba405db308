//! Command dispatch into a resolved plugin handle.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::codec::{self, MAX_ENTRY_LEN};
use super::error::DispatchError;
use super::handle::PluginHandle;
use crate::config::HostConfig;

/// Largest result buffer accepted from a plugin by default (16 MiB).
pub const DEFAULT_MAX_BUFFER_LEN: usize = 16 * 1024 * 1024;

/// Knobs applied to every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Watchdog deadline. `None` blocks until the plugin returns.
    pub timeout: Option<Duration>,
    pub max_buffer_len: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_buffer_len: DEFAULT_MAX_BUFFER_LEN,
        }
    }
}

impl From<&HostConfig> for DispatchOptions {
    fn from(config: &HostConfig) -> Self {
        Self {
            timeout: config.dispatch.timeout_ms.map(Duration::from_millis),
            max_buffer_len: config.limits.max_buffer_len,
        }
    }
}

/// Check arity, then run the command on `handle`.
///
/// The arity check only rejects when the plugin declared strict arity;
/// otherwise a mismatch is logged and the arguments pass through unchanged.
///
/// Arguments the wire format cannot carry, or whose encoding exceeds
/// `max_buffer_len`, are refused before the plugin is called.
///
/// # Errors
/// [`DispatchError::ArityMismatch`], [`DispatchError::PluginError`] or, with
/// a watchdog configured, [`DispatchError::Timeout`].
pub fn dispatch(
    handle: &Arc<PluginHandle>,
    args: &[String],
    options: &DispatchOptions,
) -> Result<Vec<String>, DispatchError> {
    let descriptor = handle.descriptor();
    if let Err(err) = descriptor.check_arity(args.len()) {
        if descriptor.is_strict() {
            return Err(err);
        }
        debug!("Passing arguments through despite advisory arity: {}", err);
    }

    check_argument_sizes(args, MAX_ENTRY_LEN, options.max_buffer_len)?;

    trace!(
        "Dispatching `{}` to plugin {} with {} argument(s)",
        descriptor.command,
        handle.id(),
        args.len()
    );

    match options.timeout {
        None => handle.run(args, options.max_buffer_len),
        Some(timeout) => run_with_watchdog(handle, args, options.max_buffer_len, timeout),
    }
}

fn check_argument_sizes(
    args: &[String],
    max_entry: usize,
    max_total: usize,
) -> Result<(), DispatchError> {
    let mut total: usize = 0;
    for (index, arg) in args.iter().enumerate() {
        if arg.len() > max_entry {
            return Err(DispatchError::PluginError(format!(
                "argument {index} is {} bytes, longer than the {max_entry} byte entry limit",
                arg.len()
            )));
        }
        total = total.saturating_add(codec::PREFIX_LEN + arg.len());
    }
    if total > max_total {
        return Err(DispatchError::PluginError(format!(
            "encoded arguments of {total} bytes exceed the {max_total} byte limit"
        )));
    }
    Ok(())
}

/// Run on a worker thread and stop waiting after `timeout`.
///
/// The native call cannot be interrupted: on timeout the worker keeps
/// running, still holds the handle's lock, and releases its result buffer
/// when the plugin finally returns.
fn run_with_watchdog(
    handle: &Arc<PluginHandle>,
    args: &[String],
    max_len: usize,
    timeout: Duration,
) -> Result<Vec<String>, DispatchError> {
    let command = handle.descriptor().command.clone();
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(handle);
    let owned_args = args.to_vec();

    thread::Builder::new()
        .name(format!("plugin-{command}"))
        .spawn(move || {
            let result = worker.run(&owned_args, max_len);
            // The caller may have given up already.
            let _ = tx.send(result);
        })
        .map_err(|err| DispatchError::PluginError(format!("failed to spawn worker: {err}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                "`{}` still running after {:?}; abandoning the wait",
                command, timeout
            );
            Err(DispatchError::Timeout {
                command,
                after: timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(DispatchError::PluginError(format!(
            "worker for `{command}` exited without a result"
        ))),
    }
}
