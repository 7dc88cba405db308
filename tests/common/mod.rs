//! Test doubles implementing the raw plugin ABI.
//!
//! `MockPlugin` hands out buffers the way a real plugin would and records
//! every allocation, free and hook call so tests can check the host's
//! bookkeeping. Behaviors cover both compliant and non-compliant plugins.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::{c_char, CString};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pagewire::plugins::abi::{PluginAbi, PluginFlags, RawBuffer, HOOK_FAILED, HOOK_OK};
use pagewire::plugins::codec;

/// What `run` does.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// `"hello, " + arg` for every argument.
    Greet,
    /// Returns the arguments unchanged.
    Echo,
    /// Greets after sleeping, to widen race windows.
    Slow(Duration),
    /// Returns the null failure sentinel.
    NullResult,
    /// Returns an error frame with the given details.
    ErrorFrame(String),
    /// Returns a properly allocated but truncated list.
    Garbage,
    /// Returns a properly allocated buffer of this many bytes.
    Oversized(usize),
    /// Non-compliant: hands the host's own argument buffer back.
    AliasInput,
    /// Non-compliant: null pointer with a non-zero length.
    NullWithLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Absent,
    Succeed,
    Fail,
}

/// Counters shared between a mock and the test that created it.
#[derive(Debug, Default)]
pub struct MockStats {
    pub allocations: AtomicUsize,
    pub frees: AtomicUsize,
    /// Frees of pointers this plugin never handed out or already freed.
    pub bad_frees: AtomicUsize,
    pub on_load: AtomicUsize,
    pub on_unload: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub dropped: AtomicBool,
    live: Mutex<HashMap<usize, usize>>,
}

impl MockStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn live_buffers(&self) -> usize {
        self.live.lock().unwrap().values().sum()
    }
}

pub struct MockPlugin {
    name: Option<CString>,
    version: CString,
    command: CString,
    args: Vec<String>,
    flags: PluginFlags,
    behavior: Behavior,
    on_load: Hook,
    on_unload: Hook,
    exports_free: bool,
    stats: Arc<MockStats>,
}

impl MockPlugin {
    pub fn new(command: &str) -> Self {
        Self {
            name: Some(CString::new(format!("{command}-plugin")).unwrap()),
            version: CString::new("1.2.0").unwrap(),
            command: CString::new(command).unwrap(),
            args: vec!["name".to_string()],
            flags: PluginFlags::empty(),
            behavior: Behavior::Greet,
            on_load: Hook::Succeed,
            on_unload: Hook::Succeed,
            exports_free: true,
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = CString::new(version).unwrap();
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|arg| (*arg).to_string()).collect();
        self
    }

    pub fn strict(mut self) -> Self {
        self.flags = PluginFlags::STRICT_ARITY;
        self
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn on_load(mut self, hook: Hook) -> Self {
        self.on_load = hook;
        self
    }

    pub fn on_unload(mut self, hook: Hook) -> Self {
        self.on_unload = hook;
        self
    }

    pub fn without_free(mut self) -> Self {
        self.exports_free = false;
        self
    }

    pub fn without_name(mut self) -> Self {
        self.name = None;
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    pub fn boxed(self) -> Box<dyn PluginAbi> {
        Box::new(self)
    }

    fn hand_out(&self, bytes: Vec<u8>) -> RawBuffer {
        let raw = RawBuffer::from_vec(bytes);
        *self
            .stats
            .live
            .lock()
            .unwrap()
            .entry(raw.data as usize)
            .or_default() += 1;
        self.stats.allocations.fetch_add(1, Ordering::SeqCst);
        raw
    }

    fn hook(&self, hook: Hook, counter: &AtomicUsize) -> Option<i32> {
        match hook {
            Hook::Absent => None,
            Hook::Succeed => {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(HOOK_OK)
            }
            Hook::Fail => {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(HOOK_FAILED)
            }
        }
    }

    fn respond(&self, args: Vec<String>, input: &RawBuffer) -> RawBuffer {
        let greet = |args: Vec<String>| -> Vec<String> {
            args.iter().map(|who| format!("hello, {who}")).collect()
        };
        match &self.behavior {
            Behavior::Greet => self.hand_out(codec::encode(&greet(args))),
            Behavior::Echo => self.hand_out(codec::encode(&args)),
            Behavior::Slow(delay) => {
                thread::sleep(*delay);
                self.hand_out(codec::encode(&greet(args)))
            }
            Behavior::NullResult => RawBuffer::null(),
            Behavior::ErrorFrame(details) => self.hand_out(codec::error_frame(details)),
            Behavior::Garbage => {
                let mut bytes = codec::encode(&["complete line"]);
                bytes.truncate(bytes.len() - 3);
                self.hand_out(bytes)
            }
            Behavior::Oversized(len) => self.hand_out(vec![0; *len]),
            Behavior::AliasInput => RawBuffer {
                data: input.data,
                len: input.len,
            },
            Behavior::NullWithLength => RawBuffer {
                data: std::ptr::null_mut(),
                len: 16,
            },
        }
    }
}

impl PluginAbi for MockPlugin {
    fn name(&self) -> *const c_char {
        self.name.as_ref().map_or(std::ptr::null(), |name| name.as_ptr())
    }

    fn version(&self) -> *const c_char {
        self.version.as_ptr()
    }

    fn command(&self) -> *const c_char {
        self.command.as_ptr()
    }

    fn args(&self) -> RawBuffer {
        self.hand_out(codec::encode(&self.args))
    }

    fn flags(&self) -> PluginFlags {
        self.flags
    }

    unsafe fn run(&self, input: RawBuffer) -> RawBuffer {
        let stats = &self.stats;
        stats.run_calls.fetch_add(1, Ordering::SeqCst);
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let args = codec::decode(input.as_slice()).unwrap();
        let output = self.respond(args, &input);

        stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        output
    }

    fn exposes_free(&self) -> bool {
        self.exports_free
    }

    unsafe fn free(&self, buffer: RawBuffer) {
        let key = buffer.data as usize;
        let mut live = self.stats.live.lock().unwrap();
        match live.get_mut(&key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                drop(live);
                self.stats.frees.fetch_add(1, Ordering::SeqCst);
                buffer.free_boxed();
            }
            _ => {
                self.stats.bad_frees.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn on_load(&self) -> Option<i32> {
        self.hook(self.on_load, &self.stats.on_load)
    }

    fn on_unload(&self) -> Option<i32> {
        self.hook(self.on_unload, &self.stats.on_unload)
    }

    fn origin(&self) -> String {
        format!("mock:{}", self.command.to_string_lossy())
    }
}

impl Drop for MockPlugin {
    fn drop(&mut self) {
        self.stats.dropped.store(true, Ordering::SeqCst);
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}
