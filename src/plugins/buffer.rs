//! Ownership of buffers crossing the plugin boundary.
//!
//! - Buffers the plugin returns are owned by the host from that moment and go
//!   back to the plugin's own free function exactly once, when the
//!   [`PluginBuffer`] guard drops.
//! - Buffers the host lends (argument lists) stay host-owned; the plugin sees
//!   them only for the duration of one call through [`BorrowedArgs::lend`].
//! - The host allocator never frees plugin memory and the plugin never frees
//!   host memory.

use tracing::debug;

use super::abi::{PluginAbi, RawBuffer};
use super::codec;
use super::error::DecodeError;

/// A returned buffer the host refuses to take ownership of.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnershipViolation {
    #[error("plugin returned a null pointer with length {0}")]
    NullWithLength(usize),
    #[error("plugin returned a pointer into the host's borrowed argument buffer")]
    AliasesInput,
}

/// Per-handle buffer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Buffers adopted from the plugin.
    pub received: u64,
    /// Buffers returned through the plugin's free function.
    pub freed: u64,
    /// Buffers left alone because the plugin exports no free function.
    pub retained: u64,
    /// Buffers refused as ownership violations and never freed.
    pub rejected: u64,
}

impl BufferStats {
    /// Adopted buffers not yet released one way or the other.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.received - self.freed - self.retained
    }
}

/// Bookkeeping for one plugin handle.
#[derive(Debug, Default)]
pub struct BufferLedger {
    stats: BufferStats,
}

impl BufferLedger {
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Take ownership of a buffer the plugin just returned.
    ///
    /// `Ok(None)` is the null sentinel. `input` is the buffer lent for the
    /// call that produced `raw`, if any.
    ///
    /// # Errors
    /// Returns the violation when the host must not own `raw`. Such a buffer
    /// is forgotten, not freed.
    pub fn adopt<'a>(
        &'a mut self,
        abi: &'a dyn PluginAbi,
        raw: RawBuffer,
        input: Option<&BorrowedArgs>,
    ) -> Result<Option<PluginBuffer<'a>>, OwnershipViolation> {
        if raw.is_null() {
            if raw.len == 0 {
                return Ok(None);
            }
            self.stats.rejected += 1;
            return Err(OwnershipViolation::NullWithLength(raw.len));
        }
        if input.is_some_and(|args| args.aliases(&raw)) {
            self.stats.rejected += 1;
            return Err(OwnershipViolation::AliasesInput);
        }

        self.stats.received += 1;
        Ok(Some(PluginBuffer {
            raw: Some(raw),
            abi,
            ledger: self,
        }))
    }
}

/// An owned plugin allocation, released through the plugin on drop.
pub struct PluginBuffer<'a> {
    raw: Option<RawBuffer>,
    abi: &'a dyn PluginAbi,
    ledger: &'a mut BufferLedger,
}

impl PluginBuffer<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.as_ref().map_or(0, |raw| raw.len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match &self.raw {
            // SAFETY: adopt() only accepts non-null buffers, and the plugin
            // keeps the allocation alive until we hand it back in drop().
            Some(raw) => unsafe { raw.as_slice() },
            None => &[],
        }
    }

    /// Decode the contents as an `EncodedList`.
    ///
    /// # Errors
    /// Propagates [`DecodeError`] from the codec.
    pub fn decode(&self) -> Result<Vec<String>, DecodeError> {
        codec::decode(self.bytes())
    }
}

impl Drop for PluginBuffer<'_> {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };
        if self.abi.exposes_free() {
            // SAFETY: the buffer came from this plugin and is released once.
            unsafe { self.abi.free(raw) };
            self.ledger.stats.freed += 1;
        } else {
            debug!(
                "{} exports no free function, treating {} byte buffer as static",
                self.abi.origin(),
                raw.len
            );
            self.ledger.stats.retained += 1;
        }
    }
}

/// Host-owned argument bytes lent to the plugin for one call.
#[derive(Debug)]
pub struct BorrowedArgs {
    bytes: Vec<u8>,
}

impl BorrowedArgs {
    #[must_use]
    pub fn encode<S: AsRef<str>>(args: &[S]) -> Self {
        Self {
            bytes: codec::encode(args),
        }
    }

    /// A view of the bytes, valid only while `self` is alive.
    ///
    /// The empty list is lent as the null buffer, so no host address reaches
    /// the plugin that its own empty allocations could share.
    #[must_use]
    pub fn lend(&self) -> RawBuffer {
        if self.bytes.is_empty() {
            return RawBuffer::null();
        }
        RawBuffer {
            data: self.bytes.as_ptr().cast_mut(),
            len: self.bytes.len(),
        }
    }

    /// Whether `raw` overlaps the lent allocation.
    #[must_use]
    pub fn aliases(&self, raw: &RawBuffer) -> bool {
        if self.bytes.is_empty() || raw.is_null() {
            return false;
        }
        let start = self.bytes.as_ptr() as usize;
        let end = start.saturating_add(self.bytes.len());
        let other_start = raw.data as usize;
        let other_end = other_start.saturating_add(raw.len.max(1));
        other_start < end && start < other_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_char;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Freeing {
        frees: AtomicUsize,
        exports_free: bool,
    }

    impl PluginAbi for Freeing {
        fn name(&self) -> *const c_char {
            std::ptr::null()
        }
        fn version(&self) -> *const c_char {
            std::ptr::null()
        }
        fn command(&self) -> *const c_char {
            std::ptr::null()
        }
        fn args(&self) -> RawBuffer {
            RawBuffer::null()
        }
        unsafe fn run(&self, _input: RawBuffer) -> RawBuffer {
            RawBuffer::null()
        }
        fn exposes_free(&self) -> bool {
            self.exports_free
        }
        unsafe fn free(&self, buffer: RawBuffer) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            buffer.free_boxed();
        }
        fn origin(&self) -> String {
            "test".to_string()
        }
    }

    fn plugin(exports_free: bool) -> Freeing {
        Freeing {
            frees: AtomicUsize::new(0),
            exports_free,
        }
    }

    #[test]
    fn test_guard_frees_exactly_once() {
        let abi = plugin(true);
        let mut ledger = BufferLedger::default();
        {
            let buffer = ledger
                .adopt(&abi, RawBuffer::from_vec(codec::encode(&["x"])), None)
                .unwrap()
                .unwrap();
            assert_eq!(buffer.decode().unwrap(), vec!["x".to_string()]);
        }
        assert_eq!(abi.frees.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.stats().freed, 1);
        assert_eq!(ledger.stats().outstanding(), 0);
    }

    #[test]
    fn test_without_free_function_buffer_is_retained() {
        static BYTES: [u8; 3] = [1, 2, 3];
        let abi = plugin(false);
        let mut ledger = BufferLedger::default();
        let raw = RawBuffer {
            data: BYTES.as_ptr().cast_mut(),
            len: BYTES.len(),
        };
        drop(ledger.adopt(&abi, raw, None).unwrap());
        assert_eq!(abi.frees.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.stats().retained, 1);
    }

    #[test]
    fn test_null_sentinel() {
        let abi = plugin(true);
        let mut ledger = BufferLedger::default();
        assert!(ledger.adopt(&abi, RawBuffer::null(), None).unwrap().is_none());
        assert_eq!(ledger.stats(), BufferStats::default());
    }

    #[test]
    fn test_null_with_length_is_rejected() {
        let abi = plugin(true);
        let mut ledger = BufferLedger::default();
        let raw = RawBuffer {
            data: std::ptr::null_mut(),
            len: 8,
        };
        assert_eq!(
            ledger.adopt(&abi, raw, None).err(),
            Some(OwnershipViolation::NullWithLength(8))
        );
        assert_eq!(ledger.stats().rejected, 1);
    }

    #[test]
    fn test_aliasing_the_input_is_rejected() {
        let abi = plugin(true);
        let mut ledger = BufferLedger::default();
        let args = BorrowedArgs::encode(&["abc"]);
        let raw = args.lend();
        assert_eq!(
            ledger.adopt(&abi, raw, Some(&args)).err(),
            Some(OwnershipViolation::AliasesInput)
        );
        assert_eq!(abi.frees.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_arguments_are_lent_as_null() {
        let empty: [&str; 0] = [];
        let args = BorrowedArgs::encode(&empty);
        let raw = args.lend();
        assert!(raw.is_null());
        assert_eq!(raw.len, 0);
    }

    #[test]
    fn test_alias_check_survives_wild_pointers() {
        let args = BorrowedArgs::encode(&["abc"]);
        let wild = RawBuffer {
            data: usize::MAX as *mut u8,
            len: usize::MAX,
        };
        assert!(!args.aliases(&wild));

        let inside = RawBuffer {
            data: args.lend().data.wrapping_add(1),
            len: usize::MAX,
        };
        assert!(args.aliases(&inside));
    }

    #[test]
    fn test_separate_allocation_does_not_alias() {
        let args = BorrowedArgs::encode(&["abc"]);
        let other = RawBuffer::from_vec(vec![0; 4]);
        assert!(!args.aliases(&other));
        unsafe { other.free_boxed() };
    }
}
