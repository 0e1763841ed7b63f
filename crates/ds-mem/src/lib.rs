#![no_std]
#![forbid(unsafe_code)]

extern crate alloc;
use alloc::boxed::Box;
use alloc::sync::Arc;
use spin::Mutex;
use zeroize::Zeroize;
use core::ops::{Deref, DerefMut};

use ds_core::BLOCK_SIZE;

/// Staging area for one block write.
/// `len` is the payload length; bytes past it are padding and stay zero.
#[derive(Zeroize)]
pub struct SwapBuffer {
    pub data: [u8; BLOCK_SIZE],
    pub len: usize,
}

impl Default for SwapBuffer {
    fn default() -> Self {
        Self {
            data: [0u8; BLOCK_SIZE],
            len: 0,
        }
    }
}

impl SwapBuffer {
    /// Zero-fill, then copy `payload` to the front.
    /// Caller guarantees `payload.len() <= BLOCK_SIZE`.
    pub fn stage(&mut self, payload: &[u8]) {
        self.zeroize();
        self.data[..payload.len()].copy_from_slice(payload);
        self.len = payload.len();
    }

    pub fn is_clear(&self) -> bool {
        self.len == 0 && self.data.iter().all(|&b| b == 0)
    }
}

/// Holds the single swap buffer of a session.
/// Capacity is one: while a lease is out, `alloc` returns `None`.
pub struct SwapPool {
    slot: Mutex<Option<Box<SwapBuffer>>>,
}

/// Exclusive ownership of the swap buffer.
/// Dropping the lease zeroizes the buffer and puts it back in the pool,
/// so the staged bytes live exactly as long as whoever holds the lease.
pub struct SwapLease {
    buf: Option<Box<SwapBuffer>>,
    pool: Arc<SwapPool>,
}

impl SwapPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { slot: Mutex::new(Some(Box::new(SwapBuffer::default()))) })
    }

    pub fn alloc(self: &Arc<Self>) -> Option<SwapLease> {
        let mut slot = self.slot.lock();
        slot.take().map(|buf| SwapLease { buf: Some(buf), pool: self.clone() })
    }

    fn release(&self, buf: Box<SwapBuffer>) {
        let mut slot = self.slot.lock();
        *slot = Some(buf);
    }

    pub fn available(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// True when the buffer is home and holds no data.
    pub fn is_clear(&self) -> bool {
        match self.slot.lock().as_ref() {
            Some(buf) => buf.is_clear(),
            None => false,
        }
    }
}

impl SwapLease {
    /// Staged payload plus zero padding, `len` bytes from the start.
    pub fn bytes(&self, len: usize) -> &[u8] {
        &self.data[..len.min(BLOCK_SIZE)]
    }

    pub fn clear(&mut self) {
        (**self).zeroize();
    }
}

// `buf` is only `None` once `drop` has taken it, so the unwraps below cannot fail.
impl Deref for SwapLease {
    type Target = SwapBuffer;
    fn deref(&self) -> &Self::Target { self.buf.as_ref().unwrap() }
}

impl DerefMut for SwapLease {
    fn deref_mut(&mut self) -> &mut Self::Target { self.buf.as_mut().unwrap() }
}

impl Drop for SwapLease {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.zeroize();
            self.pool.release(buf);
        }
    }
}

impl core::fmt::Debug for SwapLease {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwapLease").field("len", &self.len).finish()
    }
}
