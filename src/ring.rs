// Author: Lukas Bower
// Purpose: Provide the fixed-capacity receive ring shared by the network path and the interpreter.

//! Receive ring buffer.
//!
//! The ring is filled by the receive path during [`crate::LoginServer::run`]
//! and drained one byte at a time by the interpreter. Read and write indices
//! advance modulo the storage size; `read == write` means empty and the slot
//! just behind `read` is never written, so a full ring holds `N - 1` bytes.

use static_assertions::const_assert;

/// Storage size of the default receive ring.
pub const RX_BUFFER_SIZE: usize = 256;

const_assert!(RX_BUFFER_SIZE > 1);

/// Fixed-capacity single-producer, single-consumer byte ring.
#[derive(Debug, Clone)]
pub struct RxRing<const N: usize = RX_BUFFER_SIZE> {
    storage: [u8; N],
    read: usize,
    write: usize,
}

impl<const N: usize> Default for RxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RxRing<N> {
    const STORAGE_OK: () = assert!(N > 1, "ring storage needs at least two slots");

    /// Create an empty ring.
    #[must_use]
    pub const fn new() -> Self {
        let () = Self::STORAGE_OK;
        Self {
            storage: [0u8; N],
            read: 0,
            write: 0,
        }
    }

    /// Number of bytes the ring can hold at once.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.write + N - self.read) % N
    }

    /// Returns `true` when no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Returns `true` when no further byte can be written.
    #[must_use]
    pub fn is_full(&self) -> bool {
        (self.write + 1) % N == self.read
    }

    /// Drop every buffered byte.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    fn contiguous_free(&self) -> usize {
        let end = if self.write >= self.read {
            if self.read == 0 {
                N - 1
            } else {
                N
            }
        } else {
            self.read - 1
        };
        end - self.write
    }

    /// Largest contiguous region that can be written without reaching `read - 1`.
    ///
    /// Receive directly into the slice, then [`commit`](Self::commit) the byte count.
    pub fn writable_span(&mut self) -> &mut [u8] {
        let free = self.contiguous_free();
        &mut self.storage[self.write..self.write + free]
    }

    /// Publish `len` bytes previously written into [`writable_span`](Self::writable_span).
    ///
    /// Counts beyond the span are clamped.
    pub fn commit(&mut self, len: usize) {
        let len = len.min(self.contiguous_free());
        self.write = (self.write + len) % N;
    }

    /// Copy as much of `data` as fits, returning the number of bytes stored.
    pub fn push_slice(&mut self, data: &[u8]) -> usize {
        let mut stored = 0;
        while stored < data.len() {
            let span = self.writable_span();
            if span.is_empty() {
                break;
            }
            let count = span.len().min(data.len() - stored);
            span[..count].copy_from_slice(&data[stored..stored + count]);
            self.commit(count);
            stored += count;
        }
        stored
    }

    /// Remove the oldest buffered byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.storage[self.read];
        self.read = (self.read + 1) % N;
        Some(byte)
    }
}
