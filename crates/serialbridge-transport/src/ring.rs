//! Fixed-capacity circular byte store.
//!
//! The ring buffer sits between a link's raw receive and the frame
//! assembler. It is owned by exactly one reader, so it needs no locking.
//!
//! Invariant: `len() + free() == capacity()` at all times. A push that does
//! not fit is rejected whole; buffered bytes are never shifted out to make
//! room.

use crate::error::{Result, TransportError};

/// A fixed-capacity FIFO of bytes.
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// Allocate a ring buffer holding up to `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Total number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Alias of [`RingBuffer::len`].
    pub fn available(&self) -> usize {
        self.len
    }

    /// Number of bytes that can still be pushed.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append `data` at the tail.
    ///
    /// Either all of `data` is accepted or none of it is, in which case
    /// [`TransportError::Overflow`] is returned and the buffer is unchanged.
    pub fn push(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() > self.free() {
            return Err(TransportError::Overflow {
                requested: data.len(),
                free: self.free(),
            });
        }

        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let first = data.len().min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        self.buf[..rest].copy_from_slice(&data[first..]);
        self.len += data.len();
        Ok(data.len())
    }

    /// Copy up to `dest.len()` bytes from the head without consuming them.
    pub fn peek_into(&self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.len);
        let (a, b) = self.as_slices();
        let from_a = n.min(a.len());
        dest[..from_a].copy_from_slice(&a[..from_a]);
        dest[from_a..n].copy_from_slice(&b[..n - from_a]);
        n
    }

    /// Move up to `dest.len()` bytes from the head into `dest`.
    pub fn pop_into(&mut self, dest: &mut [u8]) -> usize {
        let n = self.peek_into(dest);
        self.skip(n);
        n
    }

    /// Discard up to `n` bytes from the head, returning how many were dropped.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        self.head = (self.head + n) % self.capacity();
        self.len -= n;
        if self.len == 0 {
            self.head = 0;
        }
        n
    }

    /// Drop every buffered byte.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Byte at offset `index` from the head.
    pub fn get(&self, index: usize) -> Option<u8> {
        if index >= self.len {
            return None;
        }
        Some(self.buf[(self.head + index) % self.capacity()])
    }

    /// The buffered bytes in FIFO order, split at the wrap point.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        let cap = self.capacity();
        let first = self.len.min(cap - self.head);
        (
            &self.buf[self.head..self.head + first],
            &self.buf[..self.len - first],
        )
    }

    /// Offset from the head of the first occurrence of `pattern`.
    pub fn find(&self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() || pattern.len() > self.len {
            return None;
        }
        (0..=self.len - pattern.len()).find(|&start| {
            pattern
                .iter()
                .enumerate()
                .all(|(i, &b)| self.get(start + i) == Some(b))
        })
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("head", &self.head)
            .finish()
    }
}
