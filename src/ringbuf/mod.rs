//! Power-of-two cyclic byte buffer, correct for one producer and one
//! consumer.
//!
//! `read_pos`/`write_pos` are monotonically increasing 64-bit counters;
//! the physical offset is `pos & (capacity - 1)`. One slot is always kept
//! empty so that `read_pos == write_pos` unambiguously means empty.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct RingBuffer {
    data: Box<[u8]>,
    mask: u64,
    read_pos: AtomicU64,
    write_pos: AtomicU64,
}

impl RingBuffer {
    /// Rounds `capacity` up to the next power of two (minimum 16 KiB, per
    /// the connection buffer invariant) and allocates the backing storage.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(16 * 1024).next_power_of_two();
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            mask: (capacity - 1) as u64,
            read_pos: AtomicU64::new(0),
            write_pos: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    #[inline]
    pub fn available(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        (w.wrapping_sub(r)) as usize
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.available() - 1
    }

    /// Copies up to `src.len()` bytes in, limited by free space. Returns
    /// the number of bytes actually written, possibly split across the
    /// wrap point.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let free = self.free_space();
        if free == 0 || src.is_empty() {
            return 0;
        }
        let to_write = src.len().min(free);

        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let cap = self.capacity();
        let write_idx = (write_pos & self.mask) as usize;
        let first_part = cap - write_idx;

        if to_write <= first_part {
            self.data[write_idx..write_idx + to_write].copy_from_slice(&src[..to_write]);
        } else {
            self.data[write_idx..cap].copy_from_slice(&src[..first_part]);
            self.data[..to_write - first_part].copy_from_slice(&src[first_part..to_write]);
        }

        self.write_pos
            .store(write_pos.wrapping_add(to_write as u64), Ordering::Release);
        to_write
    }

    /// Reads up to `dst.len()` bytes, advancing `read_pos`.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = self.peek(dst);
        self.skip(n);
        n
    }

    /// Reads up to `dst.len()` bytes without advancing `read_pos`.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let available = self.available();
        if available == 0 || dst.is_empty() {
            return 0;
        }
        let to_read = dst.len().min(available);

        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let cap = self.capacity();
        let read_idx = (read_pos & self.mask) as usize;
        let first_part = cap - read_idx;

        if to_read <= first_part {
            dst[..to_read].copy_from_slice(&self.data[read_idx..read_idx + to_read]);
        } else {
            dst[..first_part].copy_from_slice(&self.data[read_idx..cap]);
            dst[first_part..to_read].copy_from_slice(&self.data[..to_read - first_part]);
        }

        to_read
    }

    /// Advances `read_pos` by up to `len` bytes without copying.
    pub fn skip(&mut self, len: usize) -> usize {
        let available = self.available();
        let to_skip = len.min(available);
        if to_skip == 0 {
            return 0;
        }
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        self.read_pos
            .store(read_pos.wrapping_add(to_skip as u64), Ordering::Release);
        to_skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_power_of_two_with_minimum() {
        let rb = RingBuffer::new(100);
        assert_eq!(rb.capacity(), 16 * 1024);
        let rb = RingBuffer::new(20 * 1024);
        assert_eq!(rb.capacity(), 32 * 1024);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut rb = RingBuffer::new(16);
        assert_eq!(rb.write(b"hello"), 5);
        assert_eq!(rb.available(), 5);

        let mut buf = [0u8; 5];
        assert_eq!(rb.read(&mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut rb = RingBuffer::new(16);
        rb.write(b"abc");
        let mut buf = [0u8; 3];
        assert_eq!(rb.peek(&mut buf), 3);
        assert_eq!(rb.available(), 3);
        assert_eq!(rb.read(&mut buf), 3);
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn wrap_around_split_write_and_read() {
        let cap = 16 * 1024;
        let mut rb = RingBuffer::new(cap);
        let chunk = vec![1u8; cap - 4];
        rb.write(&chunk);
        let mut sink = vec![0u8; cap - 4];
        rb.read(&mut sink);

        // write_pos/read_pos now sit near the wrap boundary.
        let payload = vec![2u8; 10];
        assert_eq!(rb.write(&payload), 10);
        let mut out = vec![0u8; 10];
        assert_eq!(rb.read(&mut out), 10);
        assert_eq!(out, payload);
    }

    #[test]
    fn full_buffer_keeps_one_slot_empty() {
        let mut rb = RingBuffer::new(16);
        let cap = rb.capacity();
        let chunk = vec![9u8; cap];
        let written = rb.write(&chunk);
        assert_eq!(written, cap - 1);
        assert_eq!(rb.free_space(), 0);
        assert_eq!(rb.write(&[1]), 0);
    }

    #[test]
    fn skip_advances_without_copy() {
        let mut rb = RingBuffer::new(16);
        rb.write(b"abcdef");
        assert_eq!(rb.skip(3), 3);
        let mut buf = [0u8; 3];
        assert_eq!(rb.read(&mut buf), 3);
        assert_eq!(&buf, b"def");
    }

    #[test]
    fn available_after_write_matches_invariant() {
        let mut rb = RingBuffer::new(16);
        let before = rb.available();
        let free_before = rb.free_space();
        let n = rb.write(b"0123456789abcdef");
        assert_eq!(rb.available(), before + n.min(free_before));
    }
}
