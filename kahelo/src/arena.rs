// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-scene byte arena backing stored state and primitive data.
//!
//! Commands never carry pointers into producer-owned memory; everything a
//! rasterizer thread reads is either inline in the command or lives in this
//! arena, addressed by [`Span`]. The arena is a bump allocator with a hard
//! byte budget, so exhaustion is an expected, recoverable condition for the
//! binning paths.

use bytemuck::{AnyBitPattern, NoUninit, Pod, Zeroable};

/// An (offset, length) reference into a scene arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Span {
    pub offset: u32,
    pub len: u32,
}

impl Span {
    /// The empty span. Reads resolve to an empty slice.
    pub const EMPTY: Self = Self { offset: 0, len: 0 };

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Marker for arena or command-budget exhaustion. Internal; the binning
/// paths translate it into a flush-and-retry or a capacity error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct SceneFull;

/// Bump allocator over a u64-backed buffer.
///
/// The backing store is `u64`s so the base is 8-byte aligned; allocation
/// offsets are rounded up to the requested alignment, which makes typed
/// reads through `bytemuck` sound for any record allocated with its own
/// alignment. Memory is zero-filled on allocation and retained across
/// [`Arena::reset`] for reuse.
#[derive(Debug)]
pub struct Arena {
    buf: Vec<u64>,
    used: usize,
    limit: usize,
}

impl Arena {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            used: 0,
            limit,
        }
    }

    /// Bytes currently allocated, including alignment padding.
    pub fn used(&self) -> usize {
        self.used
    }

    /// The arena's byte budget.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Allocate `size` zeroed bytes at the given alignment.
    pub(crate) fn alloc(&mut self, size: usize, align: usize) -> Result<Span, SceneFull> {
        debug_assert!(align.is_power_of_two() && align <= 16);
        let offset = (self.used + align - 1) & !(align - 1);
        let end = offset.checked_add(size).ok_or(SceneFull)?;
        if end > self.limit {
            return Err(SceneFull);
        }
        if end > self.buf.len() * 8 {
            self.buf.resize(end.div_ceil(8), 0);
        }
        self.used = end;
        Ok(Span {
            offset: offset as u32,
            len: size as u32,
        })
    }

    /// Allocate and fill with a copy of `data`.
    pub(crate) fn alloc_bytes(&mut self, data: &[u8], align: usize) -> Result<Span, SceneFull> {
        let span = self.alloc(data.len(), align)?;
        self.bytes_mut(span).copy_from_slice(data);
        Ok(span)
    }

    /// Allocate and store one plain-data record at its natural alignment.
    pub(crate) fn alloc_pod<T: NoUninit>(&mut self, value: &T) -> Result<Span, SceneFull> {
        self.alloc_bytes(bytemuck::bytes_of(value), core::mem::align_of::<T>())
    }

    /// Resolve a span to its bytes.
    pub fn bytes(&self, span: Span) -> &[u8] {
        let offset = span.offset as usize;
        &bytemuck::cast_slice(&self.buf)[offset..offset + span.len as usize]
    }

    fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        let offset = span.offset as usize;
        &mut bytemuck::cast_slice_mut(&mut self.buf)[offset..offset + span.len as usize]
    }

    /// Read back a record stored by [`Arena::alloc_pod`] for the same `T`.
    pub fn read_pod<T: AnyBitPattern>(&self, span: Span) -> &T {
        bytemuck::from_bytes(self.bytes(span))
    }

    /// View a span as `f32`s. The span must be 4-aligned with a multiple-of-4
    /// length, which holds for every float payload the binner stores.
    pub fn f32s(&self, span: Span) -> &[f32] {
        bytemuck::cast_slice(self.bytes(span))
    }

    /// Drop all allocations but keep the backing buffer for reuse.
    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_respects_alignment() {
        let mut arena = Arena::new(1024);
        let a = arena.alloc(3, 1).unwrap();
        let b = arena.alloc(8, 8).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset % 8, 0);
        assert!(b.offset >= a.offset + a.len);
    }

    #[test]
    fn alloc_fails_past_limit() {
        let mut arena = Arena::new(16);
        assert!(arena.alloc(12, 4).is_ok());
        assert_eq!(arena.alloc(8, 4), Err(SceneFull));
        // The failed allocation must not consume budget.
        assert_eq!(arena.used(), 12);
        assert!(arena.alloc(4, 4).is_ok());
    }

    #[test]
    fn pod_roundtrip() {
        #[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
        #[repr(C)]
        struct Rec {
            a: u32,
            b: f32,
        }
        let mut arena = Arena::new(64);
        let rec = Rec { a: 7, b: 2.5 };
        let span = arena.alloc_pod(&rec).unwrap();
        assert_eq!(arena.read_pod::<Rec>(span), &rec);
    }

    #[test]
    fn reset_reclaims_budget() {
        let mut arena = Arena::new(32);
        arena.alloc(32, 4).unwrap();
        assert_eq!(arena.alloc(1, 1), Err(SceneFull));
        arena.reset();
        assert_eq!(arena.used(), 0);
        let span = arena.alloc_bytes(&[1, 2, 3, 4], 4).unwrap();
        assert_eq!(arena.bytes(span), &[1, 2, 3, 4]);
    }

    #[test]
    fn fresh_allocations_are_zeroed() {
        let mut arena = Arena::new(64);
        let a = arena.alloc_bytes(&[0xff; 16], 8).unwrap();
        arena.reset();
        let b = arena.alloc(16, 8).unwrap();
        assert_eq!(a, b);
        assert_eq!(arena.bytes(b), &[0; 16]);
    }

    #[test]
    fn f32_view() {
        let mut arena = Arena::new(64);
        let span = arena
            .alloc_bytes(bytemuck::cast_slice(&[1.0f32, 0.5, -2.0]), 4)
            .unwrap();
        assert_eq!(arena.f32s(span), &[1.0, 0.5, -2.0]);
    }
}
