//! # Free-List Engine
//!
//! Address-ordered singly linked list of free blocks plus the algorithms
//! operating on it: first-fit allocation with splitting, ordered reinsertion
//! with front/back coalescing, and read-only enumeration.
//!
//! The list has no separate node storage. Each free block's link word lives
//! in the first bytes of its own payload — a block on the free list has no
//! external owner, so its payload is ours to use. Keeping the list sorted by
//! address is what makes coalescing a pair of O(1) neighbour checks instead
//! of a search.
//!
//! # Safety
//!
//! All methods operate on raw addresses inside the managed span
//! `[start, end)` handed to [`FreeList::new`]. The span must be valid,
//! writable and exclusive to this list for its entire lifetime; every header
//! reachable from the list or by physical stride must have been written by
//! this engine. The public heap façade upholds this by construction.

use crate::block::{BlockHeader, FOOTER_SIZE, Geometry};
use core::ptr::null_mut;
use log::trace;

/// The free-list engine for one managed span.
pub(crate) struct FreeList {
    /// First free block in address order, or null when fully allocated.
    head: *mut BlockHeader,
    geo: Geometry,
    /// Address of the first header in the managed span.
    start: usize,
    /// One past the last managed byte.
    end: usize,
}

impl FreeList {
    /// Seed the span `[start, end)` with one maximal free block and anchor
    /// the list to it.
    ///
    /// # Safety
    /// - `[start, end)` must be valid, writable memory exclusive to this
    ///   list and must outlive it.
    /// - `start` and `end` must be aligned to the geometry's alignment, and
    ///   the span must hold at least one header stride plus the minimum
    ///   payload.
    pub(crate) unsafe fn new(geo: Geometry, start: usize, end: usize) -> Self {
        let first = start as *mut BlockHeader;
        let size = end - start - geo.header_stride();
        unsafe {
            first.write(BlockHeader::new(size));
            (*first).set_free(true);
        }
        let mut list = Self {
            head: first,
            geo,
            start,
            end,
        };
        unsafe {
            list.set_next(first, null_mut());
            list.write_footer(first);
        }
        list
    }

    #[inline]
    pub(crate) const fn geometry(&self) -> Geometry {
        self.geo
    }

    /// Address of the first header in the managed span.
    #[inline]
    pub(crate) const fn managed_start(&self) -> usize {
        self.start
    }

    /// One past the last managed byte.
    #[inline]
    pub(crate) const fn managed_end(&self) -> usize {
        self.end
    }

    #[inline]
    pub(crate) const fn head(&self) -> *mut BlockHeader {
        self.head
    }

    /// Iterate over the free blocks in address order.
    pub(crate) const fn iter(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            list: self,
            cursor: self.head,
        }
    }

    /// First-fit allocation.
    ///
    /// Reserves at least `n` payload bytes and returns the payload address,
    /// or null when no free block is large enough. A zero-size request
    /// yields a minimum-sized block.
    ///
    /// # Safety
    /// The list invariants must hold (ascending order, valid headers).
    ///
    /// # Panics
    /// Panics when a header on the free list carries a dead canary.
    pub(crate) unsafe fn allocate(&mut self, n: usize) -> *mut u8 {
        let req = self.geo.request_size(n);

        // First fit, tracking the list predecessor for the unlink below.
        let mut prev: *mut BlockHeader = null_mut();
        let mut chosen = self.head;
        while !chosen.is_null() {
            unsafe {
                assert!(
                    (*chosen).canary_alive(),
                    "heap corruption: dead canary in free block at {:#x}",
                    chosen as usize
                );
                if (*chosen).size() >= req {
                    break;
                }
                prev = chosen;
                chosen = self.next_of(chosen);
            }
        }
        if chosen.is_null() {
            trace!("allocate({n}): no fit for {req} payload bytes");
            return null_mut();
        }

        let remaining = unsafe { (*chosen).size() } - req;
        if remaining >= self.geo.header_stride() + self.geo.min_payload() {
            // Split: shrink the chosen block and put the tail on the list in
            // its stead.
            unsafe {
                (*chosen).set_size(req);
                let tail = self.geo.following(chosen as usize, req) as *mut BlockHeader;
                tail.write(BlockHeader::new(remaining - self.geo.header_stride()));
                (*tail).set_free(true);
                self.write_footer(tail);
                self.set_next(tail, self.next_of(chosen));
                self.set_next(chosen, tail);
            }
        }
        // Otherwise the remainder cannot hold a block; the caller gets the
        // entire payload.

        unsafe {
            let after = self.next_of(chosen);
            if prev.is_null() {
                self.head = after;
            } else {
                self.set_next(prev, after);
            }
            (*chosen).set_free(false);
            if let Some(following) = self.following(chosen) {
                (*following).set_prev_free(false);
            }
        }

        let payload = self.geo.payload(chosen as usize);
        trace!(
            "allocate({n}) -> {payload:#x} ({} payload bytes)",
            unsafe { (*chosen).size() }
        );
        payload as *mut u8
    }

    /// Reinsert `block` in address order and coalesce it with free physical
    /// neighbours.
    ///
    /// # Safety
    /// - `block` must point at a header previously produced by this engine,
    ///   currently allocated and owned by no caller anymore.
    /// - The list invariants must hold.
    pub(crate) unsafe fn insert(&mut self, block: *mut BlockHeader) {
        // Largest listed block below the insertion address, or null for a
        // head insert.
        let mut pos: *mut BlockHeader = null_mut();
        let mut cursor = self.head;
        while !cursor.is_null() && (cursor as usize) < (block as usize) {
            pos = cursor;
            cursor = unsafe { self.next_of(cursor) };
        }

        unsafe {
            (*block).set_free(true);
            if pos.is_null() {
                self.set_next(block, self.head);
                self.head = block;
            } else {
                self.set_next(block, self.next_of(pos));
                self.set_next(pos, block);
            }
            self.write_footer(block);
        }

        // Neighbour metadata: the successor learns its predecessor is free;
        // the own prev-free flag was kept current while the block was
        // allocated.
        unsafe {
            if let Some(following) = self.following(block) {
                (*following).set_prev_free(true);
            }
        }

        trace!("insert {:#x} ({} payload bytes)", block as usize, unsafe {
            (*block).size()
        });

        // Coalesce with the following block first, then fold the result into
        // a free predecessor.
        unsafe {
            self.merge_back(block);
            if let Some(preceding) = self.preceding(block) {
                debug_assert!((*preceding).is_free());
                self.merge_back(preceding);
            }
        }
    }

    /// Absorb the physically following block into `block` if both are free.
    ///
    /// The merged block keeps `block`'s slot on the list and inherits the
    /// successor's link.
    ///
    /// # Safety
    /// `block` must be a free block on the list with current invariants.
    unsafe fn merge_back(&mut self, block: *mut BlockHeader) {
        let Some(following) = (unsafe { self.following(block) }) else {
            return;
        };
        if !unsafe { (*following).is_free() } {
            return;
        }
        unsafe {
            self.set_next(block, self.next_of(following));
            let merged = (*block).size() + self.geo.header_stride() + (*following).size();
            (*block).set_size(merged);
            self.write_footer(block);
        }
        trace!(
            "merged {:#x} and {:#x}",
            block as usize, following as usize
        );
    }

    /// The physically following block, or `None` at the managed end.
    ///
    /// # Safety
    /// `block` must point at a valid header inside the managed span.
    pub(crate) unsafe fn following(&self, block: *mut BlockHeader) -> Option<*mut BlockHeader> {
        let addr = self.geo.following(block as usize, unsafe { (*block).size() });
        debug_assert!(addr <= self.end);
        if addr < self.end {
            Some(addr as *mut BlockHeader)
        } else {
            None
        }
    }

    /// The physically preceding block located through its boundary tag, or
    /// `None` when the predecessor is allocated (its footer would not exist)
    /// or `block` is the first block.
    ///
    /// # Safety
    /// `block` must point at a valid header inside the managed span with a
    /// correct `prev_free` flag.
    pub(crate) unsafe fn preceding(&self, block: *mut BlockHeader) -> Option<*mut BlockHeader> {
        if !unsafe { (*block).prev_free() } {
            return None;
        }
        let footer = (block as usize) - FOOTER_SIZE;
        let size = unsafe { (footer as *const usize).read() };
        Some(self.geo.preceding(block as usize, size) as *mut BlockHeader)
    }

    /// Read the free-list link of `block`.
    ///
    /// # Safety
    /// `block` must be a free block whose payload holds a link written by
    /// this engine.
    pub(crate) unsafe fn next_of(&self, block: *mut BlockHeader) -> *mut BlockHeader {
        unsafe { (self.geo.payload(block as usize) as *const *mut BlockHeader).read() }
    }

    /// Write the free-list link of `block`.
    ///
    /// # Safety
    /// `block` must be a free block owned by this engine.
    unsafe fn set_next(&mut self, block: *mut BlockHeader, next: *mut BlockHeader) {
        unsafe { (self.geo.payload(block as usize) as *mut *mut BlockHeader).write(next) }
    }

    /// Mirror the header size into the boundary-tag footer of `block`.
    ///
    /// # Safety
    /// `block` must be a free block owned by this engine.
    unsafe fn write_footer(&mut self, block: *mut BlockHeader) {
        let size = unsafe { (*block).size() };
        unsafe { (self.geo.footer(block as usize, size) as *mut usize).write(size) }
    }
}

/// Iterator over the free blocks of a [`FreeList`] in address order.
pub(crate) struct FreeBlocks<'l> {
    list: &'l FreeList,
    cursor: *mut BlockHeader,
}

impl Iterator for FreeBlocks<'_> {
    type Item = *mut BlockHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_null() {
            return None;
        }
        let current = self.cursor;
        // Safety: every block on the list is a valid free block whose
        // payload holds the link word.
        self.cursor = unsafe { self.list.next_of(current) };
        Some(current)
    }
}
