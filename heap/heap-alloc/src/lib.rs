//! # First-Fit Boundary-Tag Heap
//!
//! A first-fit, coalescing heap allocator for a single contiguous,
//! caller-supplied memory region. Designed for freestanding environments —
//! bootloaders, microkernels, embedded targets — where no underlying
//! allocator exists.
//!
//! ## Architecture Overview
//!
//! Three layers, leaves first:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               FirstFitHeap (heap)                   │
//! │    • Region validation, allocate/free façade        │
//! │    • Integrity sweep, statistics, dump              │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Free-list engine (free_list)           │
//! │    • Address-ordered singly linked list             │
//! │    • First-fit search, block splitting              │
//! │    • Front/back coalescing on insert                │
//! └─────────────────┬───────────────────────────────────┘
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Block layout & boundary tags (block)       │
//! │    • Packed size word: 62-bit size + two flags      │
//! │    • Canary, footer mirroring, header stride        │
//! │    • Pure address arithmetic, no memory access      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design outline
//!
//! - **Storage**: the caller supplies a [`Region`] — base, size, payload
//!   alignment. The heap seeds one maximal free block at its base and never
//!   touches memory outside the region.
//! - **Headers**: every block starts with a header packing the payload size
//!   and two flags (`this_free`, `prev_free`) into one word, followed by a
//!   canary word for corruption detection.
//! - **Boundary tags**: only free blocks carry a footer mirroring their
//!   size. Together with `prev_free` this gives O(1) physical-neighbour
//!   navigation without per-used-block overhead.
//! - **Free list**: singly linked through the payloads of free blocks,
//!   strictly ascending by address, so coalescing is a neighbour check
//!   rather than a search.
//!
//! ## Concurrency
//!
//! The heap is **single-threaded and non-reentrant**; no operation blocks or
//! suspends. Callers that share a heap across contexts must serialize
//! externally.
//!
//! ## Error model
//!
//! Out-of-memory is recoverable and reported in-band as a null payload
//! pointer. Metadata corruption — dead canary, double free, any invariant
//! violation found by [`FirstFitHeap::verify`] — is a programming error and
//! panics; the heap state is undefined afterwards.
//!
//! ## Usage
//!
//! ```rust
//! use heap_alloc::{FirstFitHeap, FixedRegion};
//!
//! #[repr(align(16))]
//! struct Backing([u8; 4096]);
//! let mut backing = Backing([0; 4096]);
//!
//! let base = (&raw mut backing.0).cast::<u8>() as usize;
//! let region = FixedRegion::new(base, 4096, 16);
//!
//! let mut heap = unsafe { FirstFitHeap::new(&region) }.expect("well-formed region");
//! let initial = heap.free_bytes();
//!
//! let p = heap.allocate(100);
//! assert!(!p.is_null());
//! assert_eq!(p as usize % heap.alignment(), 0);
//!
//! unsafe { heap.free(p) };
//! assert_eq!(heap.free_blocks(), 1);
//! assert_eq!(heap.free_bytes(), initial);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod block;
mod free_list;
mod heap;

pub use heap::{CorruptionError, FirstFitHeap, RegionError};
pub use heap_region::{FixedRegion, Region};
