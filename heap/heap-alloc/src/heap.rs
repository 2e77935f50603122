//! # First-Fit Heap Façade
//!
//! The public face of the allocator: region validation at construction, the
//! allocate/free pair, free-list statistics, the diagnostic dump, and the
//! physical integrity sweep.
//!
//! The heap is single-threaded and non-reentrant. Nothing here locks;
//! concurrent callers must serialize externally. Out-of-memory is the only
//! recoverable failure and is reported in-band as a null payload pointer.
//! Everything else — dead canaries, double frees, invariant violations found
//! by the sweep — is a programming error and panics; the heap must not be
//! used afterwards.

use crate::block::{BlockHeader, Geometry};
use crate::free_list::FreeList;
use heap_region::{Region, align_down, is_aligned};
use log::info;

/// A region descriptor failed validation at heap construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("region size must be non-zero")]
    EmptyRegion,
    #[error("alignment {alignment} is not a power of two")]
    AlignmentNotPowerOfTwo { alignment: usize },
    #[error("alignment {alignment} is below the machine word size")]
    AlignmentBelowWord { alignment: usize },
    #[error("base {base:#x} is not a multiple of the alignment {alignment}")]
    MisalignedBase { base: usize, alignment: usize },
    #[error("region of {size} bytes cannot hold a single block of {required} bytes")]
    RegionTooSmall { size: usize, required: usize },
}

/// An invariant violation found by [`FirstFitHeap::verify`].
///
/// Any of these means the block metadata was overwritten or the heap was fed
/// a pointer it never produced. The condition is not recoverable;
/// [`FirstFitHeap::integrity_check`] turns it into a panic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorruptionError {
    #[error("dead canary in header at {header:#x}")]
    CanaryMismatch { header: usize },
    #[error("block at {header:#x} extends past the managed end {end:#x}")]
    BlockOverrun { header: usize, end: usize },
    #[error("illegal block size {size} at {header:#x}")]
    BadBlockSize { header: usize, size: usize },
    #[error("prev-free flag at {header:#x} disagrees with the predecessor")]
    PrevFreeMismatch { header: usize },
    #[error("free block at {header:#x} follows another free block")]
    UncoalescedNeighbours { header: usize },
    #[error("footer of free block at {header:#x} records {footer} instead of {size}")]
    FooterMismatch {
        header: usize,
        size: usize,
        footer: usize,
    },
    #[error("free block at {header:#x} is missing from its slot in the free list")]
    ListMismatch { header: usize },
    #[error("free list references {listed:#x} beyond the last free block")]
    DanglingListEntry { listed: usize },
}

/// First-fit, coalescing, boundary-tag heap over a caller-supplied region.
///
/// The region descriptor is only read; the memory it describes is mutated
/// exclusively by this heap for as long as the heap lives.
pub struct FirstFitHeap<'r, R: Region> {
    region: &'r R,
    list: FreeList,
}

impl<'r, R: Region> FirstFitHeap<'r, R> {
    /// Construct a heap over `region`, seeding one maximal free block.
    ///
    /// The managed span is `[base, base + size)` with the size rounded down
    /// to the alignment; a sub-alignment tail is never touched.
    ///
    /// # Errors
    /// [`RegionError`] when the descriptor violates its constraints: empty
    /// region, non-power-of-two or sub-word alignment, misaligned base, or a
    /// region too small for a single block.
    ///
    /// # Safety
    /// - `[region.base(), region.base() + region.size())` must be valid,
    ///   writable memory, exclusive to this heap and outliving it.
    /// - No other code may touch the span while the heap exists, except
    ///   through payloads handed out by [`Self::allocate`].
    pub unsafe fn new(region: &'r R) -> Result<Self, RegionError> {
        let alignment = region.alignment();
        if !alignment.is_power_of_two() {
            return Err(RegionError::AlignmentNotPowerOfTwo { alignment });
        }
        if alignment < size_of::<usize>() {
            return Err(RegionError::AlignmentBelowWord { alignment });
        }
        if region.size() == 0 {
            return Err(RegionError::EmptyRegion);
        }
        let base = region.base();
        if !is_aligned(base, alignment) {
            return Err(RegionError::MisalignedBase { base, alignment });
        }

        let geo = Geometry::new(alignment);
        let managed = align_down(region.size(), alignment);
        let required = geo.header_stride() + geo.min_payload();
        if managed < required {
            return Err(RegionError::RegionTooSmall {
                size: region.size(),
                required,
            });
        }

        // Safety: the caller vouches for the span per the contract above.
        let list = unsafe { FreeList::new(geo, base, base + managed) };
        Ok(Self { region, list })
    }

    /// The region this heap was built over.
    #[inline]
    #[must_use]
    pub const fn region(&self) -> &'r R {
        self.region
    }

    /// Payload alignment of every pointer returned by [`Self::allocate`].
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.list.geometry().alignment()
    }

    /// Allocate at least `size` bytes, first-fit.
    ///
    /// Returns a payload pointer aligned to [`Self::alignment`], or null
    /// when no free block is large enough. A zero-size request returns a
    /// valid minimum-sized block that can be passed to [`Self::free`].
    ///
    /// # Panics
    /// Panics when the first-fit walk encounters a free block with a dead
    /// canary — the heap is corrupt and must not be used further.
    #[must_use]
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        // Safety: the constructor established the managed span and the list
        // has maintained its invariants since.
        unsafe { self.list.allocate(size) }
    }

    /// Return `payload` to the heap, coalescing with free neighbours.
    ///
    /// Passing null is a no-op.
    ///
    /// # Safety
    /// `payload` must be null or a pointer obtained from this heap's
    /// [`Self::allocate`] that has not been freed since.
    ///
    /// # Panics
    /// Panics when the header canary is dead or the block is already free
    /// (double free) — the heap is corrupt and must not be used further.
    pub unsafe fn free(&mut self, payload: *mut u8) {
        if payload.is_null() {
            return;
        }
        let header = self.list.geometry().header_of_payload(payload as usize) as *mut BlockHeader;
        unsafe {
            assert!(
                (*header).canary_alive(),
                "heap corruption: dead canary at {:#x} while freeing {payload:p}",
                header as usize
            );
            assert!(!(*header).is_free(), "double free of {payload:p}");
            self.list.insert(header);
        }
    }

    /// Number of blocks on the free list.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.list.iter().count()
    }

    /// Sum of the payload capacities of all free blocks.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        // Safety: listed blocks are valid free headers.
        self.list.iter().map(|block| unsafe { (*block).size() }).sum()
    }

    /// Sweep the managed span and verify every block invariant.
    ///
    /// Walks physically from the first header to the managed end and checks
    /// canaries, size legality, boundary tags, prev-free bookkeeping, the
    /// coalescing guarantee, and — in lockstep — that the free list lists
    /// exactly the free blocks in ascending address order.
    ///
    /// # Errors
    /// The first [`CorruptionError`] encountered. Any error means the heap
    /// state is undefined.
    pub fn verify(&self) -> Result<(), CorruptionError> {
        let geo = self.list.geometry();
        let stride = geo.header_stride();
        let end = self.list.managed_end();

        let mut header = self.list.managed_start();
        let mut cursor = self.list.head();
        let mut prev_was_free = false;

        while header < end {
            let block = header as *const BlockHeader;
            // Safety: the walk starts at the managed base and advances by
            // whole blocks; corrupt sizes are rejected before being
            // followed.
            let (size, this_free, prev_free, canary_alive) = unsafe {
                (
                    (*block).size(),
                    (*block).is_free(),
                    (*block).prev_free(),
                    (*block).canary_alive(),
                )
            };

            if !canary_alive {
                return Err(CorruptionError::CanaryMismatch { header });
            }
            let span = end - header;
            if span < stride || size > span - stride {
                return Err(CorruptionError::BlockOverrun { header, end });
            }
            if size < geo.min_payload() || !is_aligned(size, geo.alignment()) {
                return Err(CorruptionError::BadBlockSize { header, size });
            }
            if prev_free != prev_was_free {
                return Err(CorruptionError::PrevFreeMismatch { header });
            }
            if this_free {
                if prev_was_free {
                    return Err(CorruptionError::UncoalescedNeighbours { header });
                }
                // Safety: size was validated, so the footer lies in-span.
                let footer = unsafe { (geo.footer(header, size) as *const usize).read() };
                if footer != size {
                    return Err(CorruptionError::FooterMismatch {
                        header,
                        size,
                        footer,
                    });
                }
                if cursor as usize != header {
                    return Err(CorruptionError::ListMismatch { header });
                }
                // Safety: cursor equals this free block, which carries a
                // valid link word.
                cursor = unsafe { self.list.next_of(cursor) };
            }

            prev_was_free = this_free;
            header = geo.following(header, size);
        }

        if !cursor.is_null() {
            return Err(CorruptionError::DanglingListEntry {
                listed: cursor as usize,
            });
        }
        Ok(())
    }

    /// Panic unless every invariant of the managed span holds.
    ///
    /// Diagnostic sweep for tests and debug builds; never called implicitly.
    ///
    /// # Panics
    /// Panics with the first [`CorruptionError`] found by [`Self::verify`].
    pub fn integrity_check(&self) {
        if let Err(error) = self.verify() {
            panic!("heap corruption: {error}");
        }
    }

    /// Log the free list through the `log` facade, one line per block.
    pub fn dump(&self) {
        let geo = self.list.geometry();
        info!(
            "heap [{:#x}, {:#x}), alignment {}: {} free block(s), {} free byte(s)",
            self.list.managed_start(),
            self.list.managed_end(),
            geo.alignment(),
            self.free_blocks(),
            self.free_bytes(),
        );
        for block in self.list.iter() {
            let header = block as usize;
            // Safety: listed blocks are valid free headers.
            let size = unsafe { (*block).size() };
            info!(
                "  [{header:#x}, {:#x}) {size} payload bytes",
                geo.following(header, size)
            );
        }
    }
}
