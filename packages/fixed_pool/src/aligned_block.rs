use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{Error, Result};

/// Alignment of every block acquired by the pool, matching the cache line size of the platforms
/// we care about. A block that starts on a cache line boundary keeps every slot whose offset is a
/// multiple of the cache line size on a boundary, too.
pub const CACHE_LINE_SIZE: usize = 64;

/// One contiguous, cache-line-aligned region of raw memory obtained from the global allocator.
///
/// The memory is uninitialized when acquired and the block never interprets its contents.
/// The memory is released when the block is dropped, so a block cannot be released twice.
#[derive(Debug)]
pub(crate) struct AlignedBlock {
    base: NonNull<u8>,
    layout: Layout,
}

impl AlignedBlock {
    /// Acquires a block of `size` bytes aligned to [`CACHE_LINE_SIZE`].
    ///
    /// Allocation failure is reported as an error instead of aborting the process.
    pub(crate) fn acquire(size: NonZero<usize>) -> Result<Self> {
        let layout = Layout::from_size_align(size.get(), CACHE_LINE_SIZE).map_err(|_| {
            Error::InvalidLayout {
                size: size.get(),
                alignment: CACHE_LINE_SIZE,
            }
        })?;

        // SAFETY: The layout has a non-zero size, guaranteed by the NonZero parameter.
        let base = NonNull::new(unsafe { alloc(layout) }).ok_or(Error::BlockAcquisition {
            size: size.get(),
            alignment: CACHE_LINE_SIZE,
        })?;

        Ok(Self { base, layout })
    }

    /// Address of the first byte of the block.
    #[must_use]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Size of the block in bytes.
    #[must_use]
    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    /// Whether `ptr` points to a byte inside the block.
    #[must_use]
    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        let base = self.base.as_ptr().addr();
        let addr = ptr.as_ptr().addr();

        // Cannot overflow because the block lies within the address space.
        addr >= base && addr < base.wrapping_add(self.size())
    }
}

impl Drop for AlignedBlock {
    fn drop(&mut self) {
        // SAFETY: The memory was allocated in `acquire()` with this exact layout and is released
        // only here, once.
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn acquired_block_is_cache_line_aligned() {
        for size in [1, 4, 63, 64, 65, 4096] {
            let block = AlignedBlock::acquire(NonZero::new(size).unwrap()).unwrap();

            assert_eq!(block.base().as_ptr().addr() % CACHE_LINE_SIZE, 0);
            assert_eq!(block.size(), size);
        }
    }

    #[test]
    fn contains_covers_exactly_the_block() {
        let block = AlignedBlock::acquire(nz!(128)).unwrap();
        let base = block.base();

        assert!(block.contains(base));

        // SAFETY: Offsets stay within the block.
        let last = unsafe { base.add(127) };
        assert!(block.contains(last));

        // SAFETY: One past the end is a valid pointer to compute.
        let past_end = unsafe { base.add(128) };
        assert!(!block.contains(past_end));
    }

    #[test]
    fn block_memory_is_writable_end_to_end() {
        let block = AlignedBlock::acquire(nz!(256)).unwrap();

        // SAFETY: The block is 256 bytes long and exclusively ours.
        unsafe {
            block.base().as_ptr().write_bytes(0xAB, 256);
            assert_eq!(block.base().add(255).read(), 0xAB);
        }
    }

    #[test]
    fn oversized_layout_is_error() {
        let result = AlignedBlock::acquire(NonZero::new(usize::MAX).unwrap());

        assert!(matches!(
            result,
            Err(Error::InvalidLayout {
                size: usize::MAX,
                alignment: CACHE_LINE_SIZE
            })
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri reports exhaustion differently from the real allocator")]
    fn allocator_refusal_is_error() {
        // Largest size that still forms a valid layout; no real allocator can satisfy it.
        let size = isize::MAX.unsigned_abs() - (CACHE_LINE_SIZE - 1);

        let result = AlignedBlock::acquire(NonZero::new(size).unwrap());

        assert!(matches!(result, Err(Error::BlockAcquisition { .. })));
    }
}
