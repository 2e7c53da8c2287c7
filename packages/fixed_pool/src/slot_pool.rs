use std::any::type_name;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use tracing::{debug, warn};

use crate::{AlignedBlock, CACHE_LINE_SIZE, Error, PoolStats, Result, SlotPoolBuilder};

/// The value stored in the leading bytes of a free slot: the index of the next free slot, or
/// `max_entries` if this is the last free slot.
type Link = u32;

const LINK_SIZE: usize = size_of::<Link>();

const _: () = assert!(
    size_of::<usize>() >= LINK_SIZE,
    "free list links must be convertible to usize"
);

/// A fixed-capacity pool of uniformly sized slots carved out of one cache-line-aligned block.
///
/// The pool hands out raw, uninitialized slots in O(1) and takes them back in O(1). Free slots
/// form a stack (also known as an intrusive freelist): each free slot stores the index of the
/// next free slot in its own leading bytes, so the pool needs no bookkeeping memory beyond the
/// block itself. The most recently freed slot is always the next one handed out.
///
/// On a fresh pool, slots are handed out in ascending order starting from the base of the block.
///
/// # Capacity
///
/// The pool never grows. Once all `max_entries` slots are allocated, [`allocate()`][1] returns
/// `None` until a slot is returned via [`deallocate()`][2].
///
/// # Invalid pools
///
/// If the memory block cannot be acquired, [`new()`][3] still returns a pool but that pool is
/// permanently exhausted: [`is_valid()`][4] returns `false` and every allocation returns `None`.
/// Use [`try_new()`][5] to receive the error instead.
///
/// # Dropping
///
/// Every allocated slot must be deallocated before the pool is dropped. Dropping a pool that
/// still has allocated slots panics.
///
/// # Examples
///
/// ```
/// use fixed_pool::SlotPool;
/// use new_zealand::nz;
///
/// let mut pool = SlotPool::new(nz!(4), nz!(64));
///
/// let first = pool.allocate().unwrap();
/// let second = pool.allocate().unwrap();
/// assert_eq!(pool.index_of(first), 0);
/// assert_eq!(pool.index_of(second), 1);
///
/// // SAFETY: Both slots came from this pool and are not used afterwards.
/// unsafe {
///     pool.deallocate(first);
///     pool.deallocate(second);
/// }
/// ```
///
/// [1]: Self::allocate
/// [2]: Self::deallocate
/// [3]: Self::new
/// [4]: Self::is_valid
/// [5]: Self::try_new
#[derive(Debug)]
pub struct SlotPool {
    /// Size of each slot in bytes. Always at least `LINK_SIZE`.
    entry_size: NonZero<usize>,

    /// Number of slots in the block. Also the sentinel link value terminating the free list.
    max_entries: NonZero<usize>,

    /// Number of slots currently on the free list.
    free_count: usize,

    /// Top of the free slot stack. `None` if and only if `free_count` is zero.
    free_head: Option<NonNull<u8>>,

    /// The memory backing all slots. `None` if the block could not be acquired, in which case
    /// the pool is permanently exhausted.
    block: Option<AlignedBlock>,
}

impl SlotPool {
    /// Creates a pool of `max_entries` slots of `entry_size` bytes each.
    ///
    /// If the memory block cannot be acquired, the returned pool is invalid and permanently
    /// exhausted. Check [`is_valid()`][1] or use [`try_new()`][2] if you need to know.
    ///
    /// # Panics
    ///
    /// Panics if `entry_size` is smaller than 4 bytes (the size of a free list link) or if
    /// `max_entries` exceeds `u32::MAX`.
    ///
    /// [1]: Self::is_valid
    /// [2]: Self::try_new
    #[must_use]
    pub fn new(entry_size: NonZero<usize>, max_entries: NonZero<usize>) -> Self {
        Self::try_new(entry_size, max_entries).unwrap_or_else(|error| {
            warn!(
                %error,
                entry_size = entry_size.get(),
                max_entries = max_entries.get(),
                "slot pool has no memory block and will report itself as exhausted"
            );

            Self {
                entry_size,
                max_entries,
                free_count: 0,
                free_head: None,
                block: None,
            }
        })
    }

    /// Creates a pool of `max_entries` slots of `entry_size` bytes each, returning an error if
    /// the memory block cannot be acquired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the total pool size does not fit in `usize`,
    /// [`Error::InvalidLayout`] if the total size is too large to describe as an allocation and
    /// [`Error::BlockAcquisition`] if the allocator refuses the request.
    ///
    /// # Panics
    ///
    /// Panics if `entry_size` is smaller than 4 bytes (the size of a free list link) or if
    /// `max_entries` exceeds `u32::MAX`.
    pub fn try_new(entry_size: NonZero<usize>, max_entries: NonZero<usize>) -> Result<Self> {
        assert!(
            entry_size.get() >= LINK_SIZE,
            "entry size {entry_size} is too small to hold a free list link of {LINK_SIZE} bytes"
        );
        assert!(
            Link::try_from(max_entries.get()).is_ok(),
            "max_entries {max_entries} exceeds the free list link range of {}",
            type_name::<Link>()
        );

        let block_size = entry_size
            .checked_mul(max_entries)
            .ok_or(Error::CapacityOverflow {
                entry_size: entry_size.get(),
                max_entries: max_entries.get(),
            })?;

        let block = AlignedBlock::acquire(block_size)?;

        debug!(
            entry_size = entry_size.get(),
            max_entries = max_entries.get(),
            block_size = block.size(),
            "slot pool acquired its memory block"
        );

        let pool = Self {
            entry_size,
            max_entries,
            free_count: max_entries.get(),
            free_head: Some(block.base()),
            block: Some(block),
        };

        // Chain every slot to its successor. The last slot links to `max_entries`,
        // which terminates the free list.
        for index in 0..max_entries.get() {
            // Cannot overflow because max_entries fits in a Link, which is narrower than usize.
            let next_index = index.wrapping_add(1);

            // SAFETY: The slot is inside our block and no caller has seen it yet.
            unsafe {
                write_link(pool.slot_ptr(index), next_index);
            }
        }

        #[cfg(debug_assertions)]
        pool.integrity_check();

        Ok(pool)
    }

    /// Starts building a new [`SlotPool`].
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::SlotPool;
    /// use new_zealand::nz;
    ///
    /// let pool = SlotPool::builder()
    ///     .layout_of::<u64>()
    ///     .max_entries(nz!(128))
    ///     .build();
    ///
    /// assert_eq!(pool.entry_size(), 8);
    /// assert_eq!(pool.capacity(), 128);
    /// ```
    pub fn builder() -> SlotPoolBuilder {
        SlotPoolBuilder::new()
    }

    /// Size of each slot in bytes.
    #[must_use]
    pub fn entry_size(&self) -> usize {
        self.entry_size.get()
    }

    /// The number of slots the pool was configured with.
    ///
    /// An invalid pool reports its configured capacity even though it can hand out nothing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_entries.get()
    }

    /// The number of slots currently allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.block.is_none() {
            return 0;
        }

        // Cannot underflow because free_count never exceeds max_entries.
        self.max_entries.get().wrapping_sub(self.free_count)
    }

    /// The number of slots available for allocation.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Whether no slots are currently allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the next [`allocate()`][1] will return `None`.
    ///
    /// [1]: Self::allocate
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.free_count == 0
    }

    /// Whether the pool owns a memory block. An invalid pool is permanently exhausted.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.block.is_some()
    }

    /// Whether `ptr` points into the memory block of this pool.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.block.as_ref().is_some_and(|block| block.contains(ptr))
    }

    /// Returns a snapshot of the occupancy of the pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let block_count = usize::from(self.block.is_some());

        PoolStats::new(block_count, self.len())
    }

    /// Takes a slot off the free list and returns its address, or `None` if no slot is free.
    ///
    /// The returned memory is `entry_size` bytes long and uninitialized from the caller's point
    /// of view. It remains valid until it is passed to [`deallocate()`][1] or the pool is dropped.
    ///
    /// [1]: Self::deallocate
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        let slot = match self.free_count {
            0 => return None,
            1 => {
                // The last free slot holds the sentinel link, which we never follow.
                self.free_count = 0;
                self.free_head
                    .take()
                    .expect("free_head is always set when free_count is non-zero")
            }
            _ => {
                let slot = self
                    .free_head
                    .expect("free_head is always set when free_count is non-zero");

                // SAFETY: The slot is on the free list, so its leading bytes hold a link that
                // we wrote when the slot became free.
                let next_index = unsafe { read_link(slot) };

                assert!(
                    next_index < self.max_entries.get(),
                    "free list is corrupted: slot {} links to index {next_index} in a pool of {} entries",
                    self.index_of(slot),
                    self.max_entries
                );

                self.free_head = Some(self.slot_ptr(next_index));

                // Cannot underflow because we are in the free_count > 1 branch.
                self.free_count = self.free_count.wrapping_sub(1);

                slot
            }
        };

        #[cfg(debug_assertions)]
        self.head_check();

        Some(slot)
    }

    /// Returns a slot to the free list. The slot will be the next one handed out by
    /// [`allocate()`][1].
    ///
    /// Only the leading 4 bytes of the slot are overwritten. Any value that lived in the slot is
    /// not dropped - that is the responsibility of the caller.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point to the start of a slot in this pool, or if every slot of
    /// the pool is already free.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by [`allocate()`][1] on this pool and
    /// has not been deallocated since. The caller must not access the slot through `ptr` after
    /// this call.
    ///
    /// [1]: Self::allocate
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        let offset = self.offset_of(ptr);

        assert!(
            offset % self.entry_size == 0,
            "pointer {ptr:?} is at offset {offset} which is not on a slot boundary of a pool with entry size {}",
            self.entry_size
        );

        assert!(
            self.free_count < self.max_entries.get(),
            "deallocated pointer {ptr:?} into a pool of {} entries where every slot is already free",
            self.max_entries
        );

        let next_index = match self.free_head {
            Some(head) => self.index_of(head),
            None => self.max_entries.get(),
        };

        // Derive the slot pointer from the block instead of trusting the caller's pointer.
        let slot = self.slot_ptr(self.index_of(ptr));

        // SAFETY: The slot is inside our block and the caller guarantees it is no longer in use.
        unsafe {
            write_link(slot, next_index);
        }

        self.free_head = Some(slot);

        // Cannot overflow because we asserted above that free_count < max_entries.
        self.free_count = self.free_count.wrapping_add(1);

        #[cfg(debug_assertions)]
        self.head_check();
    }

    /// Returns the address of the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds or the pool is invalid.
    #[must_use]
    pub fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.max_entries.get(),
            "slot {index} index out of bounds in pool of {} entries",
            self.max_entries
        );

        // Cannot overflow because the offset lies within the block, whose size we calculated
        // with checked arithmetic in the constructor.
        let offset = index.wrapping_mul(self.entry_size.get());

        // SAFETY: Guarded by the bounds check above, so the offset is within the block.
        unsafe { self.block().base().add(offset) }
    }

    /// Returns the index of the slot that contains `ptr`.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point into this pool's memory block.
    #[must_use]
    #[expect(
        clippy::integer_division,
        reason = "rounding down to the containing slot is exactly what we want"
    )]
    pub fn index_of(&self, ptr: NonNull<u8>) -> usize {
        self.offset_of(ptr) / self.entry_size
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        let block = self.block();

        assert!(
            block.contains(ptr),
            "pointer {ptr:?} does not belong to the pool block at {:?} of {} bytes",
            block.base(),
            block.size()
        );

        // Cannot underflow because the block contains the pointer.
        ptr.as_ptr().addr().wrapping_sub(block.base().as_ptr().addr())
    }

    fn block(&self) -> &AlignedBlock {
        self.block
            .as_ref()
            .expect("slot addresses are only available in a valid pool")
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Verifies the bookkeeping fields and the link stored in the head of the free list.
    ///
    /// Runs after every allocate and deallocate, so it must stay O(1) and must not allocate.
    fn head_check(&self) {
        let max_entries = self.max_entries.get();

        assert!(
            self.free_count <= max_entries,
            "free_count {} exceeds max_entries {max_entries}",
            self.free_count
        );
        assert_eq!(
            self.free_head.is_none(),
            self.free_count == 0,
            "free_head presence does not match free_count {}",
            self.free_count
        );

        let Some(head) = self.free_head else {
            return;
        };

        // SAFETY: The head is on the free list, so its leading bytes hold a link.
        let next_index = unsafe { read_link(head) };

        if self.free_count == 1 {
            assert_eq!(
                next_index,
                max_entries,
                "last free slot {} does not hold the sentinel link",
                self.index_of(head)
            );
        } else {
            assert!(
                next_index < max_entries,
                "free slot {} links to out-of-bounds index {next_index}",
                self.index_of(head)
            );
        }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Walks the free list and verifies that it is a chain of `free_count` distinct in-range
    /// slots terminated by the sentinel link.
    pub(crate) fn integrity_check(&self) {
        let max_entries = self.max_entries.get();

        if self.block.is_none() {
            assert!(
                self.free_count == 0 && self.free_head.is_none(),
                "invalid pool must have an empty free list"
            );
            return;
        }

        assert!(
            self.free_count <= max_entries,
            "free_count {} exceeds max_entries {max_entries}",
            self.free_count
        );
        assert_eq!(
            self.free_head.is_none(),
            self.free_count == 0,
            "free_head presence does not match free_count {}",
            self.free_count
        );

        let mut visited = vec![false; max_entries];
        let mut current = self.free_head;

        for position in 0..self.free_count {
            let slot = current.expect("free list ended before free_count slots were visited");
            let index = self.index_of(slot);

            let seen = visited
                .get_mut(index)
                .expect("index_of only returns indexes inside the block");
            assert!(!*seen, "slot {index} appears twice in the free list");
            *seen = true;

            // SAFETY: The slot is on the free list, so its leading bytes hold a link.
            let next_index = unsafe { read_link(slot) };

            // Cannot overflow because position < free_count <= max_entries.
            let is_last = position.wrapping_add(1) == self.free_count;

            if is_last {
                assert_eq!(
                    next_index, max_entries,
                    "last free slot {index} does not hold the sentinel link"
                );
                current = None;
            } else {
                assert!(
                    next_index < max_entries,
                    "free slot {index} links to out-of-bounds index {next_index}"
                );
                current = Some(self.slot_ptr(next_index));
            }
        }
    }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !thread::panicking() {
            self.integrity_check();
        }

        let allocation_count = self.len();

        if let Some(block) = self.block.take() {
            debug!(
                entry_size = self.entry_size.get(),
                max_entries = self.max_entries.get(),
                allocation_count,
                "slot pool releasing its memory block"
            );

            drop(block);
        }

        // We do this check at the end so we clean up the memory first.
        //
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() {
            assert!(
                allocation_count == 0,
                "dropped a SlotPool with {allocation_count} slots still allocated - every slot must be deallocated before the pool is dropped"
            );
        }
    }
}

// SAFETY: The raw pointers all point into the block owned by the pool and are only dereferenced
// through `&mut self`. Nothing is tied to the thread that created the pool.
unsafe impl Send for SlotPool {}

/// Returns the entry size needed to store one `T` in a slot.
///
/// # Panics
///
/// Panics if the alignment of `T` exceeds the alignment of the pool block.
#[must_use]
pub(crate) fn entry_size_for<T>() -> NonZero<usize> {
    assert!(
        align_of::<T>() <= CACHE_LINE_SIZE,
        "{} requires alignment of {} bytes which exceeds the pool block alignment of {CACHE_LINE_SIZE} bytes",
        type_name::<T>(),
        align_of::<T>()
    );

    // The size of T is always a multiple of its alignment, so slots stay aligned for T.
    // Types smaller than a link only have alignments that divide the link size.
    NonZero::new(size_of::<T>().max(LINK_SIZE)).expect("LINK_SIZE is non-zero")
}

/// # Safety
///
/// `slot` must point to at least `LINK_SIZE` bytes of memory valid for reads, holding a link
/// previously written by `write_link()`.
unsafe fn read_link(slot: NonNull<u8>) -> usize {
    // SAFETY: Forwarding the guarantees of the caller. The slot may not be aligned for a Link.
    let link = unsafe { slot.as_ptr().cast::<Link>().read_unaligned() };

    usize::try_from(link).expect("guarded by the usize width assertion at the top of the module")
}

/// # Safety
///
/// `slot` must point to at least `LINK_SIZE` bytes of memory valid for writes.
unsafe fn write_link(slot: NonNull<u8>, next_index: usize) {
    let link = Link::try_from(next_index).expect("guarded by max_entries range check in the ctor");

    // SAFETY: Forwarding the guarantees of the caller. The slot may not be aligned for a Link.
    unsafe {
        slot.as_ptr().cast::<Link>().write_unaligned(link);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::sync::{Arc, Mutex};

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SlotPool: Send);
    assert_not_impl_any!(SlotPool: Sync);

    fn drain(pool: &mut SlotPool, slots: Vec<NonNull<u8>>) {
        for slot in slots {
            unsafe { pool.deallocate(slot) };
        }
    }

    #[test]
    fn smoke_test() {
        let mut pool = SlotPool::new(nz!(4), nz!(3));

        assert!(pool.is_valid());
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.free_count(), 3);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        assert!(pool.is_full());
        assert_eq!(pool.len(), 3);
        assert!(pool.allocate().is_none());

        unsafe { pool.deallocate(b) };
        assert_eq!(pool.len(), 2);

        let d = pool.allocate().unwrap();
        assert_eq!(d, b);

        drain(&mut pool, vec![a, c, d]);
        assert!(pool.is_empty());
    }

    #[test]
    fn fresh_pool_allocates_in_ascending_order() {
        let mut pool = SlotPool::new(nz!(12), nz!(16));

        let slots = (0..16)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        for (expected_index, slot) in slots.iter().enumerate() {
            assert_eq!(pool.index_of(*slot), expected_index);
            assert_eq!(pool.slot_ptr(expected_index), *slot);
        }

        drain(&mut pool, slots);
    }

    #[test]
    fn first_slot_is_cache_line_aligned() {
        let mut pool = SlotPool::new(nz!(4), nz!(64));

        let slot = pool.allocate().unwrap();
        assert_eq!(slot.as_ptr().addr() % CACHE_LINE_SIZE, 0);

        drain(&mut pool, vec![slot]);
    }

    #[test]
    fn consecutive_slots_are_entry_size_apart() {
        let mut pool = SlotPool::new(nz!(4), nz!(64));

        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();

        assert_eq!(
            second.as_ptr().addr(),
            first.as_ptr().addr() + pool.entry_size()
        );

        unsafe {
            second.cast::<u32>().write(0x5566_7788);
            first.cast::<u32>().write(0x1122_3344);

            assert_eq!(first.cast::<u32>().read(), 0x1122_3344);
            assert_eq!(second.cast::<u32>().read(), 0x5566_7788);
        }

        drain(&mut pool, vec![first, second]);
    }

    #[test]
    fn freed_slot_is_reused_first() {
        let mut pool = SlotPool::new(nz!(8), nz!(4));

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe { pool.deallocate(a) };

        let again = pool.allocate().unwrap();
        assert_eq!(again, a);

        drain(&mut pool, vec![again, b]);
    }

    #[test]
    fn reuse_is_last_in_first_out() {
        let mut pool = SlotPool::new(nz!(8), nz!(8));

        let slots = (0..8)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        unsafe {
            pool.deallocate(slots[2]);
            pool.deallocate(slots[5]);
            pool.deallocate(slots[7]);
        }

        assert_eq!(pool.allocate().unwrap(), slots[7]);
        assert_eq!(pool.allocate().unwrap(), slots[5]);
        assert_eq!(pool.allocate().unwrap(), slots[2]);
        assert!(pool.allocate().is_none());

        drain(&mut pool, slots);
    }

    #[test]
    fn content_survives_unrelated_churn() {
        let mut pool = SlotPool::new(nz!(16), nz!(8));

        let keeper = pool.allocate().unwrap();
        unsafe { keeper.cast::<[u64; 2]>().write_unaligned([0xDEAD_BEEF, 0xCAFE_BABE]) };

        for _ in 0..100 {
            let a = pool.allocate().unwrap();
            let b = pool.allocate().unwrap();
            unsafe {
                a.as_ptr().write_bytes(0xFF, 16);
                b.as_ptr().write_bytes(0xEE, 16);
                pool.deallocate(a);
                pool.deallocate(b);
            }
        }

        let value = unsafe { keeper.cast::<[u64; 2]>().read_unaligned() };
        assert_eq!(value, [0xDEAD_BEEF, 0xCAFE_BABE]);

        drain(&mut pool, vec![keeper]);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn full_walk_holds_after_churn() {
        let mut pool = SlotPool::new(nz!(4), nz!(16));
        let mut live = Vec::new();

        for round in 0..5 {
            for _ in 0..=round {
                live.push(pool.allocate().unwrap());
            }

            pool.integrity_check();

            // Free every other slot, newest first, so the free list interleaves old and new slots.
            let mut keep = true;
            live.retain(|&slot| {
                keep = !keep;
                if !keep {
                    unsafe { pool.deallocate(slot) };
                }
                keep
            });

            pool.integrity_check();
        }

        drain(&mut pool, live);
        pool.integrity_check();
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "links to out-of-bounds index 99")]
    fn corrupted_link_is_caught_when_it_reaches_the_head() {
        let mut pool = SlotPool::new(nz!(4), nz!(4));

        // Slot 1 is free and next in line after slot 0.
        unsafe { write_link(pool.slot_ptr(1), 99) };

        _ = pool.allocate();
    }

    #[test]
    fn deallocate_only_overwrites_link_prefix() {
        let mut pool = SlotPool::new(nz!(8), nz!(2));

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe {
            a.as_ptr().write_bytes(0xAA, 8);
            pool.deallocate(a);

            // Bytes past the link are left alone.
            for offset in LINK_SIZE..8 {
                assert_eq!(a.as_ptr().add(offset).read(), 0xAA);
            }
        }

        drain(&mut pool, vec![b]);
    }

    #[test]
    fn unaligned_entry_size_works() {
        // 5-byte slots put most links at addresses that are not 4-byte aligned.
        let mut pool = SlotPool::new(nz!(5), nz!(10));

        let slots = (0..10)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        for (index, slot) in slots.iter().enumerate() {
            unsafe { slot.as_ptr().write_bytes(u8::try_from(index).unwrap(), 5) };
        }

        for (index, slot) in slots.iter().enumerate() {
            for offset in 0..5 {
                assert_eq!(
                    unsafe { slot.as_ptr().add(offset).read() },
                    u8::try_from(index).unwrap()
                );
            }
        }

        // Free in an order that makes links point both forward and backward.
        unsafe {
            pool.deallocate(slots[3]);
            pool.deallocate(slots[9]);
            pool.deallocate(slots[0]);
        }

        assert_eq!(pool.allocate().unwrap(), slots[0]);
        assert_eq!(pool.allocate().unwrap(), slots[9]);
        assert_eq!(pool.allocate().unwrap(), slots[3]);

        drain(&mut pool, slots);
    }

    #[test]
    fn single_entry_pool() {
        let mut pool = SlotPool::new(nz!(4), nz!(1));

        for _ in 0..3 {
            let slot = pool.allocate().unwrap();
            assert!(pool.allocate().is_none());
            assert_eq!(pool.stats().allocation_count(), 1);

            unsafe { pool.deallocate(slot) };
            assert_eq!(pool.stats().allocation_count(), 0);
        }
    }

    #[test]
    fn stats_track_allocations() {
        let mut pool = SlotPool::new(nz!(4), nz!(64));
        let mut slots = Vec::new();

        for expected in 0..=64 {
            let stats = pool.stats();
            assert_eq!(stats.block_count(), 1);
            assert_eq!(stats.allocation_count(), expected);

            if let Some(slot) = pool.allocate() {
                slots.push(slot);
            }
        }

        assert_eq!(slots.len(), 64);
        assert_eq!(pool.stats().allocation_count(), 64);

        drain(&mut pool, slots);
        assert_eq!(pool.stats(), PoolStats::new(1, 0));
    }

    #[test]
    fn index_translation_round_trips() {
        let pool = SlotPool::new(nz!(24), nz!(10));

        for index in 0..10 {
            let slot = pool.slot_ptr(index);
            assert_eq!(pool.index_of(slot), index);
            assert_eq!(
                slot.as_ptr().addr() - pool.slot_ptr(0).as_ptr().addr(),
                index * 24
            );

            // Any byte inside the slot belongs to the same slot.
            let inner = unsafe { slot.add(23) };
            assert_eq!(pool.index_of(inner), index);
        }
    }

    #[test]
    fn contains_only_own_block() {
        let pool = SlotPool::new(nz!(8), nz!(4));
        let other = SlotPool::new(nz!(8), nz!(4));

        assert!(pool.contains(pool.slot_ptr(3)));
        assert!(!pool.contains(other.slot_ptr(0)));
    }

    #[test]
    fn overflowing_size_yields_invalid_pool() {
        let mut pool = SlotPool::new(NonZero::new(usize::MAX / 2).unwrap(), nz!(4));

        assert!(!pool.is_valid());
        assert!(pool.is_full());
        assert!(pool.is_empty());
        assert!(pool.allocate().is_none());
        assert!(pool.allocate().is_none());
        assert_eq!(pool.stats(), PoolStats::new(0, 0));
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn try_new_reports_overflow() {
        let result = SlotPool::try_new(NonZero::new(usize::MAX / 2).unwrap(), nz!(4));

        assert!(matches!(
            result,
            Err(Error::CapacityOverflow { max_entries: 4, .. })
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri reports exhaustion differently from the real allocator")]
    fn refused_block_yields_invalid_pool() {
        let entry_size = isize::MAX.unsigned_abs() - (CACHE_LINE_SIZE - 1);
        let mut pool = SlotPool::new(NonZero::new(entry_size).unwrap(), nz!(1));

        assert!(!pool.is_valid());
        assert!(pool.allocate().is_none());
        assert!(!pool.contains(NonNull::dangling()));
    }

    #[test]
    fn moves_between_threads() {
        let pool = Arc::new(Mutex::new(SlotPool::new(nz!(8), nz!(2))));

        let slot_index = {
            let mut pool = pool.lock().unwrap();
            let slot = pool.allocate().unwrap();
            pool.index_of(slot)
        };

        let pool_clone = Arc::clone(&pool);
        thread::spawn(move || {
            let mut pool = pool_clone.lock().unwrap();
            let slot = pool.slot_ptr(slot_index);
            unsafe { pool.deallocate(slot) };
        })
        .join()
        .unwrap();

        assert!(pool.lock().unwrap().is_empty());
    }

    #[test]
    fn entry_size_for_small_types_is_link_size() {
        assert_eq!(entry_size_for::<u8>().get(), LINK_SIZE);
        assert_eq!(entry_size_for::<u16>().get(), LINK_SIZE);
        assert_eq!(entry_size_for::<()>().get(), LINK_SIZE);
        assert_eq!(entry_size_for::<u32>().get(), 4);
        assert_eq!(entry_size_for::<[u64; 3]>().get(), 24);
    }

    #[test]
    #[should_panic]
    fn entry_size_for_over_aligned_type_panics() {
        #[repr(align(128))]
        struct OverAligned;

        _ = entry_size_for::<OverAligned>();
    }

    #[test]
    #[should_panic]
    fn entry_size_smaller_than_link_panics() {
        drop(SlotPool::new(nz!(3), nz!(4)));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    #[should_panic]
    fn max_entries_beyond_link_range_panics() {
        let max_entries = NonZero::new(usize::try_from(u64::from(u32::MAX) + 1).unwrap()).unwrap();

        drop(SlotPool::new(nz!(4), max_entries));
    }

    #[test]
    #[should_panic]
    fn deallocate_foreign_pointer_panics() {
        let mut pool = SlotPool::new(nz!(8), nz!(4));
        let mut foreign = 0_u64;

        unsafe { pool.deallocate(NonNull::from(&mut foreign).cast()) };
    }

    #[test]
    #[should_panic]
    fn deallocate_misaligned_pointer_panics() {
        let mut pool = SlotPool::new(nz!(8), nz!(4));
        let slot = pool.allocate().unwrap();

        unsafe { pool.deallocate(slot.add(1)) };
    }

    #[test]
    #[should_panic]
    fn deallocate_into_fully_free_pool_panics() {
        let mut pool = SlotPool::new(nz!(8), nz!(2));
        let slot = pool.slot_ptr(0);

        unsafe { pool.deallocate(slot) };
    }

    #[test]
    #[should_panic]
    fn slot_ptr_out_of_bounds_panics() {
        let pool = SlotPool::new(nz!(8), nz!(4));

        _ = pool.slot_ptr(4);
    }

    #[test]
    #[should_panic]
    fn drop_with_allocated_slots_panics() {
        let mut pool = SlotPool::new(nz!(8), nz!(4));

        _ = pool.allocate();
    }
}
