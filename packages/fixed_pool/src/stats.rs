/// A point-in-time snapshot of pool occupancy, as returned by [`SlotPool::stats()`][1].
///
/// # Examples
///
/// ```
/// use fixed_pool::SlotPool;
/// use new_zealand::nz;
///
/// let mut pool = SlotPool::new(nz!(16), nz!(8));
/// let slot = pool.allocate().unwrap();
///
/// let stats = pool.stats();
/// assert_eq!(stats.block_count(), 1);
/// assert_eq!(stats.allocation_count(), 1);
///
/// // SAFETY: The slot was allocated from this pool and is not used afterwards.
/// unsafe { pool.deallocate(slot) };
/// ```
///
/// [1]: crate::SlotPool::stats
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    block_count: usize,
    allocation_count: usize,
}

impl PoolStats {
    #[must_use]
    pub(crate) fn new(block_count: usize, allocation_count: usize) -> Self {
        Self {
            block_count,
            allocation_count,
        }
    }

    /// Number of memory blocks backing the pool.
    ///
    /// This is always 1 for a usable pool and 0 for a pool whose block could not be acquired.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of slots currently handed out to callers.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }
}
