use std::num::NonZero;

use crate::{Result, SlotPool, entry_size_for};

/// Builder for creating an instance of [`SlotPool`].
///
/// Both the entry size and the number of entries must be specified before building.
///
/// # Examples
///
/// ```
/// use fixed_pool::SlotPool;
/// use new_zealand::nz;
///
/// let pool = SlotPool::builder()
///     .entry_size(nz!(32))
///     .max_entries(nz!(1024))
///     .build();
///
/// assert_eq!(pool.entry_size(), 32);
/// assert_eq!(pool.capacity(), 1024);
/// ```
#[derive(Debug)]
#[must_use]
pub struct SlotPoolBuilder {
    entry_size: Option<NonZero<usize>>,
    max_entries: Option<NonZero<usize>>,
}

impl SlotPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            entry_size: None,
            max_entries: None,
        }
    }

    /// Sets the size of each slot in bytes. Must be at least 4 bytes.
    pub fn entry_size(mut self, entry_size: NonZero<usize>) -> Self {
        self.entry_size = Some(entry_size);
        self
    }

    /// Sets the size of each slot to fit one `T`.
    ///
    /// Types smaller than 4 bytes still get 4-byte slots because every free slot must be able
    /// to hold a free list link.
    ///
    /// # Panics
    ///
    /// Panics if the alignment of `T` exceeds [`CACHE_LINE_SIZE`][crate::CACHE_LINE_SIZE].
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::SlotPool;
    /// use new_zealand::nz;
    ///
    /// let pool = SlotPool::builder()
    ///     .layout_of::<u8>()
    ///     .max_entries(nz!(16))
    ///     .build();
    ///
    /// assert_eq!(pool.entry_size(), 4);
    /// ```
    pub fn layout_of<T>(mut self) -> Self {
        self.entry_size = Some(entry_size_for::<T>());
        self
    }

    /// Sets the number of slots in the pool. The pool never grows beyond this.
    pub fn max_entries(mut self, max_entries: NonZero<usize>) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Builds the pool. If the memory block cannot be acquired, the pool is invalid and
    /// permanently exhausted.
    ///
    /// # Panics
    ///
    /// Panics if the entry size or the number of entries has not been set, or on any of the
    /// conditions listed on [`SlotPool::new()`].
    #[must_use]
    pub fn build(self) -> SlotPool {
        let (entry_size, max_entries) = self.dimensions();
        SlotPool::new(entry_size, max_entries)
    }

    /// Builds the pool, returning an error if the memory block cannot be acquired.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`SlotPool::try_new()`].
    ///
    /// # Panics
    ///
    /// Panics if the entry size or the number of entries has not been set, or on any of the
    /// conditions listed on [`SlotPool::try_new()`].
    pub fn try_build(self) -> Result<SlotPool> {
        let (entry_size, max_entries) = self.dimensions();
        SlotPool::try_new(entry_size, max_entries)
    }

    fn dimensions(&self) -> (NonZero<usize>, NonZero<usize>) {
        let entry_size = self
            .entry_size
            .expect("entry size must be set via entry_size() or layout_of() before building");
        let max_entries = self
            .max_entries
            .expect("max_entries must be set via max_entries() before building");

        (entry_size, max_entries)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::Error;

    #[test]
    fn builds_with_explicit_entry_size() {
        let pool = SlotPool::builder()
            .entry_size(nz!(12))
            .max_entries(nz!(7))
            .build();

        assert!(pool.is_valid());
        assert_eq!(pool.entry_size(), 12);
        assert_eq!(pool.capacity(), 7);
        assert_eq!(pool.free_count(), 7);
    }

    #[test]
    fn layout_of_uses_type_size() {
        let pool = SlotPool::builder()
            .layout_of::<[u32; 5]>()
            .max_entries(nz!(3))
            .try_build()
            .unwrap();

        assert_eq!(pool.entry_size(), 20);
    }

    #[test]
    fn last_setter_wins() {
        let pool = SlotPool::builder()
            .layout_of::<u64>()
            .entry_size(nz!(40))
            .max_entries(nz!(2))
            .max_entries(nz!(5))
            .build();

        assert_eq!(pool.entry_size(), 40);
        assert_eq!(pool.capacity(), 5);
    }

    #[test]
    fn try_build_propagates_errors() {
        let result = SlotPool::builder()
            .entry_size(NonZero::new(usize::MAX).unwrap())
            .max_entries(nz!(2))
            .try_build();

        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
    }

    #[test]
    #[should_panic]
    fn missing_entry_size_panics() {
        drop(SlotPool::builder().max_entries(nz!(2)).build());
    }

    #[test]
    #[should_panic]
    fn missing_max_entries_panics() {
        drop(SlotPool::builder().entry_size(nz!(8)).build());
    }
}
