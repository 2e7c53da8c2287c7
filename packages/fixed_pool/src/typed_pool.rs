use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{PoolStats, Result, SlotPool, entry_size_for};

/// A fixed-capacity pool of `T` values, constructing and destroying them in the slots of a
/// [`SlotPool`].
///
/// Each slot is `max(size_of::<T>(), 4)` bytes long and the first slot starts on a cache line
/// boundary. Objects are handed out as raw pointers that stay valid until they are passed to
/// [`delete_object()`][1]. The pool does not keep track of which slots hold live objects - if you
/// need to enumerate them, keep your own collection of the pointers you were given.
///
/// # Dropping
///
/// Every object must be deleted before the pool is dropped. Dropping a pool that still holds
/// objects panics; the objects are not dropped.
///
/// # Examples
///
/// ```
/// use fixed_pool::TypedPool;
/// use new_zealand::nz;
///
/// let mut pool = TypedPool::<u32>::new(nz!(64));
///
/// let value = pool.new_object(0xaabb_ccdd).unwrap();
///
/// // SAFETY: The object is live until we delete it below.
/// assert_eq!(unsafe { *value.as_ref() }, 0xaabb_ccdd);
///
/// // SAFETY: The pointer came from this pool and is not used afterwards.
/// unsafe { pool.delete_object(value) };
/// ```
///
/// [1]: Self::delete_object
pub struct TypedPool<T> {
    slots: SlotPool,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for TypedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("slots", &self.slots)
            .finish()
    }
}

impl<T> TypedPool<T> {
    /// Creates a pool with room for `max_entries` objects.
    ///
    /// If the memory block cannot be acquired, the pool is invalid and every
    /// [`new_object()`][1] returns `None`.
    ///
    /// # Panics
    ///
    /// Panics if the alignment of `T` exceeds [`CACHE_LINE_SIZE`][crate::CACHE_LINE_SIZE] or if
    /// `max_entries` exceeds `u32::MAX`.
    ///
    /// [1]: Self::new_object
    #[must_use]
    pub fn new(max_entries: NonZero<usize>) -> Self {
        Self {
            slots: SlotPool::new(entry_size_for::<T>(), max_entries),
            _item: PhantomData,
        }
    }

    /// Creates a pool with room for `max_entries` objects, returning an error if the memory
    /// block cannot be acquired.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`SlotPool::try_new()`].
    ///
    /// # Panics
    ///
    /// Panics if the alignment of `T` exceeds [`CACHE_LINE_SIZE`][crate::CACHE_LINE_SIZE] or if
    /// `max_entries` exceeds `u32::MAX`.
    pub fn try_new(max_entries: NonZero<usize>) -> Result<Self> {
        Ok(Self {
            slots: SlotPool::try_new(entry_size_for::<T>(), max_entries)?,
            _item: PhantomData,
        })
    }

    /// Moves `value` into a free slot and returns a pointer to it, or returns `None` (dropping
    /// `value`) if the pool is exhausted.
    pub fn new_object(&mut self, value: T) -> Option<NonNull<T>> {
        self.new_object_with(|| value)
    }

    /// Constructs a value in a free slot and returns a pointer to it, or returns `None` if the
    /// pool is exhausted. The constructor is only called if a slot is available.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::TypedPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = TypedPool::<String>::new(nz!(1));
    ///
    /// let name = pool.new_object_with(|| "Alice".to_string()).unwrap();
    /// assert!(pool.new_object_with(|| unreachable!()).is_none());
    ///
    /// // SAFETY: The pointer came from this pool and is not used afterwards.
    /// unsafe { pool.delete_object(name) };
    /// ```
    pub fn new_object_with(&mut self, f: impl FnOnce() -> T) -> Option<NonNull<T>> {
        if self.slots.is_full() {
            return None;
        }

        // If the constructor panics, no slot has been taken yet.
        let value = f();

        let ptr = self
            .slots
            .allocate()
            .expect("guarded by is_full() check above")
            .cast::<T>();

        // SAFETY: The slot is at least size_of::<T>() bytes, aligned for T (the block is
        // cache-line aligned and the entry size is a multiple of the alignment of T) and
        // exclusively ours until it is deallocated.
        unsafe {
            ptr.write(value);
        }

        Some(ptr)
    }

    /// Drops the object at `ptr` and returns its slot to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point to the start of a slot in this pool. The object is not
    /// dropped in that case.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by [`new_object()`][1] or
    /// [`new_object_with()`][2] on this pool and has not been deleted since. No references to
    /// the object may exist and the pointer must not be used after this call.
    ///
    /// [1]: Self::new_object
    /// [2]: Self::new_object_with
    pub unsafe fn delete_object(&mut self, ptr: NonNull<T>) {
        assert!(
            self.slots.contains(ptr.cast()),
            "pointer {ptr:?} does not belong to this pool of {}",
            type_name::<T>()
        );

        let slot = ptr.cast::<u8>();
        assert!(
            self.slots.slot_ptr(self.slots.index_of(slot)) == slot,
            "pointer {ptr:?} does not point to the start of a slot in this pool of {}",
            type_name::<T>()
        );

        // SAFETY: The caller guarantees that the pointer refers to a live object from this pool
        // that nobody else references.
        unsafe {
            ptr.drop_in_place();
        }

        // SAFETY: The caller guarantees the slot came from this pool and is no longer in use.
        unsafe {
            self.slots.deallocate(ptr.cast());
        }
    }

    /// The number of live objects in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// The maximum number of objects the pool can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Whether the pool holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the next [`new_object()`][1] will return `None`.
    ///
    /// [1]: Self::new_object
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.is_full()
    }

    /// Whether the pool owns a memory block. An invalid pool is permanently exhausted.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.slots.is_valid()
    }

    /// Returns a snapshot of the occupancy of the pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.slots.stats()
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
    use std::cell::Cell;
    use std::rc::Rc;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::CACHE_LINE_SIZE;

    assert_impl_all!(TypedPool<u32>: Send);
    assert_not_impl_any!(TypedPool<u32>: Sync);
    assert_not_impl_any!(TypedPool<Rc<u32>>: Send, Sync);

    fn is_aligned<T>(ptr: NonNull<T>, alignment: usize) -> bool {
        ptr.as_ptr().addr() % alignment == 0
    }

    /// A distinct single-bit value for each of the first 32 indexes.
    fn marker(index: usize) -> u32 {
        1_u32.rotate_left(u32::try_from(index).unwrap())
    }

    #[test]
    fn single_new_and_delete() {
        let mut pool = TypedPool::<u32>::new(nz!(64));

        let p = pool.new_object(0xaabb_ccdd).unwrap();

        assert!(is_aligned(p, 4));
        assert!(is_aligned(p, CACHE_LINE_SIZE));
        assert_eq!(unsafe { *p.as_ref() }, 0xaabb_ccdd);

        unsafe { pool.delete_object(p) };
        assert!(pool.is_empty());
    }

    #[test]
    fn double_new_and_delete() {
        let mut pool = TypedPool::<u32>::new(nz!(64));

        let p1 = pool.new_object(0x1122_3344).unwrap();
        let p2 = pool.new_object(0x5566_7788).unwrap();

        assert!(is_aligned(p1, 4));
        assert!(is_aligned(p2, 4));
        assert_eq!(p2, unsafe { p1.add(1) });

        assert_eq!(unsafe { *p1.as_ref() }, 0x1122_3344);
        unsafe { pool.delete_object(p1) };

        // Deleting the neighbour must not disturb this object.
        assert_eq!(unsafe { *p2.as_ref() }, 0x5566_7788);
        unsafe { pool.delete_object(p2) };
    }

    #[test]
    fn block_fill_and_free() {
        let mut pool = TypedPool::<u32>::new(nz!(64));

        let objects = (0..64)
            .map(|i| {
                let p = pool.new_object(marker(i)).unwrap();
                assert_eq!(unsafe { *p.as_ref() }, marker(i));
                p
            })
            .collect::<Vec<_>>();

        assert!(pool.is_full());
        assert!(pool.new_object(0).is_none());

        let stats = pool.stats();
        assert_eq!(stats.allocation_count(), 64);
        assert_eq!(stats.block_count(), 1);

        for p in objects {
            unsafe { pool.delete_object(p) };
        }

        assert_eq!(pool.stats().allocation_count(), 0);
    }

    #[test]
    fn partial_free_and_refill() {
        let mut pool = TypedPool::<u32>::new(nz!(64));

        let mut objects = (0..64)
            .map(|i| Some(pool.new_object(marker(i)).unwrap()))
            .collect::<Vec<_>>();

        assert_eq!(pool.stats(), PoolStats::new(1, 64));

        for (i, object) in objects.iter().enumerate() {
            assert_eq!(unsafe { *object.unwrap().as_ref() }, marker(i));
        }

        // Delete every odd entry.
        for i in (1..64).step_by(2) {
            let p = objects[i].take().unwrap();
            unsafe { pool.delete_object(p) };
        }

        assert_eq!(pool.stats(), PoolStats::new(1, 32));

        // The survivors are untouched.
        for i in (0..64).step_by(2) {
            assert_eq!(unsafe { *objects[i].unwrap().as_ref() }, marker(i));
        }

        // Refill 16 of the holes.
        for i in (1..32).step_by(2) {
            assert!(objects[i].is_none());
            objects[i] = Some(pool.new_object(marker(i)).unwrap());
        }

        assert_eq!(pool.stats(), PoolStats::new(1, 48));

        // Delete everything in the upper half.
        for object in &mut objects[32..] {
            if let Some(p) = object.take() {
                unsafe { pool.delete_object(p) };
            }
        }

        assert_eq!(pool.stats(), PoolStats::new(1, 32));

        for p in objects.into_iter().flatten() {
            unsafe { pool.delete_object(p) };
        }

        assert_eq!(pool.stats(), PoolStats::new(1, 0));
    }

    #[test]
    fn delete_drops_value() {
        struct Droppable {
            dropped: Rc<Cell<bool>>,
        }

        impl Drop for Droppable {
            fn drop(&mut self) {
                self.dropped.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let mut pool = TypedPool::<Droppable>::new(nz!(3));

        let p = pool
            .new_object(Droppable {
                dropped: Rc::clone(&dropped),
            })
            .unwrap();

        assert!(!dropped.get());
        unsafe { pool.delete_object(p) };
        assert!(dropped.get());
    }

    #[test]
    fn exhausted_pool_skips_constructor() {
        let mut pool = TypedPool::<String>::new(nz!(1));
        let calls = Cell::new(0);

        let first = pool
            .new_object_with(|| {
                calls.set(calls.get() + 1);
                "first".to_string()
            })
            .unwrap();

        let second = pool.new_object_with(|| {
            calls.set(calls.get() + 1);
            "second".to_string()
        });

        assert!(second.is_none());
        assert_eq!(calls.get(), 1);
        assert_eq!(unsafe { first.as_ref() }, "first");

        unsafe { pool.delete_object(first) };
    }

    #[test]
    fn panicking_constructor_does_not_leak_slot() {
        let mut pool = TypedPool::<u64>::new(nz!(2));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.new_object_with(|| panic!("constructor failed"))
        }));

        assert!(result.is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn small_types_get_link_sized_slots() {
        let mut pool = TypedPool::<u8>::new(nz!(4));

        let a = pool.new_object(1).unwrap();
        let b = pool.new_object(2).unwrap();

        assert_eq!(b.as_ptr().addr() - a.as_ptr().addr(), 4);

        unsafe {
            assert_eq!(*a.as_ref(), 1);
            assert_eq!(*b.as_ref(), 2);
            pool.delete_object(a);
            pool.delete_object(b);
        }
    }

    #[test]
    fn zero_sized_type_works() {
        let mut pool = TypedPool::<()>::new(nz!(2));

        let a = pool.new_object(()).unwrap();
        let b = pool.new_object(()).unwrap();
        assert_ne!(a, b);
        assert!(pool.new_object(()).is_none());

        unsafe {
            pool.delete_object(a);
            pool.delete_object(b);
        }
    }

    #[test]
    fn cache_line_aligned_type_works() {
        #[repr(C, align(64))]
        struct Line {
            data: [u8; 64],
        }

        let mut pool = TypedPool::<Line>::new(nz!(4));

        let objects = (0..4_u8)
            .map(|i| pool.new_object(Line { data: [i; 64] }).unwrap())
            .collect::<Vec<_>>();

        for (i, p) in objects.iter().enumerate() {
            assert!(is_aligned(*p, 64));
            assert_eq!(
                unsafe { p.as_ref() }.data,
                [u8::try_from(i).unwrap(); 64]
            );
        }

        for p in objects {
            unsafe { pool.delete_object(p) };
        }
    }

    #[test]
    fn mutation_through_pointer_is_visible() {
        let mut pool = TypedPool::<Vec<u32>>::new(nz!(2));

        let mut p = pool.new_object(Vec::new()).unwrap();

        unsafe {
            p.as_mut().push(1);
            p.as_mut().push(2);
            assert_eq!(p.as_ref(), &[1, 2]);
            pool.delete_object(p);
        }
    }

    #[test]
    fn debug_output_names_item_type() {
        let pool = TypedPool::<u16>::new(nz!(2));

        let debug = format!("{pool:?}");
        assert!(debug.contains("TypedPool"));
        assert!(debug.contains("u16"));
    }

    #[test]
    #[should_panic]
    fn over_aligned_type_panics() {
        #[repr(align(128))]
        struct OverAligned;

        drop(TypedPool::<OverAligned>::new(nz!(2)));
    }

    #[test]
    #[should_panic]
    fn delete_foreign_pointer_panics() {
        let mut pool = TypedPool::<u64>::new(nz!(2));
        let mut foreign = 5_u64;

        unsafe { pool.delete_object(NonNull::from(&mut foreign)) };
    }

    #[test]
    fn delete_mid_slot_pointer_panics_without_dropping() {
        struct Counted {
            drops: Rc<Cell<usize>>,
            _payload: u64,
        }

        impl Drop for Counted {
            fn drop(&mut self) {
                self.drops.set(self.drops.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut pool = TypedPool::<Counted>::new(nz!(2));

        let object = pool
            .new_object(Counted {
                drops: Rc::clone(&drops),
                _payload: 7,
            })
            .unwrap();

        let mid_slot = unsafe { object.cast::<u8>().add(8) }.cast::<Counted>();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
            pool.delete_object(mid_slot);
        }));

        assert!(result.is_err());
        assert_eq!(drops.get(), 0);
        assert_eq!(pool.len(), 1);

        unsafe { pool.delete_object(object) };
        assert_eq!(drops.get(), 1);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_objects_panics() {
        let mut pool = TypedPool::<u64>::new(nz!(2));

        _ = pool.new_object(42);
    }
}
