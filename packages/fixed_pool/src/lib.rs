#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity memory pool of uniformly sized slots, allocated and freed in O(1).
//!
//! All slots live in a single block of memory that is acquired once when the pool is created and
//! released once when the pool is dropped. The block starts on a cache line boundary
//! ([`CACHE_LINE_SIZE`] bytes). Free slots are chained together through their own bytes, so the
//! pool performs no heap allocation after construction and needs no bookkeeping memory.
//!
//! This crate provides two types:
//!
//! * [`SlotPool`] hands out raw, uninitialized slots of a configurable size. Use this when you
//!   manage the contents of the slots yourself.
//! * [`TypedPool<T>`] constructs and destroys `T` values in the slots of a [`SlotPool`]. Use this
//!   as a node or entity pool.
//!
//! The pool never grows. When every slot is in use, allocation returns `None` and the caller
//! decides what to do about it. Freed slots are reused in last-in-first-out order, so the most
//! recently freed (and most likely cached) slot is the next one handed out.
//!
//! # Examples
//!
//! ```
//! use fixed_pool::TypedPool;
//! use new_zealand::nz;
//!
//! #[derive(Debug, PartialEq)]
//! struct Particle {
//!     position: (f32, f32),
//!     velocity: (f32, f32),
//! }
//!
//! let mut pool = TypedPool::<Particle>::new(nz!(1024));
//!
//! let particle = pool
//!     .new_object(Particle {
//!         position: (0.0, 0.0),
//!         velocity: (1.0, 0.5),
//!     })
//!     .unwrap();
//!
//! assert_eq!(pool.stats().allocation_count(), 1);
//!
//! // SAFETY: The pointer came from this pool and is not used afterwards.
//! unsafe { pool.delete_object(particle) };
//!
//! assert!(pool.is_empty());
//! ```
//!
//! # Thread safety
//!
//! The pools are not internally synchronized. They can be moved between threads (a
//! [`TypedPool<T>`] only if `T: Send`) but sharing one between threads requires external
//! synchronization such as a `Mutex`.

mod aligned_block;
mod builder;
mod error;
mod slot_pool;
mod stats;
mod typed_pool;

pub(crate) use aligned_block::AlignedBlock;
pub use aligned_block::CACHE_LINE_SIZE;
pub use builder::*;
pub use error::*;
pub use slot_pool::SlotPool;
pub(crate) use slot_pool::entry_size_for;
pub use stats::*;
pub use typed_pool::*;
