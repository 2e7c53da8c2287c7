use thiserror::Error;

/// Errors that can occur when acquiring the memory block that backs a pool.
///
/// Running out of free slots is not an error - it is reported as `None` by the allocation
/// methods. Misuse of the pool (e.g. returning a foreign pointer) is a contract violation and
/// results in a panic instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The platform allocator could not provide a block of the requested size and alignment.
    #[error("failed to acquire a memory block of {size} bytes aligned to {alignment} bytes")]
    BlockAcquisition {
        /// Requested size of the block, in bytes.
        size: usize,

        /// Requested alignment of the block, in bytes.
        alignment: usize,
    },

    /// The requested size and alignment do not describe a valid memory layout, typically because
    /// the size would overflow `isize` once rounded up to the alignment.
    #[error("a memory block of {size} bytes aligned to {alignment} bytes is not a valid layout")]
    InvalidLayout {
        /// Requested size of the block, in bytes.
        size: usize,

        /// Requested alignment of the block, in bytes.
        alignment: usize,
    },

    /// The total size of the pool (`entry_size * max_entries`) does not fit in `usize`.
    #[error("a pool of {max_entries} entries of {entry_size} bytes each overflows the address space")]
    CapacityOverflow {
        /// Size of each slot, in bytes.
        entry_size: usize,

        /// Number of slots in the pool.
        max_entries: usize,
    },
}

/// A specialized `Result` type for pool construction, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn block_acquisition_message_names_size_and_alignment() {
        let error = Error::BlockAcquisition {
            size: 256,
            alignment: 64,
        };

        assert_eq!(
            error.to_string(),
            "failed to acquire a memory block of 256 bytes aligned to 64 bytes"
        );
    }

    #[test]
    fn capacity_overflow_message_names_dimensions() {
        let error = Error::CapacityOverflow {
            entry_size: usize::MAX,
            max_entries: 2,
        };

        let message = error.to_string();
        assert!(message.contains("2 entries"));
        assert!(message.contains(&usize::MAX.to_string()));
    }
}
