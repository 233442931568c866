use thiserror::Error;

/// Diagnostic error returned by [`crate::Allocator::try_free`].
///
/// The primary `free` entry point never surfaces this -- a mismatched
/// address/size is a silent no-op by design (see module docs) -- but
/// callers who want to catch misuse during development can go through
/// `try_free` instead.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FreeError {
    #[error("no allocated chunk at address {address:?} with size {size}")]
    NotAllocated { address: usize, size: i32 },
}
