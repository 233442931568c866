//! A dynamic memory allocator over a single raw buffer, carved into
//! chunks tracked by two red-black trees (free-by-size and
//! allocated-by-size) whose nodes live embedded inside the buffer
//! itself. See [`Allocator`] for the public surface.

mod allocator;
mod error;

pub use allocator::{Allocator, HEADER_SIZE};
pub use error::FreeError;
