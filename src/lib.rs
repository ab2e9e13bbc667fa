#![doc = include_str!("../README.md")]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
mod file;
mod read;
mod write;

#[cfg(feature = "std")]
pub use file::{
    create_write, create_write_sized, open_read, open_read_sized, open_write, open_write_sized,
    FileStream,
};
pub use read::{
    BufferedReader, DiscardError, IncompleteRead, ReadError, SliceError, UnreadError, WriteToError,
};
pub use write::{BufferedWriter, ReadFromError, WriteError};

/// Buffer capacity used when no explicit size is requested.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Smallest capacity that will be allocated for a degenerate size request.
pub(crate) const MIN_BUFFER_SIZE: usize = 16;

/// A failed `reset`: the old stream could not be closed, so the wrapper keeps
/// it and hands the not-adopted stream back to the caller.
#[derive(Debug)]
pub struct ResetError<T, E> {
    /// The stream that was not adopted.
    pub rejected: T,
    /// The error from closing the old stream.
    pub cause: E,
}

/// A stream with an explicit, fallible close operation.
///
/// A buffered wrapper takes exclusive ownership of its stream and is the only
/// party that may close it. Closing more than once must be tolerated by the
/// implementation.
pub trait Close: embedded_io::ErrorType {
    /// Close the stream, releasing whatever resource backs it.
    fn close(&mut self) -> Result<(), Self::Error>;
}
