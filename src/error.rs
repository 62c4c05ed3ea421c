//! Our error types for the MP7100 PSUs.
//!
//! A PSU that does not answer is not an error, see [`Outcome`](crate::types::Outcome).

use thiserror::Error;

use crate::types::OutOfRange;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Custom error type for MP7100 PSU communications.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error")]
    SerialError(I),
    #[error("Invalid range")]
    InvalidRange,
    #[error("Command buffer error")]
    BufferError,
}

impl<I: embedded_io::Error> From<OutOfRange> for Error<I> {
    fn from(_: OutOfRange) -> Self {
        Error::InvalidRange
    }
}
