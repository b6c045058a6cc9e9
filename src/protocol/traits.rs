use std::io::Read;

use bytes::BufMut;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReadError {
    #[error("Cannot read data: {0}")]
    IO(#[from] std::io::Error),

    #[error("Overflow converting integer: {0}")]
    Overflow(#[from] std::num::TryFromIntError),

    #[error("Malformed data: {0}")]
    Malformed(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub trait ReadType<R>: Sized
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError>;
}

/// Encoding onto the wire.
///
/// Requests are assembled in memory before sending, so encoding is
/// infallible and writes into any [`BufMut`].
pub trait PutType {
    fn put<B: BufMut>(&self, buf: &mut B);
}
