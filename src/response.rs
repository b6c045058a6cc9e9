//! Request outcomes.
//!
//! Channels report failures as values, never as panics or `Err` escapes: a
//! request returns one of the response shapes below and the status says
//! whether it worked.

use crate::record::Record;

/// Return codes of channel operations.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ResponseStatus {
    Ok,
    /// Server reported a failure in its final header.
    Error,
    /// Transport closed before the required response bytes arrived.
    Disconnected,
    /// Server rejected the request up front.
    BadRequest,
    /// A record's key or payload could not be parsed.
    UnparseableEntity,
    /// A record exceeds the configured memory limit.
    NoMemory,
}

impl ResponseStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<ResponseStatus> for i32 {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Ok => 0,
            ResponseStatus::Error => -1,
            ResponseStatus::Disconnected => 128,
            ResponseStatus::BadRequest => 129,
            ResponseStatus::UnparseableEntity => 130,
            ResponseStatus::NoMemory => 131,
        }
    }
}

/// Outcome of a put or of connection management.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Response {
    pub status: ResponseStatus,
}

impl Response {
    pub fn new(status: ResponseStatus) -> Self {
        Self { status }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Outcome of a get carrying the server's acquisition timestamp.
///
/// The acq is `-1` whenever the status is not [`ResponseStatus::Ok`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ResponseAcq {
    pub status: ResponseStatus,
    pub acq: i64,
}

impl ResponseAcq {
    pub fn new(status: ResponseStatus) -> Self {
        Self { status, acq: -1 }
    }

    pub fn with_acq(status: ResponseStatus, acq: i64) -> Self {
        Self { status, acq }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Outcome of a buffered get.
///
/// `data` always holds the records parsed so far, even on failure.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ResponseGet<T> {
    pub status: ResponseStatus,
    pub acq: i64,
    pub data: Vec<Record<T>>,
}

impl<T> ResponseGet<T> {
    pub fn new(status: ResponseStatus, data: Vec<Record<T>>) -> Self {
        Self {
            status,
            acq: -1,
            data,
        }
    }

    pub fn with_acq(status: ResponseStatus, acq: i64, data: Vec<Record<T>>) -> Self {
        Self { status, acq, data }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}
