//! The TStorage wire protocol.
//!
//! Every request opens with a 12-byte [`header::RequestHeader`]; get-style
//! requests follow with a pair of full [`key`] layouts, put-style requests
//! with a batch-framed record stream closed by the [`PUT_END_GUARD`]
//! terminator. Responses reuse the header layout with an auxiliary acq
//! payload; get responses additionally stream records, closed by a zero
//! record size.

pub(crate) mod batch;
pub mod command;
pub mod header;
pub mod key;
pub mod primitives;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_utils;

/// Byte size of the acq pair trailing a put response.
pub const ACQS_PAIR_SIZE: usize = 16;

/// Byte size of the acq trailing a get/get-acq response.
pub const ACQ_SIZE: usize = 8;

/// Outbound record stream terminator, written where a cid would go.
pub const PUT_END_GUARD: i32 = -1;

/// `size` value sent with GET/GETACQ requests.
///
/// Historical quirk: the two full keys following the header are counted as
/// auxiliary payload. Servers tolerate any value here but 64 is what existing
/// deployments send.
pub const KEYRANGE_AUX_SIZE: u64 = 64;
