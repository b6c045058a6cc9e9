//! Pure per-request protocol logic.
//!
//! Both channel flavours drive the same machinery between reads: request
//! assembly, response-header handling and the record-parsing step. Nothing
//! here touches the transport, so the blocking and the async driver reuse it
//! verbatim.

use crate::channel::buffer::ReceiveBuffer;
use crate::payload::PayloadType;
use crate::protocol::command::CommandType;
use crate::protocol::header::RequestHeader;
use crate::protocol::key::FULL_KEY_SIZE;
use crate::protocol::traits::{PutType, ReadType};
use crate::protocol::{KEYRANGE_AUX_SIZE, PUT_END_GUARD};
use crate::record::{Key, Record};

/// Receive-side stages of a get request.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum GetStage {
    InitialHeader,
    RecordsParsing,
    FinalHeader,
}

/// Verdict of one record-parsing step.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum RecordsParsing {
    /// Consumed the zero-size sentinel; the trailing response header follows.
    Finished,
    /// A record's key or payload could not be parsed.
    Unparseable,
    NeedsMoreBytes,
    /// The next announced record would exceed the memory limit.
    RecordTooBig,
}

/// Auxiliary payload expected after a response header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum AuxFormat {
    Empty,
    Acq,
    AcqPair,
}

impl AuxFormat {
    fn size(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Acq => 8,
            Self::AcqPair => 16,
        }
    }
}

/// Decoded auxiliary payload. Empty whenever the header carries an error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum ResponseAux {
    None,
    Acq(i64),
    AcqPair(i64, i64),
}

impl ResponseAux {
    pub(crate) fn acq(&self) -> i64 {
        match self {
            Self::Acq(acq) => *acq,
            _ => -1,
        }
    }
}

/// Assembles a GET/GETACQ request: header plus the two full keys.
pub(crate) fn keyrange_request(cmd: CommandType, key_min: &Key, key_max: &Key) -> Vec<u8> {
    let mut request = Vec::with_capacity(RequestHeader::SIZE + 2 * FULL_KEY_SIZE);
    RequestHeader::new(cmd, KEYRANGE_AUX_SIZE).put(&mut request);
    key_min.put(&mut request);
    key_max.put(&mut request);
    request
}

/// Assembles a PUTSAFE/PUTASAFE request header.
pub(crate) fn put_request(cmd: CommandType) -> Vec<u8> {
    let mut request = Vec::with_capacity(RequestHeader::SIZE);
    RequestHeader::new(cmd, 0).put(&mut request);
    request
}

/// The outbound record stream terminator.
pub(crate) fn terminator() -> [u8; 4] {
    PUT_END_GUARD.to_le_bytes()
}

/// Initial receive-buffer capacity, capped by the memory limit.
pub(crate) fn recv_capacity(recv_buffer_size: usize, memory_limit: Option<usize>) -> usize {
    memory_limit.map_or(recv_buffer_size, |limit| recv_buffer_size.min(limit))
}

pub(crate) fn over_memory_limit(total_bytes: usize, memory_limit: Option<usize>) -> bool {
    memory_limit.is_some_and(|limit| total_bytes > limit)
}

pub(crate) fn at_memory_limit(total_bytes: usize, memory_limit: Option<usize>) -> bool {
    memory_limit.is_some_and(|limit| total_bytes >= limit)
}

/// Consumes one complete response (header plus its declared auxiliary
/// payload) from the buffer, or returns `None` when more bytes are needed.
///
/// The auxiliary payload is decoded only for a success status; error
/// responses yield [`ResponseAux::None`] regardless of `format`.
pub(crate) fn handle_response(
    buffer: &mut ReceiveBuffer,
    format: AuxFormat,
) -> Option<(RequestHeader, ResponseAux)> {
    if !buffer.fits(RequestHeader::SIZE) {
        return None;
    }
    let mut reader = buffer.peek(RequestHeader::SIZE, 0);
    let header = RequestHeader::read(&mut reader).ok()?;

    let response_size = RequestHeader::SIZE.saturating_add(header.size as usize);
    if !buffer.fits(response_size) {
        return None;
    }

    let aux = if header.is_ok() && header.size as usize >= format.size() {
        let mut reader = buffer.peek(format.size(), RequestHeader::SIZE);
        match format {
            AuxFormat::Empty => ResponseAux::None,
            AuxFormat::Acq => ResponseAux::Acq(i64::read(&mut reader).ok()?),
            AuxFormat::AcqPair => {
                let acq_min = i64::read(&mut reader).ok()?;
                let acq_max = i64::read(&mut reader).ok()?;
                ResponseAux::AcqPair(acq_min, acq_max)
            }
        }
    } else {
        ResponseAux::None
    };

    buffer.increase(response_size);
    Some((header, aux))
}

/// Parses one record out of its framed bytes: 32 bytes of full key, the rest
/// handed to the payload type. Invalid keys and conversion failures both
/// yield `None`.
fn parse_record<P>(raw: &[u8], payload_type: &P) -> Option<Record<P::Value>>
where
    P: PayloadType,
{
    let mut reader = raw;
    let key = Key::read(&mut reader).ok()?;
    if !key.valid() {
        return None;
    }
    let value = payload_type.from_bytes(reader)?;
    Some(Record::new(key, value))
}

/// Runs the record-parsing loop over the buffer, appending parsed records.
///
/// Keeps the buffer ready for the next fill on every exit: on
/// [`RecordsParsing::Finished`] the content is compacted so the trailing
/// response header fits; on [`RecordsParsing::NeedsMoreBytes`] it is
/// compacted and, when the announced record exceeds the current capacity,
/// the buffer is grown to `4 + record_size`.
pub(crate) fn parse_records<P>(
    buffer: &mut ReceiveBuffer,
    records: &mut Vec<Record<P::Value>>,
    payload_type: &P,
    max_size: Option<usize>,
) -> RecordsParsing
where
    P: PayloadType,
{
    const SIZE_PREFIX: usize = 4;

    while buffer.fits(SIZE_PREFIX) {
        let mut reader = buffer.peek(SIZE_PREFIX, 0);
        let record_size = match i32::read(&mut reader) {
            Ok(size) => size,
            Err(_) => return RecordsParsing::NeedsMoreBytes,
        };

        if record_size == 0 {
            buffer.increase(SIZE_PREFIX);
            buffer.truncate(); // Truncate so confirmation header fits
            return RecordsParsing::Finished;
        }
        if record_size < 0 {
            return RecordsParsing::Unparseable;
        }

        let record_size = record_size as usize;
        if buffer.fits(SIZE_PREFIX + record_size) {
            let record = parse_record(buffer.peek(record_size, SIZE_PREFIX), payload_type);
            buffer.increase(SIZE_PREFIX + record_size);
            match record {
                Some(record) => records.push(record),
                None => return RecordsParsing::Unparseable,
            }
        } else if max_size.is_some_and(|max| SIZE_PREFIX + record_size > max) {
            return RecordsParsing::RecordTooBig;
        } else {
            buffer.truncate(); // Truncate so record will fit
            if !buffer.fits_eventually(SIZE_PREFIX + record_size) {
                buffer.grow_buffer(SIZE_PREFIX + record_size);
            }
            return RecordsParsing::NeedsMoreBytes;
        }
    }

    if !buffer.fits_eventually(SIZE_PREFIX) {
        buffer.truncate();
    }
    RecordsParsing::NeedsMoreBytes
}
