//! Request/response header.
//!
//! The same 12-byte layout opens every request and every response: a
//! `status` word and the byte count of the auxiliary payload that follows
//! the header. Requests carry a [`CommandType`] code in `status`; responses
//! carry a result code, `0` meaning success.

use std::io::Read;

use bytes::BufMut;

use crate::protocol::{
    command::CommandType,
    traits::{PutType, ReadError, ReadType},
};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct RequestHeader {
    /// Command verb (request) or result code (response).
    pub status: i32,

    /// Byte count of the auxiliary payload following the header.
    pub size: u64,
}

impl RequestHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 12;

    pub fn new(cmd: CommandType, size: u64) -> Self {
        Self {
            status: cmd.into(),
            size,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

impl<R> ReadType<R> for RequestHeader
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            status: i32::read(reader)?,
            size: u64::read(reader)?,
        })
    }
}

impl PutType for RequestHeader {
    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.status);
        buf.put_u64_le(self.size);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    use crate::protocol::test_utils::test_roundtrip;

    test_roundtrip!(RequestHeader, test_roundtrip_header);

    #[test]
    fn test_header_layout() {
        let mut data = vec![];
        RequestHeader::new(CommandType::Get, 64).put(&mut data);
        assert_eq!(data, [1, 0, 0, 0, 64, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(data.len(), RequestHeader::SIZE);
    }

    #[test]
    fn test_status_check() {
        assert!(RequestHeader { status: 0, size: 0 }.is_ok());
        assert!(!RequestHeader { status: -1, size: 0 }.is_ok());

        let raw = vec![0xff, 0xff, 0xff, 0xff, 8, 0, 0, 0, 0, 0, 0, 0];
        let restored = RequestHeader::read(&mut Cursor::new(raw)).unwrap();
        assert_eq!(restored.status, -1);
        assert_eq!(restored.size, 8);
    }
}
