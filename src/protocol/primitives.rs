//! Primitive wire types.
//!
//! All integers on the TStorage wire are little-endian, two's complement,
//! fixed width, without padding. Encoding goes through [`BufMut`]'s
//! `put_*_le` family directly; decoding is via [`ReadType`].

use std::io::Read;

use super::traits::{ReadError, ReadType};

#[cfg(test)]
use bytes::BufMut;

impl<R: Read> ReadType<R> for i32 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }
}

impl<R: Read> ReadType<R> for i64 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }
}

impl<R: Read> ReadType<R> for u64 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_int32_roundtrip(orig: i32) {
            let mut data = vec![];
            data.put_i32_le(orig);
            let restored = i32::read(&mut Cursor::new(data)).unwrap();
            assert_eq!(orig, restored);
        }

        #[test]
        fn test_int64_roundtrip(orig: i64) {
            let mut data = vec![];
            data.put_i64_le(orig);
            let restored = i64::read(&mut Cursor::new(data)).unwrap();
            assert_eq!(orig, restored);
        }

        #[test]
        fn test_uint64_roundtrip(orig: u64) {
            let mut data = vec![];
            data.put_u64_le(orig);
            let restored = u64::read(&mut Cursor::new(data)).unwrap();
            assert_eq!(orig, restored);
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let restored = i32::read(&mut Cursor::new(vec![0x01, 0x02, 0x03, 0x04])).unwrap();
        assert_eq!(restored, 0x0403_0201);
    }

    #[test]
    fn test_short_input() {
        let err = i64::read(&mut Cursor::new(vec![0u8; 7])).unwrap_err();
        assert!(matches!(err, ReadError::IO(_)));
    }
}
