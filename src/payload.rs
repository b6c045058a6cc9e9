//! Payload serialization.
//!
//! A channel is parameterised by a [`PayloadType`] that converts between
//! user values and the raw payload bytes stored under a key. Conversion to
//! bytes is total; conversion back is explicitly fallible, and a failure
//! during a get surfaces as
//! [`UnparseableEntity`](crate::response::ResponseStatus::UnparseableEntity).

use std::marker::PhantomData;

/// Bidirectional conversion between user values and stored payload bytes.
pub trait PayloadType {
    /// Value type carried by records on this channel.
    type Value;

    /// Converts the provided value to bytes to be sent to TStorage.
    fn to_bytes(&self, value: &Self::Value) -> Vec<u8>;

    /// Converts bytes to a value, or `None` in case of failure.
    fn from_bytes(&self, buffer: &[u8]) -> Option<Self::Value>;
}

/// Raw bytes payloads, passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesPayloadType;

impl PayloadType for BytesPayloadType {
    type Value = Vec<u8>;

    fn to_bytes(&self, value: &Self::Value) -> Vec<u8> {
        value.clone()
    }

    fn from_bytes(&self, buffer: &[u8]) -> Option<Self::Value> {
        Some(buffer.to_vec())
    }
}

/// Empty payloads. Never fails to parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitPayloadType;

impl PayloadType for UnitPayloadType {
    type Value = ();

    fn to_bytes(&self, _value: &Self::Value) -> Vec<u8> {
        vec![]
    }

    fn from_bytes(&self, _buffer: &[u8]) -> Option<Self::Value> {
        Some(())
    }
}

/// Fixed-width scalar encodable as its little-endian byte representation.
pub trait Scalar: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    fn encode_le(self) -> Vec<u8>;

    /// Decodes from exactly [`Self::SIZE`] bytes.
    fn decode_le(buffer: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn encode_le(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }

                fn decode_le(buffer: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$t>()];
                    bytes.copy_from_slice(buffer);
                    <$t>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_scalar!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

/// Payloads holding exactly one little-endian scalar.
///
/// Parsing fails when the stored payload length disagrees with the scalar
/// width.
#[derive(Debug, Clone, Copy)]
pub struct ScalarPayloadType<T> {
    _type: PhantomData<T>,
}

impl<T> Default for ScalarPayloadType<T> {
    fn default() -> Self {
        Self { _type: PhantomData }
    }
}

impl<T> ScalarPayloadType<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> PayloadType for ScalarPayloadType<T>
where
    T: Scalar,
{
    type Value = T;

    fn to_bytes(&self, value: &Self::Value) -> Vec<u8> {
        value.encode_le()
    }

    fn from_bytes(&self, buffer: &[u8]) -> Option<Self::Value> {
        if buffer.len() != T::SIZE {
            return None;
        }
        Some(T::decode_le(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_bytes_identity() {
        let payload_type = BytesPayloadType;
        let value = vec![0u8, 1, 2, 0xff];
        assert_eq!(payload_type.to_bytes(&value), value);
        assert_eq!(payload_type.from_bytes(&value), Some(value));
    }

    #[test]
    fn test_unit_is_empty_and_total() {
        let payload_type = UnitPayloadType;
        assert!(payload_type.to_bytes(&()).is_empty());
        assert_eq!(payload_type.from_bytes(b""), Some(()));
        assert_eq!(payload_type.from_bytes(b"anything"), Some(()));
    }

    #[test]
    fn test_scalar_length_mismatch() {
        let payload_type = ScalarPayloadType::<i64>::new();
        assert_eq!(payload_type.from_bytes(&[0; 7]), None);
        assert_eq!(payload_type.from_bytes(&[0; 9]), None);
        assert_eq!(payload_type.from_bytes(&[0; 8]), Some(0));
    }

    proptest! {
        #[test]
        fn test_scalar_roundtrip_i64(value: i64) {
            let payload_type = ScalarPayloadType::<i64>::new();
            let raw = payload_type.to_bytes(&value);
            assert_eq!(raw.len(), 8);
            assert_eq!(payload_type.from_bytes(&raw), Some(value));
        }

        #[test]
        fn test_scalar_roundtrip_f64(value: f64) {
            let payload_type = ScalarPayloadType::<f64>::new();
            let raw = payload_type.to_bytes(&value);
            let restored = payload_type.from_bytes(&raw).unwrap();
            assert_eq!(value.to_bits(), restored.to_bits());
        }
    }
}
