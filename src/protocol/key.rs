//! Wire layouts of [`Key`].
//!
//! The full layout is 32 bytes: `cid:i32, mid:i64, moid:i32, cap:i64,
//! acq:i64`. Outbound put streams carry the key without its cid (the cid
//! prefixes the whole group), and puts without acq drop the trailing acq as
//! well, yielding 28- and 20-byte partial layouts.

use std::io::Read;

use bytes::BufMut;

use crate::protocol::traits::{PutType, ReadError, ReadType};
use crate::record::Key;

/// Encoded size of the full key layout.
pub const FULL_KEY_SIZE: usize = 32;

impl<R> ReadType<R> for Key
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            cid: i32::read(reader)?,
            mid: i64::read(reader)?,
            moid: i32::read(reader)?,
            cap: i64::read(reader)?,
            acq: i64::read(reader)?,
        })
    }
}

impl PutType for Key {
    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.cid);
        buf.put_i64_le(self.mid);
        buf.put_i32_le(self.moid);
        buf.put_i64_le(self.cap);
        buf.put_i64_le(self.acq);
    }
}

/// Writes the key without its cid; `with_acq` keeps or drops the acq field.
pub fn put_key_rest<B: BufMut>(buf: &mut B, key: &Key, with_acq: bool) {
    buf.put_i64_le(key.mid);
    buf.put_i32_le(key.moid);
    buf.put_i64_le(key.cap);
    if with_acq {
        buf.put_i64_le(key.acq);
    }
}

/// Encoded size of the key without its cid.
pub fn key_rest_size(with_acq: bool) -> usize {
    if with_acq {
        28
    } else {
        20
    }
}
