//! In-memory record store of the mock server.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::record::Key;
use crate::timestamp;

/// Largest payload accepted on a put, in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 32 * (1 << 20);

/// How far past the remembered acq a requested `key_max.acq` may point
/// before the server clock is consulted again.
pub const ACQ_FOLLOW_THRESHOLD: i64 = 10_000_000;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid header size")]
    InvalidHeaderSize,

    #[error("Invalid record size encountered ({0})")]
    InvalidRecordSize(i64),

    #[error("Invalid cid encountered (in {0:?})")]
    InvalidCid(Key),

    #[error("Invalid key encountered: one of its fields reaches a maximal value (in {0:?})")]
    KeyAtMaximum(Key),

    #[error("Key range \"from the future\" encountered: {0:?}, {1:?}")]
    RangeFromFuture(Key, Key),

    #[error("Empty key range encountered: {0:?}, {1:?}")]
    EmptyRange(Key, Key),
}

/// All fields strictly less. Stricter than the lexicographic key order; a
/// quirk of this mock, not of production servers.
fn componentwise_lt(a: &Key, b: &Key) -> bool {
    a.cid < b.cid && a.mid < b.mid && a.moid < b.moid && a.cap < b.cap && a.acq < b.acq
}

fn componentwise_le(a: &Key, b: &Key) -> bool {
    a.cid <= b.cid && a.mid <= b.mid && a.moid <= b.moid && a.cap <= b.cap && a.acq <= b.acq
}

#[derive(Debug)]
struct Inner {
    /// The uid is assigned monotonically so iteration preserves insertion
    /// order as a tiebreaker.
    db: BTreeMap<(u64, Key), Vec<u8>>,
    uid: u64,
    last_acq: i64,
}

/// Shared in-memory store behind the mock server.
#[derive(Debug)]
pub struct Store {
    inner: Mutex<Inner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                db: BTreeMap::new(),
                uid: 0,
                last_acq: i64::MIN,
            }),
        }
    }

    /// Validates and stores one inbound record.
    ///
    /// Put-without-acq records get the current server time as their acq
    /// before validation.
    pub fn insert(&self, key: Key, payload: Vec<u8>, has_acq: bool) -> Result<(), ProtocolError> {
        let key = if has_acq {
            key
        } else {
            Key {
                acq: timestamp::now_ns(),
                ..key
            }
        };
        validate_key_for_store(&key)?;

        let mut inner = self.inner.lock();
        let uid = inner.uid;
        inner.db.insert((uid, key), payload);
        inner.uid += 1;
        inner.last_acq = timestamp::now_ns();
        Ok(())
    }

    /// Records matching `key_min <= key < key_max` componentwise, in
    /// insertion order.
    pub fn retrieve(
        &self,
        key_min: &Key,
        key_max: &Key,
    ) -> Result<Vec<(Key, Vec<u8>)>, ProtocolError> {
        self.validate_key_range(key_min, key_max)?;

        let inner = self.inner.lock();
        Ok(inner
            .db
            .iter()
            .filter(|((_, key), _)| componentwise_le(key_min, key) && componentwise_lt(key, key_max))
            .map(|((_, key), payload)| (*key, payload.clone()))
            .collect())
    }

    /// The pseudo last acq for a key range.
    ///
    /// When the requested `key_max.acq` runs ahead of the remembered acq by
    /// more than [`ACQ_FOLLOW_THRESHOLD`], the clock is consulted; the
    /// result is then clamped to `key_max.acq`.
    pub fn get_acq(&self, key_min: &Key, key_max: &Key) -> Result<i64, ProtocolError> {
        self.validate_key_range(key_min, key_max)?;

        let mut inner = self.inner.lock();
        if key_max.acq > inner.last_acq.saturating_add(ACQ_FOLLOW_THRESHOLD) {
            inner.last_acq = timestamp::now_ns();
        }
        inner.last_acq = key_max.acq.min(inner.last_acq);
        Ok(inner.last_acq)
    }

    fn validate_key_range(&self, key_min: &Key, key_max: &Key) -> Result<(), ProtocolError> {
        validate_key(key_min)?;
        validate_key(key_max)?;
        if key_min.acq > self.inner.lock().last_acq {
            return Err(ProtocolError::RangeFromFuture(*key_min, *key_max));
        }
        if !componentwise_lt(key_min, key_max) {
            return Err(ProtocolError::EmptyRange(*key_min, *key_max));
        }
        Ok(())
    }
}

fn validate_key(key: &Key) -> Result<(), ProtocolError> {
    if key.cid < 0 {
        return Err(ProtocolError::InvalidCid(*key));
    }
    Ok(())
}

fn validate_key_for_store(key: &Key) -> Result<(), ProtocolError> {
    validate_key(key)?;
    if !componentwise_lt(key, &Key::MAX) {
        return Err(ProtocolError::KeyAtMaximum(*key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_put_assigns_acq() {
        let store = Store::new();
        store
            .insert(Key::new(0, 1, 2, 3, i64::MIN), b"x".to_vec(), false)
            .unwrap();

        let records = store.retrieve(&Key::MIN, &Key::MAX).unwrap();
        assert_eq!(records.len(), 1);
        // The sentinel acq was replaced by server time.
        assert!(records[0].0.acq > 0);
    }

    #[test]
    fn test_puta_keeps_acq() {
        let store = Store::new();
        store
            .insert(Key::new(0, 1, 2, 3, 10), b"x".to_vec(), true)
            .unwrap();
        // Raise last_acq so the retrieval range is not from the future.
        store.insert(Key::new(0, 9, 9, 9, 11), b"y".to_vec(), true).unwrap();

        let records = store.retrieve(&Key::MIN, &Key::MAX).unwrap();
        assert_eq!(records[0].0.acq, 10);
    }

    #[test]
    fn test_retrieve_preserves_insertion_order() {
        let store = Store::new();
        for mid in [5i64, 1, 3] {
            store
                .insert(Key::new(0, mid, 0, 0, 0), mid.to_le_bytes().to_vec(), false)
                .unwrap();
        }

        let records = store.retrieve(&Key::MIN, &Key::MAX).unwrap();
        let mids: Vec<i64> = records.iter().map(|(key, _)| key.mid).collect();
        assert_eq!(mids, vec![5, 1, 3]);
    }

    #[test]
    fn test_range_is_componentwise_strict() {
        let store = Store::new();
        store.insert(Key::new(1, 1, 1, 1, 0), b"x".to_vec(), false).unwrap();

        // Equal cids make the range empty under the componentwise rule even
        // though it is non-empty lexicographically.
        let err = store
            .retrieve(&Key::new(1, 0, 0, 0, 0), &Key::new(1, 9, 9, 9, 9))
            .unwrap_err();
        assert_matches!(err, ProtocolError::EmptyRange(_, _));
    }

    #[test]
    fn test_rejects_invalid_cid() {
        let store = Store::new();
        let err = store
            .insert(Key::new(-1, 0, 0, 0, 0), vec![], false)
            .unwrap_err();
        assert_matches!(err, ProtocolError::InvalidCid(_));

        let err = store
            .retrieve(&Key::new(-1, 0, 0, 0, 0), &Key::MAX)
            .unwrap_err();
        assert_matches!(err, ProtocolError::InvalidCid(_));
    }

    #[test]
    fn test_rejects_key_at_maximum() {
        let store = Store::new();
        let err = store.insert(Key::MAX, vec![], true).unwrap_err();
        assert_matches!(err, ProtocolError::KeyAtMaximum(_));
    }

    #[test]
    fn test_rejects_range_from_future() {
        let store = Store::new();
        let key_min = Key::new(0, 0, 0, 0, i64::MAX - 1);
        let err = store.retrieve(&key_min, &Key::MAX).unwrap_err();
        assert_matches!(err, ProtocolError::RangeFromFuture(_, _));
    }

    #[test]
    fn test_get_acq_clamps_to_requested() {
        let store = Store::new();
        // A stored record moves last_acq to the current clock.
        store.insert(Key::new(0, 0, 0, 0, 0), vec![], false).unwrap();

        let key_max = Key::new(2, 13, 4, 11, 15);
        let acq = store.get_acq(&Key::new(0, 0, 0, 0, 0), &key_max).unwrap();
        assert_eq!(acq, 15);
    }

    #[test]
    fn test_get_acq_refreshes_when_far_ahead() {
        let store = Store::new();
        store.insert(Key::new(0, 0, 0, 0, 0), vec![], false).unwrap();

        // Far beyond the follow threshold: the clock is consulted, then
        // clamped by the request.
        let key_max = Key::new(2, 13, 4, 11, i64::MAX);
        let acq = store.get_acq(&Key::new(0, 0, 0, 0, 0), &key_max).unwrap();
        assert!(acq > 0);
        assert!(acq < i64::MAX);
    }
}
