//! Domain types for stored data.

/// Key uniquely identifying a record within the whole of TStorage.
///
/// Ordering is lexicographic in the declared field order. A key is valid iff
/// its `cid` is non-negative; the all `-1` default doubles as the "unset"
/// sentinel.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Key {
    /// Container id, `0..=i32::MAX` for valid keys.
    pub cid: i32,

    /// Measurement id.
    pub mid: i64,

    /// Measurement object id.
    pub moid: i32,

    /// Capture timestamp, nanoseconds since the service epoch.
    pub cap: i64,

    /// Acquisition timestamp, nanoseconds since the service epoch.
    pub acq: i64,
}

impl Key {
    /// Smallest valid key.
    pub const MIN: Self = Self {
        cid: 0,
        mid: i64::MIN,
        moid: i32::MIN,
        cap: i64::MIN,
        acq: i64::MIN,
    };

    /// Largest valid key.
    pub const MAX: Self = Self {
        cid: i32::MAX,
        mid: i64::MAX,
        moid: i32::MAX,
        cap: i64::MAX,
        acq: i64::MAX,
    };

    pub fn new(cid: i32, mid: i64, moid: i32, cap: i64, acq: i64) -> Self {
        Self {
            cid,
            mid,
            moid,
            cap,
            acq,
        }
    }

    /// A key is valid iff its container id is non-negative.
    pub fn valid(&self) -> bool {
        self.cid >= 0
    }
}

impl Default for Key {
    fn default() -> Self {
        Self {
            cid: -1,
            mid: -1,
            moid: -1,
            cap: -1,
            acq: -1,
        }
    }
}

/// Record as stored by TStorage.
///
/// The value is opaque to the wire layer and interpreted only through the
/// channel's [`PayloadType`](crate::payload::PayloadType).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct Record<T> {
    pub key: Key,
    pub value: T,
}

impl<T> Record<T> {
    pub fn new(key: Key, value: T) -> Self {
        Self { key, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_validity() {
        assert!(Key::MIN.valid());
        assert!(Key::MAX.valid());
        assert!(Key::new(0, -5, -5, -5, -5).valid());
        assert!(!Key::default().valid());
        assert!(!Key::new(-7, 0, 0, 0, 0).valid());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(Key::MIN < Key::MAX);
        assert!(Key::new(0, 0, 0, 0, 0) < Key::new(0, 0, 0, 0, 1));
        assert!(Key::new(0, 9, 9, 9, 9) < Key::new(1, 0, 0, 0, 0));
        assert!(Key::new(2, 0, 0, 0, 0) > Key::new(1, 9, 9, 9, 9));
    }

    proptest! {
        #[test]
        fn test_valid_keys_within_bounds(key: Key) {
            if key.valid() {
                assert!(Key::MIN <= key);
                assert!(key <= Key::MAX);
            }
        }

        #[test]
        fn test_validity_is_cid_sign(key: Key) {
            assert_eq!(key.valid(), key.cid >= 0);
        }
    }
}
