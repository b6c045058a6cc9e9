//! Outbound record batching.
//!
//! Put requests carry records as per-cid groups: `cid:i32`, `batch_bytes:i32`,
//! then the group payload of size-prefixed records. [`BatchFrames`] walks an
//! input record set lazily and emits one such frame at a time, splitting a
//! group whenever the in-flight payload would exceed `max_batch_size`. The
//! trailing `-1` stream terminator is the channel's job, not the batcher's.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::payload::PayloadType;
use crate::protocol::key::{key_rest_size, put_key_rest};
use crate::record::Record;

/// Iterator over encoded group frames of an outbound record stream.
///
/// Records are bucketed by cid in first-seen order; order within a group is
/// preserved, order across groups is unspecified. An invalid key (`cid < 0`)
/// either gets skipped (`skip_invalid`) or flushes the in-flight frame and
/// stops the stream early, leaving a truncated but structurally valid put.
pub(crate) struct BatchFrames<'a, P: PayloadType> {
    payload_type: &'a P,
    groups: Vec<(i32, Vec<&'a Record<P::Value>>)>,
    with_acq: bool,
    max_batch_size: usize,
    skip_invalid: bool,
    group: usize,
    index: usize,
    payload: BytesMut,
    stopped: bool,
}

impl<'a, P> BatchFrames<'a, P>
where
    P: PayloadType,
{
    pub(crate) fn new(
        records: &'a [Record<P::Value>],
        with_acq: bool,
        payload_type: &'a P,
        max_batch_size: usize,
        skip_invalid: bool,
    ) -> Self {
        let mut groups: Vec<(i32, Vec<&'a Record<P::Value>>)> = Vec::new();
        let mut index_by_cid: HashMap<i32, usize> = HashMap::new();
        for record in records {
            let index = *index_by_cid.entry(record.key.cid).or_insert_with(|| {
                groups.push((record.key.cid, Vec::new()));
                groups.len() - 1
            });
            groups[index].1.push(record);
        }

        Self {
            payload_type,
            groups,
            with_acq,
            max_batch_size,
            skip_invalid,
            group: 0,
            index: 0,
            payload: BytesMut::new(),
            stopped: false,
        }
    }

    /// Flushes the in-flight payload as a complete `cid + length + payload`
    /// frame.
    fn frame(&mut self, cid: i32) -> Bytes {
        let payload = self.payload.split();
        let mut frame = BytesMut::with_capacity(8 + payload.len());
        frame.put_i32_le(cid);
        frame.put_i32_le(payload.len() as i32);
        frame.extend_from_slice(&payload);
        frame.freeze()
    }
}

impl<'a, P> Iterator for BatchFrames<'a, P>
where
    P: PayloadType,
{
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.stopped {
            return None;
        }

        while self.group < self.groups.len() {
            let cid = self.groups[self.group].0;

            while self.index < self.groups[self.group].1.len() {
                let record = self.groups[self.group].1[self.index];

                if !record.key.valid() {
                    if self.skip_invalid {
                        self.index += 1;
                        continue;
                    }
                    self.stopped = true;
                    return Some(self.frame(cid));
                }

                let raw_payload = self.payload_type.to_bytes(&record.value);
                let record_size = key_rest_size(self.with_acq) + raw_payload.len();

                // Flush first when the record would overflow the frame, but
                // never leave a record unserialisable: an empty payload always
                // accepts one record regardless of `max_batch_size`.
                if !self.payload.is_empty()
                    && self.payload.len() + record_size > self.max_batch_size
                {
                    return Some(self.frame(cid));
                }

                self.payload.put_i32_le(record_size as i32);
                put_key_rest(&mut self.payload, &record.key, self.with_acq);
                self.payload.extend_from_slice(&raw_payload);
                self.index += 1;
            }

            self.group += 1;
            self.index = 0;
            return Some(self.frame(cid));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::payload::{BytesPayloadType, ScalarPayloadType};
    use crate::record::Key;

    fn record(cid: i32, mid: i64, value: &[u8]) -> Record<Vec<u8>> {
        Record::new(Key::new(cid, mid, 0, 0, 0), value.to_vec())
    }

    fn collect(
        records: &[Record<Vec<u8>>],
        with_acq: bool,
        max_batch_size: usize,
        skip_invalid: bool,
    ) -> Vec<Bytes> {
        BatchFrames::new(
            records,
            with_acq,
            &BytesPayloadType,
            max_batch_size,
            skip_invalid,
        )
        .collect()
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        assert!(collect(&[], true, usize::MAX, false).is_empty());
    }

    #[test]
    fn test_single_group_layout() {
        let records = vec![record(3, 1, b"ab"), record(3, 2, b"")];
        let frames = collect(&records, true, usize::MAX, false);
        assert_eq!(frames.len(), 1);

        let frame = &frames[0];
        // cid, then batch_bytes = (4 + 30) + (4 + 28)
        assert_eq!(&frame[..4], &3i32.to_le_bytes());
        assert_eq!(&frame[4..8], &66i32.to_le_bytes());
        // First record: size prefix and 28-byte key rest then the payload.
        assert_eq!(&frame[8..12], &30i32.to_le_bytes());
        assert_eq!(&frame[12..20], &1i64.to_le_bytes());
        assert_eq!(&frame[40..42], b"ab");
        assert_eq!(frame.len(), 8 + 66);
    }

    #[test]
    fn test_without_acq_drops_trailing_field() {
        let records = vec![record(0, 1, b"xyz")];
        let frames = collect(&records, false, usize::MAX, false);
        // 4 + (4 + 20 + 3)
        assert_eq!(frames[0].len(), 8 + 27);
        assert_eq!(&frames[0][8..12], &23i32.to_le_bytes());
    }

    #[test]
    fn test_max_batch_size_splits_groups() {
        let records = vec![
            record(1, 1, b"0123456789"),
            record(1, 2, b"0123456789"),
            record(1, 3, b"0123456789"),
        ];
        // Each record is 28 + 10 = 38 payload bytes; a 40-byte bound fits
        // exactly one per frame.
        let frames = collect(&records, true, 40, false);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert_eq!(&frame[..4], &1i32.to_le_bytes());
            assert_eq!(&frame[4..8], &42i32.to_le_bytes());
        }
    }

    #[test]
    fn test_one_record_always_fits() {
        let records = vec![record(1, 1, b"0123456789")];
        let frames = collect(&records, true, 1, false);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 8 + 4 + 38);
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let records = vec![record(7, 1, b"a"), record(2, 2, b"b"), record(7, 3, b"c")];
        let frames = collect(&records, true, usize::MAX, false);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..4], &7i32.to_le_bytes());
        assert_eq!(&frames[1][..4], &2i32.to_le_bytes());
        // Both cid-7 records land in the first frame, in input order.
        assert_eq!(&frames[0][4..8], &66i32.to_le_bytes());
        assert_eq!(&frames[0][12..20], &1i64.to_le_bytes());
        assert_eq!(&frames[0][45..53], &3i64.to_le_bytes());
    }

    #[test]
    fn test_invalid_key_stops_stream() {
        let records = vec![record(1, 1, b"a"), record(-1, 2, b"b"), record(1, 3, b"c")];
        let frames = collect(&records, true, usize::MAX, false);
        // Grouping happens before emission, so both cid-1 records land in
        // the first frame; the invalid group then flushes as an empty frame
        // carrying its own cid, and nothing follows.
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..4], &1i32.to_le_bytes());
        assert_eq!(&frames[0][4..8], &66i32.to_le_bytes());
        assert_eq!(&frames[1][..4], &(-1i32).to_le_bytes());
        assert_eq!(&frames[1][4..8], &0i32.to_le_bytes());
        assert_eq!(frames[1].len(), 8);
    }

    #[test]
    fn test_invalid_key_drops_later_groups() {
        let records = vec![record(1, 1, b"a"), record(-1, 2, b"b"), record(2, 3, b"c")];
        let frames = collect(&records, true, usize::MAX, false);
        // The group after the invalid one is never emitted.
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..4], &1i32.to_le_bytes());
        assert_eq!(&frames[0][4..8], &33i32.to_le_bytes());
        assert_eq!(&frames[1][..4], &(-1i32).to_le_bytes());
        assert_eq!(&frames[1][4..8], &0i32.to_le_bytes());
    }

    #[test]
    fn test_invalid_key_skipped_on_request() {
        let records = vec![record(1, 1, b"a"), record(-1, 2, b"b"), record(1, 3, b"c")];
        let frames = collect(&records, true, usize::MAX, true);
        // Both valid records survive; the skipped record's group still
        // closes with an empty frame.
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][4..8], &66i32.to_le_bytes());
        assert_eq!(&frames[1][..4], &(-1i32).to_le_bytes());
        assert_eq!(&frames[1][4..8], &0i32.to_le_bytes());
    }

    #[test]
    fn test_scalar_payloads() {
        let payload_type = ScalarPayloadType::<i32>::new();
        let records = vec![Record::new(Key::new(0, 0, 0, 0, 0), 314)];
        let frames: Vec<_> =
            BatchFrames::new(&records, true, &payload_type, usize::MAX, false).collect();
        assert_eq!(frames[0].len(), 8 + 4 + 28 + 4);
        assert_eq!(&frames[0][40..44], &314i32.to_le_bytes());
    }
}
