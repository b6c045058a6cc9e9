mod test_helpers;

use tstorage_client::mock::MAX_PAYLOAD_SIZE;
use tstorage_client::{
    BytesPayloadType, Channel, GetItem, Key, Record, ResponseStatus, ScalarPayloadType,
};

use crate::test_helpers::{maybe_start_logging, start_mock_server};

async fn connected_channel<P>(payload_type: P) -> (Channel<P>, std::net::SocketAddr)
where
    P: tstorage_client::PayloadType,
{
    let addr = start_mock_server().await;
    let mut channel = Channel::new(addr.ip().to_string(), addr.port(), payload_type);
    assert!(channel.connect().await.is_ok());
    (channel, addr)
}

#[tokio::test]
async fn connect_and_close() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    assert_eq!(channel.close().await.status, ResponseStatus::Ok);
    // The second close has nothing to close.
    assert_eq!(channel.close().await.status, ResponseStatus::Error);
}

#[tokio::test]
async fn requests_on_disconnected_channel() {
    maybe_start_logging();

    let mut channel = Channel::new("127.0.0.1", 1, ScalarPayloadType::<i64>::new());
    assert_eq!(
        channel.put(&[]).await.status,
        ResponseStatus::Disconnected
    );
    assert_eq!(
        channel.get(Key::MIN, Key::MAX).await.status,
        ResponseStatus::Disconnected
    );
    assert_eq!(
        channel.get_acq(Key::MIN, Key::MAX).await.status,
        ResponseStatus::Disconnected
    );
}

#[tokio::test]
async fn put_then_get() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    let records = vec![
        Record::new(Key::new(0, 12, 0, 10, -1), 314),
        Record::new(Key::new(1, 12, 1, 10, -1), 314),
    ];
    assert!(channel.put(&records).await.is_ok());

    let response = channel.get(Key::MIN, Key::MAX).await;
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.data.len(), 2);

    // The server overwrites acq; everything else round-trips.
    let mut got: Vec<(i32, i64, i32, i64, i64)> = response
        .data
        .iter()
        .map(|r| (r.key.cid, r.key.mid, r.key.moid, r.key.cap, r.value))
        .collect();
    got.sort();
    assert_eq!(got, vec![(0, 12, 0, 10, 314), (1, 12, 1, 10, 314)]);
    for record in &response.data {
        assert!(record.key.acq > 0);
    }
}

#[tokio::test]
async fn puta_preserves_acq() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    let records = vec![
        Record::new(Key::new(0, 12, 2, 10, 10), 314),
        Record::new(Key::new(1, 12, 3, 10, 11), 314),
    ];
    assert!(channel.puta(&records).await.is_ok());

    let response = channel
        .get(Key::new(0, 0, 0, 0, 0), Key::new(2, 35, 4, 11, Key::MAX.acq))
        .await;
    assert_eq!(response.status, ResponseStatus::Ok);

    let mut got = response.data.clone();
    got.sort_by_key(|r| r.key);
    assert_eq!(got, records);
}

#[tokio::test]
async fn get_acq_clamps_to_request() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    // A put moves the server's remembered acq to its current clock, far
    // beyond the requested 15.
    assert!(channel
        .put(&[Record::new(Key::new(0, 0, 0, 0, -1), 1)])
        .await
        .is_ok());

    let response = channel
        .get_acq(Key::new(0, 0, 0, 0, 0), Key::new(2, 13, 4, 11, 15))
        .await;
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.acq, 15);
}

#[tokio::test]
async fn get_with_memory_limit_too_small() {
    maybe_start_logging();

    let addr = start_mock_server().await;
    let mut channel = Channel::builder(
        addr.ip().to_string(),
        addr.port(),
        ScalarPayloadType::<i32>::new(),
    )
    .memory_limit(4)
    .build();
    assert!(channel.connect().await.is_ok());
    assert!(channel
        .put(&[Record::new(Key::new(0, 1, 2, 3, -1), 314)])
        .await
        .is_ok());

    let response = channel.get(Key::MIN, Key::MAX).await;
    assert_eq!(response.status, ResponseStatus::NoMemory);
    assert!(response.data.is_empty());

    // The failed get closed the connection.
    assert_eq!(channel.close().await.status, ResponseStatus::Error);
}

#[tokio::test]
async fn get_stream_with_memory_limit_too_small() {
    maybe_start_logging();

    let addr = start_mock_server().await;
    let mut channel = Channel::builder(
        addr.ip().to_string(),
        addr.port(),
        ScalarPayloadType::<i32>::new(),
    )
    .memory_limit(4)
    .build();
    assert!(channel.connect().await.is_ok());
    assert!(channel
        .put(&[Record::new(Key::new(0, 1, 2, 3, -1), 314)])
        .await
        .is_ok());

    let mut batches = 0usize;
    let response = channel
        .get_stream(Key::MIN, Key::MAX, |_| batches += 1)
        .await;
    assert_eq!(response.status, ResponseStatus::NoMemory);
    assert_eq!(batches, 0);
}

#[tokio::test]
async fn get_stream_flushes_batches_of_one() {
    maybe_start_logging();

    let addr = start_mock_server().await;
    let mut channel = Channel::builder(
        addr.ip().to_string(),
        addr.port(),
        ScalarPayloadType::<i32>::new(),
    )
    // Just above one record's framing: every batch holds a single record.
    .memory_limit(64)
    .build();
    assert!(channel.connect().await.is_ok());

    let records: Vec<_> = (0..3)
        .map(|mid| Record::new(Key::new(0, mid, 0, 10, -1), 314))
        .collect();
    assert!(channel.put(&records).await.is_ok());

    let mut batches = Vec::new();
    let response = channel
        .get_stream(Key::MIN, Key::MAX, |batch| batches.push(batch.len()))
        .await;
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(batches, vec![1, 1, 1]);
}

#[tokio::test]
async fn get_iter_yields_records_then_terminal() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    let records: Vec<_> = (0..8)
        .map(|mid| Record::new(Key::new(0, mid, 0, 10, -1), mid))
        .collect();
    assert!(channel.put(&records).await.is_ok());

    let mut iter = channel.get_iter(Key::MIN, Key::MAX);
    let mut yielded = Vec::new();
    let mut terminal = None;
    while let Some(item) = iter.next().await {
        match item {
            GetItem::Record(record) => yielded.push(record),
            GetItem::Done(response) => {
                assert!(terminal.is_none());
                terminal = Some(response);
            }
        }
    }
    drop(iter);

    assert_eq!(yielded.len(), 8);
    let mids: Vec<i64> = yielded.iter().map(|r| r.key.mid).collect();
    assert_eq!(mids, (0..8).collect::<Vec<_>>());
    assert_eq!(terminal.unwrap().status, ResponseStatus::Ok);

    // A finished iterator leaves the session usable.
    assert_eq!(channel.close().await.status, ResponseStatus::Ok);
}

#[tokio::test]
async fn abandoned_get_iter_closes_the_session() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    assert!(channel
        .put(&[Record::new(Key::new(0, 1, 0, 10, -1), 1)])
        .await
        .is_ok());

    let mut iter = channel.get_iter(Key::MIN, Key::MAX);
    // Take the record but never the terminal response.
    assert!(matches!(iter.next().await, Some(GetItem::Record(_))));
    drop(iter);

    assert_eq!(channel.close().await.status, ResponseStatus::Error);
}

#[tokio::test]
async fn empty_put_succeeds() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    assert!(channel.put(&[]).await.is_ok());
}

#[tokio::test]
async fn empty_key_range_is_an_error() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    assert!(channel
        .put(&[Record::new(Key::new(0, 1, 0, 10, -1), 1)])
        .await
        .is_ok());

    // The mock wants all fields strictly increasing across the range.
    let key = Key::new(0, 0, 0, 0, 0);
    let response = channel.get(key, key).await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn get_acq_rejects_empty_range() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    assert!(channel
        .put(&[Record::new(Key::new(0, 1, 0, 10, -1), 1)])
        .await
        .is_ok());

    let key = Key::new(0, 0, 0, 0, 0);
    let response = channel.get_acq(key, key).await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.acq, -1);
}

#[tokio::test]
async fn mismatched_payload_type_is_unparseable() {
    maybe_start_logging();

    let addr = start_mock_server().await;
    let mut writer = Channel::new(addr.ip().to_string(), addr.port(), BytesPayloadType);
    assert!(writer.connect().await.is_ok());
    assert!(writer
        .put(&[Record::new(Key::new(0, 1, 2, 3, -1), vec![1, 2, 3])])
        .await
        .is_ok());

    // Three payload bytes can never parse as an i64.
    let mut reader = Channel::new(
        addr.ip().to_string(),
        addr.port(),
        ScalarPayloadType::<i64>::new(),
    );
    assert!(reader.connect().await.is_ok());
    let response = reader.get(Key::MIN, Key::MAX).await;
    assert_eq!(response.status, ResponseStatus::UnparseableEntity);
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn oversized_record_is_rejected_by_the_server() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(BytesPayloadType).await;
    let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
    let response = channel
        .put(&[Record::new(Key::new(0, 1, 2, 3, -1), payload)])
        .await;
    // The server rejects the record and closes; depending on how fast it
    // does so the client sees the error response or the dropped connection.
    assert!(matches!(
        response.status,
        ResponseStatus::Error | ResponseStatus::Disconnected
    ));
}

#[tokio::test]
async fn sequential_requests_reuse_the_session() {
    maybe_start_logging();

    let (mut channel, _) = connected_channel(ScalarPayloadType::<i64>::new()).await;
    let records = vec![
        Record::new(Key::new(0, 1, 0, 10, -1), 7),
        Record::new(Key::new(0, 2, 0, 10, -1), 8),
    ];
    assert!(channel.put(&records).await.is_ok());

    let first = channel.get(Key::MIN, Key::MAX).await;
    assert_eq!(first.status, ResponseStatus::Ok);
    let second = channel.get(Key::MIN, Key::MAX).await;
    assert_eq!(second.status, ResponseStatus::Ok);
    assert_eq!(first.data, second.data);

    let acq = channel.get_acq(Key::MIN, Key::MAX).await;
    assert_eq!(acq.status, ResponseStatus::Ok);
}
