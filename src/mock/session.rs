//! Per-connection protocol handling of the mock server.
//!
//! One session serves requests strictly in sequence, exactly like a real
//! single-connection client drives them. Failures are reported in-band by a
//! `(status = -1, size = 0)` response; during an in-flight GET the record
//! stream terminator goes out first so the client parser stays in sync.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::mock::log::WireLog;
use crate::mock::store::{ProtocolError, Store, MAX_PAYLOAD_SIZE};
use crate::protocol::command::CommandType;
use crate::protocol::header::RequestHeader;
use crate::protocol::key::key_rest_size;
use crate::protocol::traits::{PutType, ReadError, ReadType};
use crate::protocol::KEYRANGE_AUX_SIZE;
use crate::record::Key;
use crate::timestamp;

use bytes::BufMut;

const READ_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("read timed out")]
    Timeout,

    #[error(transparent)]
    Read(#[from] ReadError),
}

pub(crate) async fn serve(
    stream: TcpStream,
    store: Arc<Store>,
    log: Option<Arc<Mutex<WireLog>>>,
) -> Result<(), SessionError> {
    if let Some(log) = &log {
        log.lock().session_start();
    }
    let mut session = Session { stream, log };
    let result = session.run(&store).await;
    if let Some(log) = &session.log {
        log.lock().session_end();
    }
    result
}

pub(crate) type SharedLog = Arc<Mutex<WireLog>>;

pub(crate) fn open_log(path: &Path) -> std::io::Result<SharedLog> {
    Ok(Arc::new(Mutex::new(WireLog::open(path)?)))
}

struct Session {
    stream: TcpStream,
    log: Option<SharedLog>,
}

impl Session {
    async fn run(&mut self, store: &Store) -> Result<(), SessionError> {
        loop {
            let cmd = match self.fetch_header().await? {
                None => {
                    debug!("session terminated");
                    return Ok(());
                }
                Some(Ok(cmd)) => cmd,
                Some(Err(error)) => {
                    warn!(%error, "rejecting request");
                    self.send_error().await?;
                    return Ok(());
                }
            };

            debug!(?cmd, "requested");
            let keep_serving = match cmd {
                CommandType::PutSafe => self.handle_put(store, false).await?,
                CommandType::PutASafe => self.handle_put(store, true).await?,
                CommandType::Get => self.handle_get(store).await?,
                CommandType::GetAcq => self.handle_get_acq(store).await?,
                CommandType::Null | CommandType::Unknown(_) => false,
            };
            if !keep_serving {
                return Ok(());
            }
        }
    }

    /// Reads the next request header. `None` means the peer closed the
    /// session cleanly; an inner error means the header was malformed.
    async fn fetch_header(
        &mut self,
    ) -> Result<Option<Result<CommandType, ProtocolError>>, SessionError> {
        self.section("recv header");
        let mut buf = [0u8; RequestHeader::SIZE];
        let n = self.read_some(&mut buf).await?;
        if n == 0 {
            self.end_section();
            return Ok(None);
        }
        if n < buf.len() {
            self.read_exact(&mut buf[n..]).await?;
        }
        self.end_section();

        let header = RequestHeader::read(&mut Cursor::new(&buf[..]))?;
        let cmd = CommandType::from(header.status);

        // GET-family headers count the two keys into `size`; anything on
        // top of the historical 64 is surplus to be skipped.
        let surplus = match cmd {
            CommandType::Get | CommandType::GetAcq => {
                match header.size.checked_sub(KEYRANGE_AUX_SIZE) {
                    Some(surplus) => surplus,
                    None => return Ok(Some(Err(ProtocolError::InvalidHeaderSize))),
                }
            }
            _ => header.size,
        };
        self.skip(surplus).await?;

        Ok(Some(Ok(cmd)))
    }

    async fn handle_put(&mut self, store: &Store, has_acq: bool) -> Result<bool, SessionError> {
        let acq_response = timestamp::now_ns();
        match self.store_records(store, has_acq).await? {
            Err(error) => {
                warn!(%error, "put rejected");
                self.send_error().await?;
                Ok(false)
            }
            Ok(()) => {
                debug!("store complete, sending status response");
                if has_acq {
                    self.send_two_acqs(0, -1, -1).await?;
                } else {
                    self.send_two_acqs(0, acq_response, acq_response).await?;
                }
                Ok(true)
            }
        }
    }

    async fn handle_get(&mut self, store: &Store) -> Result<bool, SessionError> {
        let (key_min, key_max) = self.fetch_key_pair().await?;
        // The request is acknowledged before the range is validated, so a
        // validation failure is reported after the record stream terminator.
        self.send_response(0).await?;

        match store.retrieve(&key_min, &key_max) {
            Err(error) => {
                warn!(%error, "get rejected");
                self.send_term().await?;
                self.send_error().await?;
                Ok(false)
            }
            Ok(records) => {
                debug!(count = records.len(), "sending records");
                self.send_records(&records).await?;
                self.send_term().await?;
                match store.get_acq(&key_min, &key_max) {
                    Err(error) => {
                        warn!(%error, "acq lookup failed");
                        self.send_error().await?;
                        Ok(false)
                    }
                    Ok(acq) => {
                        self.send_acq(0, acq).await?;
                        Ok(true)
                    }
                }
            }
        }
    }

    async fn handle_get_acq(&mut self, store: &Store) -> Result<bool, SessionError> {
        let (key_min, key_max) = self.fetch_key_pair().await?;
        match store.get_acq(&key_min, &key_max) {
            Err(error) => {
                warn!(%error, "get acq rejected");
                self.send_error().await?;
                Ok(false)
            }
            Ok(acq) => {
                debug!(acq, "sending acq");
                self.send_acq(0, acq).await?;
                Ok(true)
            }
        }
    }

    async fn fetch_key_pair(&mut self) -> Result<(Key, Key), SessionError> {
        self.section("recv key pair");
        let mut buf = [0u8; 64];
        self.read_exact(&mut buf).await?;
        self.end_section();
        let mut cursor = Cursor::new(&buf[..]);
        let key_min = Key::read(&mut cursor)?;
        let key_max = Key::read(&mut cursor)?;
        debug!(?key_min, ?key_max, "got key range");
        Ok((key_min, key_max))
    }

    /// Consumes the inbound record stream of a put, inserting record by
    /// record until the `-1` terminator.
    async fn store_records(
        &mut self,
        store: &Store,
        has_acq: bool,
    ) -> Result<Result<(), ProtocolError>, SessionError> {
        self.section("recv records");
        let key_rest = key_rest_size(has_acq);
        let min_size = key_rest as i64;
        let max_size = (key_rest + MAX_PAYLOAD_SIZE) as i64;

        let result = loop {
            let cid = self.read_i32().await?;
            if cid < 0 {
                break Ok(());
            }
            let mut batch_size = i64::from(self.read_i32().await?);
            let mut failed = None;
            while batch_size > 0 {
                let record_size = i64::from(self.read_i32().await?);
                if record_size < min_size || record_size > max_size {
                    failed = Some(ProtocolError::InvalidRecordSize(record_size));
                    break;
                }

                let mut buf = vec![0u8; key_rest];
                self.read_exact(&mut buf).await?;
                let mut cursor = Cursor::new(&buf[..]);
                let key = Key {
                    cid,
                    mid: i64::read(&mut cursor)?,
                    moid: i32::read(&mut cursor)?,
                    cap: i64::read(&mut cursor)?,
                    acq: if has_acq {
                        i64::read(&mut cursor)?
                    } else {
                        i64::MIN
                    },
                };

                let mut payload = vec![0u8; record_size as usize - key_rest];
                self.read_exact(&mut payload).await?;
                debug!(?key, "storing record");

                if let Err(error) = store.insert(key, payload, has_acq) {
                    failed = Some(error);
                    break;
                }
                batch_size -= record_size + 4;
            }
            if let Some(error) = failed {
                break Err(error);
            }
        };
        self.end_section();
        Ok(result)
    }

    async fn send_records(&mut self, records: &[(Key, Vec<u8>)]) -> Result<(), SessionError> {
        self.section("send records");
        for (key, payload) in records {
            let mut buf = Vec::with_capacity(4 + 32 + payload.len());
            buf.put_i32_le(payload.len() as i32 + 32);
            key.put(&mut buf);
            buf.extend_from_slice(payload);
            self.send(&buf).await?;
        }
        self.end_section();
        Ok(())
    }

    async fn send_response(&mut self, status: i32) -> Result<(), SessionError> {
        self.section("send response");
        let mut buf = Vec::with_capacity(RequestHeader::SIZE);
        RequestHeader { status, size: 0 }.put(&mut buf);
        let result = self.send(&buf).await;
        self.end_section();
        result
    }

    async fn send_error(&mut self) -> Result<(), SessionError> {
        self.send_response(-1).await
    }

    async fn send_acq(&mut self, status: i32, acq: i64) -> Result<(), SessionError> {
        self.section("send acq");
        let mut buf = Vec::with_capacity(RequestHeader::SIZE + 8);
        RequestHeader { status, size: 8 }.put(&mut buf);
        buf.put_i64_le(acq);
        let result = self.send(&buf).await;
        self.end_section();
        result
    }

    async fn send_two_acqs(
        &mut self,
        status: i32,
        acq_min: i64,
        acq_max: i64,
    ) -> Result<(), SessionError> {
        self.section("send two acqs");
        let mut buf = Vec::with_capacity(RequestHeader::SIZE + 16);
        RequestHeader { status, size: 16 }.put(&mut buf);
        buf.put_i64_le(acq_min);
        buf.put_i64_le(acq_max);
        let result = self.send(&buf).await;
        self.end_section();
        result
    }

    async fn send_term(&mut self) -> Result<(), SessionError> {
        self.section("send term");
        let result = self.send(&0i32.to_le_bytes()).await;
        self.end_section();
        result
    }

    async fn read_i32(&mut self) -> Result<i32, SessionError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).await?;
        Ok(i32::from_le_bytes(buf))
    }

    async fn skip(&mut self, surplus: u64) -> Result<(), SessionError> {
        let mut scratch = [0u8; 256];
        let mut remaining = surplus;
        while remaining > 0 {
            let take = remaining.min(scratch.len() as u64) as usize;
            self.read_exact(&mut scratch[..take]).await?;
            remaining -= take as u64;
        }
        Ok(())
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
        let n = timeout(READ_TIMEOUT, self.stream.read(buf))
            .await
            .map_err(|_| SessionError::Timeout)??;
        if n > 0 {
            if let Some(log) = &self.log {
                log.lock().recv(&buf[..n]);
            }
        }
        Ok(n)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SessionError> {
        if buf.is_empty() {
            return Ok(());
        }
        timeout(READ_TIMEOUT, self.stream.read_exact(buf))
            .await
            .map_err(|_| SessionError::Timeout)??;
        if let Some(log) = &self.log {
            log.lock().recv(buf);
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if let Some(log) = &self.log {
            log.lock().send(data);
        }
        self.stream.write_all(data).await?;
        Ok(())
    }

    fn section(&mut self, name: &str) {
        if let Some(log) = &self.log {
            log.lock().enter(name);
        }
    }

    fn end_section(&mut self) {
        if let Some(log) = &self.log {
            log.lock().exit();
        }
    }
}
