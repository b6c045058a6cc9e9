//! TStorage communication channels.
//!
//! A [`Channel`] owns one connection and drives requests over it strictly
//! one at a time. This module is the async flavour; [`blocking`] hosts the
//! synchronous counterpart with identical request semantics. The wire-level
//! state machine shared by both lives in the private `session` module.
//!
//! All request outcomes are reported as [`Response`]-family values. Any
//! failed get-style request closes the connection before returning; puts
//! leave the transport alone and let the caller decide.

use std::collections::VecDeque;
use std::mem;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::connection::transport::Transport;
use crate::connection::TlsConfig;
use crate::payload::PayloadType;
use crate::protocol::batch::BatchFrames;
use crate::protocol::command::CommandType;
use crate::protocol::header::RequestHeader;
use crate::protocol::{ACQS_PAIR_SIZE, ACQ_SIZE};
use crate::record::{Key, Record};
use crate::response::{Response, ResponseAcq, ResponseGet, ResponseStatus};

pub mod blocking;
pub(crate) mod buffer;
pub(crate) mod session;

use buffer::ReceiveBuffer;
use session::{AuxFormat, GetStage, RecordsParsing};

/// Default initial receive-buffer capacity for get requests.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65536;

/// Knobs of a put request.
#[derive(Debug, Clone, Copy)]
pub struct PutOptions {
    /// Upper bound on a single group frame's payload, in bytes. One record
    /// is always serialised regardless of the bound.
    pub max_batch_size: usize,

    /// Skip records with invalid keys instead of cutting the put short at
    /// the first one.
    pub skip_invalid: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            max_batch_size: i32::MAX as usize,
            skip_invalid: false,
        }
    }
}

/// Builder for [`Channel`].
#[derive(Debug)]
pub struct ChannelBuilder<P> {
    host: String,
    port: u16,
    payload_type: P,
    memory_limit: Option<usize>,
    recv_buffer_size: usize,
    tls_config: TlsConfig,
}

impl<P> ChannelBuilder<P>
where
    P: PayloadType,
{
    pub fn new(host: impl Into<String>, port: u16, payload_type: P) -> Self {
        Self {
            host: host.into(),
            port,
            payload_type,
            memory_limit: None,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            tls_config: TlsConfig::default(),
        }
    }

    /// Caps the total bytes a single get request may pull in. Unlimited by
    /// default.
    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    /// Initial receive-buffer capacity for get requests.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Setup TLS.
    #[cfg(feature = "transport-tls")]
    pub fn tls_config(mut self, tls_config: std::sync::Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    pub fn build(self) -> Channel<P> {
        Channel {
            host: self.host,
            port: self.port,
            payload_type: self.payload_type,
            memory_limit: self.memory_limit,
            recv_buffer_size: self.recv_buffer_size,
            tls_config: self.tls_config,
            transport: None,
        }
    }
}

/// Async TStorage communication channel.
///
/// One logical client-server connection carrying a sequential stream of
/// requests. Deadlines are the ambient runtime's business; wrap individual
/// calls in `tokio::time::timeout` as needed. Dropping the channel drops the
/// connection.
#[derive(Debug)]
pub struct Channel<P> {
    host: String,
    port: u16,
    payload_type: P,
    memory_limit: Option<usize>,
    recv_buffer_size: usize,
    tls_config: TlsConfig,
    transport: Option<Transport>,
}

impl<P> Channel<P>
where
    P: PayloadType,
{
    /// New channel with default configuration; see [`ChannelBuilder`] for
    /// the knobs.
    pub fn new(host: impl Into<String>, port: u16, payload_type: P) -> Self {
        ChannelBuilder::new(host, port, payload_type).build()
    }

    pub fn builder(host: impl Into<String>, port: u16, payload_type: P) -> ChannelBuilder<P> {
        ChannelBuilder::new(host, port, payload_type)
    }

    /// Max memory for get requests in bytes.
    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    pub fn set_memory_limit(&mut self, limit: Option<usize>) {
        self.memory_limit = limit;
    }

    /// Connects to the configured host and port.
    pub async fn connect(&mut self) -> Response {
        match Transport::connect(&self.host, self.port, self.tls_config.clone()).await {
            Ok(transport) => {
                self.transport = Some(transport);
                Response::new(ResponseStatus::Ok)
            }
            Err(error) => {
                debug!(%error, host = %self.host, port = self.port, "connect failed");
                Response::new(ResponseStatus::Error)
            }
        }
    }

    /// Closes the connection, attempting an orderly shutdown first.
    ///
    /// Returns OK if there was a connection to close, ERROR otherwise.
    pub async fn close(&mut self) -> Response {
        match self.transport.take() {
            Some(mut transport) => {
                let _ = transport.shutdown().await;
                Response::new(ResponseStatus::Ok)
            }
            None => Response::new(ResponseStatus::Error),
        }
    }

    /// Puts records without their acq values; the server assigns them.
    pub async fn put(&mut self, data: &[Record<P::Value>]) -> Response {
        self.do_put(data, CommandType::PutSafe, PutOptions::default())
            .await
    }

    pub async fn put_opts(&mut self, data: &[Record<P::Value>], opts: PutOptions) -> Response {
        self.do_put(data, CommandType::PutSafe, opts).await
    }

    /// Puts records keeping the acq values as given.
    pub async fn puta(&mut self, data: &[Record<P::Value>]) -> Response {
        self.do_put(data, CommandType::PutASafe, PutOptions::default())
            .await
    }

    pub async fn puta_opts(&mut self, data: &[Record<P::Value>], opts: PutOptions) -> Response {
        self.do_put(data, CommandType::PutASafe, opts).await
    }

    async fn do_put(
        &mut self,
        data: &[Record<P::Value>],
        cmd: CommandType,
        opts: PutOptions,
    ) -> Response {
        if self.transport.is_none() {
            return Response::new(ResponseStatus::Disconnected);
        }

        // Send-side failures are deliberately ignored: the server may have
        // consumed everything and answered before the local socket noticed
        // the peer going away. Only the response read decides.
        if let Err(error) = self.send_put_stream(data, cmd, opts).await {
            debug!(%error, "put send failed, awaiting response anyway");
        }

        let mut buffer = ReceiveBuffer::new(RequestHeader::SIZE + ACQS_PAIR_SIZE);
        loop {
            let n = self.read_into(&mut buffer, 0).await.unwrap_or(0);
            if n == 0 {
                return Response::new(ResponseStatus::Disconnected);
            }
            if let Some((header, _)) = session::handle_response(&mut buffer, AuxFormat::AcqPair) {
                return Response::new(if header.is_ok() {
                    ResponseStatus::Ok
                } else {
                    ResponseStatus::Error
                });
            }
        }
    }

    /// Gets the last acq value for the key range.
    pub async fn get_acq(&mut self, key_min: Key, key_max: Key) -> ResponseAcq {
        if self.transport.is_none() {
            return ResponseAcq::new(ResponseStatus::Disconnected);
        }
        let request = session::keyrange_request(CommandType::GetAcq, &key_min, &key_max);
        let _ = self.send(&request).await;

        let mut buffer = ReceiveBuffer::new(RequestHeader::SIZE + ACQ_SIZE);
        loop {
            let n = self.read_into(&mut buffer, 0).await.unwrap_or(0);
            if n == 0 {
                return ResponseAcq::new(ResponseStatus::Disconnected);
            }
            if let Some((header, aux)) = session::handle_response(&mut buffer, AuxFormat::Acq) {
                return if header.is_ok() {
                    ResponseAcq::with_acq(ResponseStatus::Ok, aux.acq())
                } else {
                    ResponseAcq::new(ResponseStatus::Error)
                };
            }
        }
    }

    /// Gets all records in the key range, buffered in memory.
    ///
    /// The request fails with `NoMemory` once more than the configured
    /// memory limit has been received. Any failure closes the connection;
    /// records parsed so far are returned either way.
    pub async fn get(&mut self, key_min: Key, key_max: Key) -> ResponseGet<P::Value> {
        let mut records = Vec::new();
        if self.transport.is_none() {
            return self.fail_get(ResponseStatus::Disconnected, records).await;
        }
        let request = session::keyrange_request(CommandType::Get, &key_min, &key_max);
        let _ = self.send(&request).await;

        let mut stage = GetStage::InitialHeader;
        let mut total_bytes = 0usize;
        let mut buffer = ReceiveBuffer::new(session::recv_capacity(
            self.recv_buffer_size,
            self.memory_limit,
        ));

        loop {
            let n = self.read_into(&mut buffer, 0).await.unwrap_or(0);
            if n == 0 {
                return self.fail_get(ResponseStatus::Disconnected, records).await;
            }
            total_bytes += n;
            if session::over_memory_limit(total_bytes, self.memory_limit) {
                return self.fail_get(ResponseStatus::NoMemory, records).await;
            }

            if stage == GetStage::InitialHeader {
                if let Some((header, _)) = session::handle_response(&mut buffer, AuxFormat::Empty) {
                    if !header.is_ok() {
                        return self.fail_get(ResponseStatus::BadRequest, records).await;
                    }
                    stage = GetStage::RecordsParsing;
                }
            }

            if stage == GetStage::RecordsParsing {
                match session::parse_records(
                    &mut buffer,
                    &mut records,
                    &self.payload_type,
                    self.memory_limit,
                ) {
                    RecordsParsing::NeedsMoreBytes => continue,
                    RecordsParsing::Finished => stage = GetStage::FinalHeader,
                    RecordsParsing::Unparseable => {
                        return self
                            .fail_get(ResponseStatus::UnparseableEntity, records)
                            .await;
                    }
                    RecordsParsing::RecordTooBig => {
                        return self.fail_get(ResponseStatus::NoMemory, records).await;
                    }
                }
            }

            if stage == GetStage::FinalHeader {
                if let Some((header, aux)) = session::handle_response(&mut buffer, AuxFormat::Acq) {
                    if header.is_ok() {
                        return ResponseGet::with_acq(ResponseStatus::Ok, aux.acq(), records);
                    }
                    return self.fail_get(ResponseStatus::Error, records).await;
                }
            }
        }
    }

    /// Gets records in the key range, handing them to `callback` in batches.
    ///
    /// A batch is flushed whenever the memory limit worth of bytes has been
    /// consumed, when parsing finishes, and before a failure status is
    /// returned. While records are pending the reader never pulls more than
    /// `memory_limit` bytes total from the transport, so the peer cannot
    /// force the limit. Reaching the limit without a single parsed record
    /// fails with `NoMemory` and the callback is never invoked.
    pub async fn get_stream<F>(&mut self, key_min: Key, key_max: Key, mut callback: F) -> ResponseAcq
    where
        F: FnMut(Vec<Record<P::Value>>),
    {
        if self.transport.is_none() {
            return self.fail_acq(ResponseStatus::Disconnected).await;
        }
        let request = session::keyrange_request(CommandType::Get, &key_min, &key_max);
        let _ = self.send(&request).await;

        let mut stage = GetStage::InitialHeader;
        let mut total_bytes = 0usize;
        let mut buffer = ReceiveBuffer::new(session::recv_capacity(
            self.recv_buffer_size,
            self.memory_limit,
        ));
        let mut records: Vec<Record<P::Value>> = Vec::new();

        loop {
            let cap = self
                .memory_limit
                .map(|limit| limit.saturating_sub(total_bytes))
                .unwrap_or(0);
            let n = self.read_into(&mut buffer, cap).await.unwrap_or(0);
            if n == 0 {
                if !records.is_empty() {
                    callback(mem::take(&mut records));
                }
                return self.fail_acq(ResponseStatus::Disconnected).await;
            }
            total_bytes += n;

            if stage == GetStage::InitialHeader {
                if let Some((header, _)) = session::handle_response(&mut buffer, AuxFormat::Empty) {
                    if !header.is_ok() {
                        return self.fail_acq(ResponseStatus::BadRequest).await;
                    }
                    stage = GetStage::RecordsParsing;
                }
            }

            if stage == GetStage::RecordsParsing {
                match session::parse_records(
                    &mut buffer,
                    &mut records,
                    &self.payload_type,
                    self.memory_limit,
                ) {
                    RecordsParsing::NeedsMoreBytes => {
                        if session::at_memory_limit(total_bytes, self.memory_limit) {
                            if records.is_empty() {
                                return self.fail_acq(ResponseStatus::NoMemory).await;
                            }
                            callback(mem::take(&mut records));
                            total_bytes = 0;
                        }
                        continue;
                    }
                    RecordsParsing::Finished => {
                        if !records.is_empty() {
                            callback(mem::take(&mut records));
                            total_bytes = 0;
                        }
                        stage = GetStage::FinalHeader;
                    }
                    RecordsParsing::Unparseable => {
                        if !records.is_empty() {
                            callback(mem::take(&mut records));
                        }
                        return self.fail_acq(ResponseStatus::UnparseableEntity).await;
                    }
                    RecordsParsing::RecordTooBig => {
                        if !records.is_empty() {
                            callback(mem::take(&mut records));
                        }
                        return self.fail_acq(ResponseStatus::NoMemory).await;
                    }
                }
            }

            if stage == GetStage::FinalHeader {
                if let Some((header, aux)) = session::handle_response(&mut buffer, AuxFormat::Acq) {
                    if header.is_ok() {
                        return ResponseAcq::with_acq(ResponseStatus::Ok, aux.acq());
                    }
                    return self.fail_acq(ResponseStatus::Error).await;
                }
            }
        }
    }

    /// Gets records in the key range as a lazy sequence.
    ///
    /// The sequence yields each record as it is parsed and closes with
    /// exactly one [`GetItem::Done`] carrying the outcome; records parsed
    /// before a failure are yielded before the terminal item. Dropping the
    /// sequence before the terminal item leaves the session mid-response,
    /// so the connection is closed.
    pub fn get_iter(&mut self, key_min: Key, key_max: Key) -> GetIter<'_, P> {
        let buffer = ReceiveBuffer::new(session::recv_capacity(
            self.recv_buffer_size,
            self.memory_limit,
        ));
        GetIter {
            key_min,
            key_max,
            stage: GetStage::InitialHeader,
            total_bytes: 0,
            buffer,
            pending: VecDeque::new(),
            terminal: None,
            started: false,
            finished: false,
            channel: self,
        }
    }

    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
        transport.write_all(data).await?;
        transport.flush().await
    }

    async fn send_put_stream(
        &mut self,
        data: &[Record<P::Value>],
        cmd: CommandType,
        opts: PutOptions,
    ) -> std::io::Result<()> {
        let Self {
            transport,
            payload_type,
            ..
        } = self;
        let transport = transport
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;

        transport.write_all(&session::put_request(cmd)).await?;
        let with_acq = cmd == CommandType::PutASafe;
        let frames = BatchFrames::new(
            data,
            with_acq,
            payload_type,
            opts.max_batch_size,
            opts.skip_invalid,
        );
        for frame in frames {
            transport.write_all(&frame).await?;
        }
        transport.write_all(&session::terminator()).await?;
        transport.flush().await
    }

    /// Reads into the buffer's free space, at most `cap` bytes; a zero cap
    /// disables the limit.
    async fn read_into(
        &mut self,
        buffer: &mut ReceiveBuffer,
        cap: usize,
    ) -> std::io::Result<usize> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
        let free = buffer.free_space();
        let limit = if cap == 0 { free.len() } else { cap.min(free.len()) };
        let n = transport.read(&mut free[..limit]).await?;
        buffer.increase_available(n);
        Ok(n)
    }

    async fn fail_get(
        &mut self,
        status: ResponseStatus,
        data: Vec<Record<P::Value>>,
    ) -> ResponseGet<P::Value> {
        debug!(status = ?status, "closing channel after failed get");
        self.close().await;
        ResponseGet::new(status, data)
    }

    async fn fail_acq(&mut self, status: ResponseStatus) -> ResponseAcq {
        debug!(status = ?status, "closing channel after failed get");
        self.close().await;
        ResponseAcq::new(status)
    }
}

/// One item of a [`Channel::get_iter`] sequence.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum GetItem<T> {
    Record(Record<T>),
    /// Terminal outcome; yielded exactly once, after all records.
    Done(ResponseAcq),
}

/// Lazy record sequence of a get request.
///
/// Obtained from [`Channel::get_iter`]; exhaust it with
/// `while let Some(item) = iter.next().await`.
pub struct GetIter<'a, P>
where
    P: PayloadType,
{
    key_min: Key,
    key_max: Key,
    stage: GetStage,
    total_bytes: usize,
    buffer: ReceiveBuffer,
    pending: VecDeque<Record<P::Value>>,
    terminal: Option<ResponseAcq>,
    started: bool,
    finished: bool,
    channel: &'a mut Channel<P>,
}

impl<'a, P> GetIter<'a, P>
where
    P: PayloadType,
{
    /// Next record, or the terminal response, or `None` once exhausted.
    pub async fn next(&mut self) -> Option<GetItem<P::Value>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(GetItem::Record(record));
            }
            if let Some(response) = self.terminal.take() {
                self.finished = true;
                return Some(GetItem::Done(response));
            }
            if self.finished {
                return None;
            }

            if !self.started {
                self.started = true;
                if self.channel.transport.is_none() {
                    self.terminal = Some(ResponseAcq::new(ResponseStatus::Disconnected));
                    continue;
                }
                let request = session::keyrange_request(
                    CommandType::Get,
                    &self.key_min,
                    &self.key_max,
                );
                let _ = self.channel.send(&request).await;
            }

            self.pump().await;
        }
    }

    /// One read off the transport plus whatever stage transitions the new
    /// bytes allow. Parsed records land in `pending`, outcomes in
    /// `terminal`.
    async fn pump(&mut self) {
        let n = self
            .channel
            .read_into(&mut self.buffer, 0)
            .await
            .unwrap_or(0);
        if n == 0 {
            self.channel.close().await;
            self.terminal = Some(ResponseAcq::new(ResponseStatus::Disconnected));
            return;
        }
        self.total_bytes += n;
        if session::over_memory_limit(self.total_bytes, self.channel.memory_limit) {
            self.channel.close().await;
            self.terminal = Some(ResponseAcq::new(ResponseStatus::NoMemory));
            return;
        }

        if self.stage == GetStage::InitialHeader {
            if let Some((header, _)) = session::handle_response(&mut self.buffer, AuxFormat::Empty)
            {
                if !header.is_ok() {
                    self.channel.close().await;
                    self.terminal = Some(ResponseAcq::new(ResponseStatus::BadRequest));
                    return;
                }
                self.stage = GetStage::RecordsParsing;
            }
        }

        if self.stage == GetStage::RecordsParsing {
            let mut records = Vec::new();
            let verdict = session::parse_records(
                &mut self.buffer,
                &mut records,
                &self.channel.payload_type,
                self.channel.memory_limit,
            );
            self.pending.extend(records);
            match verdict {
                RecordsParsing::NeedsMoreBytes => return,
                RecordsParsing::Finished => self.stage = GetStage::FinalHeader,
                RecordsParsing::Unparseable => {
                    self.channel.close().await;
                    self.terminal = Some(ResponseAcq::new(ResponseStatus::UnparseableEntity));
                    return;
                }
                RecordsParsing::RecordTooBig => {
                    self.channel.close().await;
                    self.terminal = Some(ResponseAcq::new(ResponseStatus::NoMemory));
                    return;
                }
            }
        }

        if self.stage == GetStage::FinalHeader {
            if let Some((header, aux)) = session::handle_response(&mut self.buffer, AuxFormat::Acq)
            {
                if header.is_ok() {
                    self.terminal = Some(ResponseAcq::with_acq(ResponseStatus::Ok, aux.acq()));
                } else {
                    self.channel.close().await;
                    self.terminal = Some(ResponseAcq::new(ResponseStatus::Error));
                }
            }
        }
    }
}

impl<'a, P> Drop for GetIter<'a, P>
where
    P: PayloadType,
{
    fn drop(&mut self) {
        // Abandoning the sequence mid-response leaves the protocol state
        // undefined; the connection must not serve another request.
        if !self.finished {
            self.channel.transport.take();
        }
    }
}
