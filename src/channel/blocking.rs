//! Blocking TStorage communication channel.
//!
//! Same request semantics as the async [`Channel`](crate::channel::Channel),
//! driven over a synchronous socket. Socket-level send/receive timeouts are
//! configurable here; the async flavour delegates deadlines to the runtime
//! instead.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::mem;
use std::time::Duration;

use tracing::debug;

use crate::channel::buffer::ReceiveBuffer;
use crate::channel::session::{self, AuxFormat, GetStage, RecordsParsing};
use crate::channel::{PutOptions, DEFAULT_RECV_BUFFER_SIZE};
use crate::connection::blocking::Transport;
use crate::connection::TlsConfig;
use crate::payload::PayloadType;
use crate::protocol::batch::BatchFrames;
use crate::protocol::command::CommandType;
use crate::protocol::header::RequestHeader;
use crate::protocol::{ACQS_PAIR_SIZE, ACQ_SIZE};
use crate::record::{Key, Record};
use crate::response::{Response, ResponseAcq, ResponseGet, ResponseStatus};

pub use crate::channel::GetItem;

/// Builder for the blocking [`Channel`].
#[derive(Debug)]
pub struct ChannelBuilder<P> {
    host: String,
    port: u16,
    payload_type: P,
    timeout: Option<Duration>,
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
            timeout: None,
            memory_limit: None,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            tls_config: TlsConfig::default(),
        }
    }

    /// Socket connect/send/receive timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
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
            timeout: self.timeout,
            memory_limit: self.memory_limit,
            recv_buffer_size: self.recv_buffer_size,
            tls_config: self.tls_config,
            transport: None,
        }
    }
}

/// Blocking TStorage communication channel.
///
/// Dropping the channel closes the connection, so a failed request can
/// never leak half-read response bytes into someone else's session.
#[derive(Debug)]
pub struct Channel<P> {
    host: String,
    port: u16,
    payload_type: P,
    timeout: Option<Duration>,
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

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Updates the socket timeout, applying it to the live connection too.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
        if let Some(transport) = &self.transport {
            let _ = transport.set_timeout(timeout);
        }
    }

    /// Max memory for get requests in bytes.
    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    pub fn set_memory_limit(&mut self, limit: Option<usize>) {
        self.memory_limit = limit;
    }

    /// Connects to the configured host and port with the configured timeout.
    pub fn connect(&mut self) -> Response {
        match Transport::connect(&self.host, self.port, self.tls_config.clone(), self.timeout) {
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
    pub fn close(&mut self) -> Response {
        match self.transport.take() {
            Some(transport) => {
                transport.shutdown();
                Response::new(ResponseStatus::Ok)
            }
            None => Response::new(ResponseStatus::Error),
        }
    }

    /// Puts records without their acq values; the server assigns them.
    pub fn put(&mut self, data: &[Record<P::Value>]) -> Response {
        self.do_put(data, CommandType::PutSafe, PutOptions::default())
    }

    pub fn put_opts(&mut self, data: &[Record<P::Value>], opts: PutOptions) -> Response {
        self.do_put(data, CommandType::PutSafe, opts)
    }

    /// Puts records keeping the acq values as given.
    pub fn puta(&mut self, data: &[Record<P::Value>]) -> Response {
        self.do_put(data, CommandType::PutASafe, PutOptions::default())
    }

    pub fn puta_opts(&mut self, data: &[Record<P::Value>], opts: PutOptions) -> Response {
        self.do_put(data, CommandType::PutASafe, opts)
    }

    fn do_put(&mut self, data: &[Record<P::Value>], cmd: CommandType, opts: PutOptions) -> Response {
        if self.transport.is_none() {
            return Response::new(ResponseStatus::Disconnected);
        }

        // Send-side failures are deliberately ignored: the server may have
        // consumed everything and answered before the local socket noticed
        // the peer going away. Only the response read decides.
        if let Err(error) = self.send_put_stream(data, cmd, opts) {
            debug!(%error, "put send failed, awaiting response anyway");
        }

        let mut buffer = ReceiveBuffer::new(RequestHeader::SIZE + ACQS_PAIR_SIZE);
        loop {
            let n = self.read_into(&mut buffer, 0).unwrap_or(0);
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
    pub fn get_acq(&mut self, key_min: Key, key_max: Key) -> ResponseAcq {
        if self.transport.is_none() {
            return ResponseAcq::new(ResponseStatus::Disconnected);
        }
        let request = session::keyrange_request(CommandType::GetAcq, &key_min, &key_max);
        let _ = self.send(&request);

        let mut buffer = ReceiveBuffer::new(RequestHeader::SIZE + ACQ_SIZE);
        loop {
            let n = self.read_into(&mut buffer, 0).unwrap_or(0);
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
    pub fn get(&mut self, key_min: Key, key_max: Key) -> ResponseGet<P::Value> {
        let mut records = Vec::new();
        if self.transport.is_none() {
            return self.fail_get(ResponseStatus::Disconnected, records);
        }
        let request = session::keyrange_request(CommandType::Get, &key_min, &key_max);
        let _ = self.send(&request);

        let mut stage = GetStage::InitialHeader;
        let mut total_bytes = 0usize;
        let mut buffer = ReceiveBuffer::new(session::recv_capacity(
            self.recv_buffer_size,
            self.memory_limit,
        ));

        loop {
            let n = self.read_into(&mut buffer, 0).unwrap_or(0);
            if n == 0 {
                return self.fail_get(ResponseStatus::Disconnected, records);
            }
            total_bytes += n;
            if session::over_memory_limit(total_bytes, self.memory_limit) {
                return self.fail_get(ResponseStatus::NoMemory, records);
            }

            if stage == GetStage::InitialHeader {
                if let Some((header, _)) = session::handle_response(&mut buffer, AuxFormat::Empty) {
                    if !header.is_ok() {
                        return self.fail_get(ResponseStatus::BadRequest, records);
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
                        return self.fail_get(ResponseStatus::UnparseableEntity, records);
                    }
                    RecordsParsing::RecordTooBig => {
                        return self.fail_get(ResponseStatus::NoMemory, records);
                    }
                }
            }

            if stage == GetStage::FinalHeader {
                if let Some((header, aux)) = session::handle_response(&mut buffer, AuxFormat::Acq) {
                    if header.is_ok() {
                        return ResponseGet::with_acq(ResponseStatus::Ok, aux.acq(), records);
                    }
                    return self.fail_get(ResponseStatus::Error, records);
                }
            }
        }
    }

    /// Gets records in the key range, handing them to `callback` in batches.
    ///
    /// Same contract as the async
    /// [`Channel::get_stream`](crate::channel::Channel::get_stream).
    pub fn get_stream<F>(&mut self, key_min: Key, key_max: Key, mut callback: F) -> ResponseAcq
    where
        F: FnMut(Vec<Record<P::Value>>),
    {
        if self.transport.is_none() {
            return self.fail_acq(ResponseStatus::Disconnected);
        }
        let request = session::keyrange_request(CommandType::Get, &key_min, &key_max);
        let _ = self.send(&request);

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
            let n = self.read_into(&mut buffer, cap).unwrap_or(0);
            if n == 0 {
                if !records.is_empty() {
                    callback(mem::take(&mut records));
                }
                return self.fail_acq(ResponseStatus::Disconnected);
            }
            total_bytes += n;

            if stage == GetStage::InitialHeader {
                if let Some((header, _)) = session::handle_response(&mut buffer, AuxFormat::Empty) {
                    if !header.is_ok() {
                        return self.fail_acq(ResponseStatus::BadRequest);
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
                                return self.fail_acq(ResponseStatus::NoMemory);
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
                        return self.fail_acq(ResponseStatus::UnparseableEntity);
                    }
                    RecordsParsing::RecordTooBig => {
                        if !records.is_empty() {
                            callback(mem::take(&mut records));
                        }
                        return self.fail_acq(ResponseStatus::NoMemory);
                    }
                }
            }

            if stage == GetStage::FinalHeader {
                if let Some((header, aux)) = session::handle_response(&mut buffer, AuxFormat::Acq) {
                    if header.is_ok() {
                        return ResponseAcq::with_acq(ResponseStatus::Ok, aux.acq());
                    }
                    return self.fail_acq(ResponseStatus::Error);
                }
            }
        }
    }

    /// Gets records in the key range as a lazy iterator.
    ///
    /// Yields each record as it is parsed, then exactly one
    /// [`GetItem::Done`] carrying the outcome. Dropping the iterator before
    /// the terminal item closes the connection.
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

    fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
        transport.write_all(data)?;
        transport.flush()
    }

    fn send_put_stream(
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

        transport.write_all(&session::put_request(cmd))?;
        let with_acq = cmd == CommandType::PutASafe;
        let frames = BatchFrames::new(
            data,
            with_acq,
            payload_type,
            opts.max_batch_size,
            opts.skip_invalid,
        );
        for frame in frames {
            transport.write_all(&frame)?;
        }
        transport.write_all(&session::terminator())?;
        transport.flush()
    }

    /// Reads into the buffer's free space, at most `cap` bytes; a zero cap
    /// disables the limit.
    fn read_into(&mut self, buffer: &mut ReceiveBuffer, cap: usize) -> std::io::Result<usize> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
        let free = buffer.free_space();
        let limit = if cap == 0 { free.len() } else { cap.min(free.len()) };
        let n = transport.read(&mut free[..limit])?;
        buffer.increase_available(n);
        Ok(n)
    }

    fn fail_get(
        &mut self,
        status: ResponseStatus,
        data: Vec<Record<P::Value>>,
    ) -> ResponseGet<P::Value> {
        debug!(status = ?status, "closing channel after failed get");
        self.close();
        ResponseGet::new(status, data)
    }

    fn fail_acq(&mut self, status: ResponseStatus) -> ResponseAcq {
        debug!(status = ?status, "closing channel after failed get");
        self.close();
        ResponseAcq::new(status)
    }
}

impl<P> Drop for Channel<P> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
    }
}

/// Lazy record iterator of a blocking get request.
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
    /// One read off the transport plus whatever stage transitions the new
    /// bytes allow. Parsed records land in `pending`, outcomes in
    /// `terminal`.
    fn pump(&mut self) {
        let n = self.channel.read_into(&mut self.buffer, 0).unwrap_or(0);
        if n == 0 {
            self.channel.close();
            self.terminal = Some(ResponseAcq::new(ResponseStatus::Disconnected));
            return;
        }
        self.total_bytes += n;
        if session::over_memory_limit(self.total_bytes, self.channel.memory_limit) {
            self.channel.close();
            self.terminal = Some(ResponseAcq::new(ResponseStatus::NoMemory));
            return;
        }

        if self.stage == GetStage::InitialHeader {
            if let Some((header, _)) = session::handle_response(&mut self.buffer, AuxFormat::Empty)
            {
                if !header.is_ok() {
                    self.channel.close();
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
                    self.channel.close();
                    self.terminal = Some(ResponseAcq::new(ResponseStatus::UnparseableEntity));
                    return;
                }
                RecordsParsing::RecordTooBig => {
                    self.channel.close();
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
                    self.channel.close();
                    self.terminal = Some(ResponseAcq::new(ResponseStatus::Error));
                }
            }
        }
    }
}

impl<'a, P> Iterator for GetIter<'a, P>
where
    P: PayloadType,
{
    type Item = GetItem<P::Value>;

    fn next(&mut self) -> Option<Self::Item> {
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
                let request =
                    session::keyrange_request(CommandType::Get, &self.key_min, &self.key_max);
                let _ = self.channel.send(&request);
            }

            self.pump();
        }
    }
}

impl<'a, P> Drop for GetIter<'a, P>
where
    P: PayloadType,
{
    fn drop(&mut self) {
        // Abandoning the iterator mid-response leaves the protocol state
        // undefined; the connection must not serve another request.
        if !self.finished {
            self.channel.close();
        }
    }
}
