// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-`host:port` connection state.
//!
//! A destination owns one TCP socket, at most one TLS session and either
//! the serialized HTTP/1.1 writer/reader pair or an HTTP/2 frame handler.
//! It is owned exclusively by the completion thread; no locking.

use crate::{
    client::{H2RequestState, ResponseShared},
    error::Error,
    h1::{RequestEncoder, ResponseParser},
    h2::FrameHandler,
};
use bytes::BytesMut;
use mio::{net::TcpStream, Interest, Registry, Token};
use std::{
    collections::{HashMap, VecDeque},
    io::{Read, Write},
    net::SocketAddr,
    sync::Arc,
};

/// Bound on synchronous callback chaining before a step is bounced
/// through the completion queue
pub(crate) const RECURSION_LIMIT: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Proto {
    Pending,
    H1,
    H2,
}

#[derive(Debug)]
pub(crate) struct Connecting {
    pub addrs: Vec<SocketAddr>,
    pub index: usize,
    pub errors: Vec<String>,
}

/// Response state attached to one HTTP/2 stream
pub(crate) struct H2StreamCtx {
    pub response: Arc<ResponseShared>,
    pub request: H2RequestState,
    /// Body bytes drained from the handler, awaiting the user callback
    pub body: BytesMut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WireRead {
    WouldBlock,
    Eof,
    Got(usize),
}

pub(crate) struct Destination {
    pub key: String,
    pub token: Token,
    pub host: String,
    pub port: u16,
    pub https: bool,

    pub socket: Option<TcpStream>,
    pub connect: Option<Connecting>,
    pub connected: bool,
    pub resolving: bool,
    pub tls: Option<rustls::ClientConnection>,
    pub proto: Proto,

    /// Requests parked until the connection (and TLS) is ready, oldest
    /// first
    pub pending_setup: VecDeque<Arc<ResponseShared>>,

    // HTTP/1.1: one writer and one reader at a time, strictly ordered
    pub h1_encoder: RequestEncoder,
    pub h1_out: BytesMut,
    pub h1_parser: ResponseParser,
    pub h1_writing: Option<Arc<ResponseShared>>,
    pub h1_write_queue: VecDeque<Arc<ResponseShared>>,
    pub h1_reading: Option<Arc<ResponseShared>>,
    pub h1_read_queue: VecDeque<Arc<ResponseShared>>,

    // HTTP/2: concurrent streams over one handler
    pub h2: Option<FrameHandler>,
    pub h2_streams: HashMap<u32, H2StreamCtx>,

    /// Plaintext bytes owed to the socket when no TLS session exists
    pub wire_out: BytesMut,
    pub recursion: u32,
    pub transport_error: bool,
    pub conn_err: Option<Error>,
}

impl Destination {
    pub fn new(key: String, host: String, port: u16, https: bool, token: Token) -> Self {
        Self {
            key,
            token,
            host,
            port,
            https,
            socket: None,
            connect: None,
            connected: false,
            resolving: false,
            tls: None,
            proto: Proto::Pending,
            pending_setup: VecDeque::new(),
            h1_encoder: RequestEncoder::new(),
            h1_out: BytesMut::new(),
            h1_parser: ResponseParser::new(),
            h1_writing: None,
            h1_write_queue: VecDeque::new(),
            h1_reading: None,
            h1_read_queue: VecDeque::new(),
            h2: None,
            h2_streams: HashMap::new(),
            wire_out: BytesMut::new(),
            recursion: 0,
            transport_error: false,
            conn_err: None,
        }
    }

    /// Bumps the recursion counter; true means the caller must defer the
    /// step onto the completion queue instead of continuing inline
    pub fn check_recursion_limit(&mut self) -> bool {
        if self.recursion > RECURSION_LIMIT {
            self.recursion = 0;
            return true;
        }
        self.recursion += 1;
        false
    }

    /// Starts connecting through the resolved address list
    pub fn start_connect(&mut self, registry: &Registry, addrs: Vec<SocketAddr>) {
        self.connect = Some(Connecting {
            addrs,
            index: 0,
            errors: Vec::new(),
        });
        self.try_next_addr(registry);
    }

    /// Dials the next address; addresses are tried sequentially and their
    /// failures accumulate into one error
    pub fn try_next_addr(&mut self, registry: &Registry) {
        loop {
            let Some(connect) = self.connect.as_mut() else {
                return;
            };
            let Some(addr) = connect.addrs.get(connect.index).copied() else {
                let detail = if connect.errors.is_empty() {
                    "no address to try".to_string()
                } else {
                    connect.errors.join("; ")
                };
                self.connect = None;
                self.fail_all(Error::Connect(detail));
                return;
            };
            connect.index += 1;

            match TcpStream::connect(addr) {
                Ok(mut socket) => {
                    if let Err(error) = registry.register(
                        &mut socket,
                        self.token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        self.record_connect_error(&addr, &error.to_string());
                        continue;
                    }
                    tracing::debug!(%addr, key = %self.key, "tcp connect started");
                    self.socket = Some(socket);
                    return;
                }
                Err(error) => {
                    self.record_connect_error(&addr, &error.to_string());
                }
            }
        }
    }

    fn record_connect_error(&mut self, addr: &SocketAddr, error: &str) {
        if let Some(connect) = self.connect.as_mut() {
            connect.errors.push(format!("{addr}: {error}"));
        }
    }

    /// Confirms a pending connect after a writability event
    ///
    /// Returns `Some(true)` on success, `Some(false)` when the next
    /// address is being tried, `None` when no connect was pending.
    pub fn confirm_connect(&mut self, registry: &Registry) -> Option<bool> {
        if self.connected || self.connect.is_none() {
            return None;
        }
        let socket = self.socket.as_ref()?;
        match socket.take_error() {
            Ok(Some(error)) | Err(error) => {
                let addr = socket.peer_addr().ok();
                let detail = error.to_string();
                if let (Some(connect), Some(addr)) = (self.connect.as_mut(), addr) {
                    connect.errors.push(format!("{addr}: {detail}"));
                } else if let Some(connect) = self.connect.as_mut() {
                    connect.errors.push(detail);
                }
                if let Some(mut socket) = self.socket.take() {
                    let _ = registry.deregister(&mut socket);
                }
                self.try_next_addr(registry);
                Some(false)
            }
            Ok(None) => match socket.peer_addr() {
                Ok(_) => {
                    self.connected = true;
                    self.connect = None;
                    tracing::debug!(key = %self.key, "tcp connect established");
                    Some(true)
                }
                // not actually connected yet
                Err(error) if error.kind() == std::io::ErrorKind::NotConnected => Some(false),
                Err(error) => {
                    if let Some(connect) = self.connect.as_mut() {
                        connect.errors.push(error.to_string());
                    }
                    if let Some(mut socket) = self.socket.take() {
                        let _ = registry.deregister(&mut socket);
                    }
                    self.try_next_addr(registry);
                    Some(false)
                }
            },
        }
    }

    /// Creates the TLS session and kicks off the handshake
    pub fn start_tls(&mut self, config: Arc<rustls::ClientConfig>) -> Result<(), Error> {
        let name = rustls::pki_types::ServerName::try_from(self.host.clone())
            .map_err(|_| Error::Tls("invalid server name".into()))?;
        let tls = rustls::ClientConnection::new(config, name)
            .map_err(|error| Error::Tls(error.to_string()))?;
        self.tls = Some(tls);
        Ok(())
    }

    /// Queues plaintext for the wire, through TLS when present
    pub fn queue_plaintext(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        match &mut self.tls {
            Some(tls) => {
                tls.writer()
                    .write_all(data)
                    .map_err(|error| Error::Tls(error.to_string()))?;
            }
            None => self.wire_out.extend_from_slice(data),
        }
        Ok(())
    }

    /// Pushes queued bytes to the socket until it would block
    pub fn flush_wire(&mut self) -> Result<(), Error> {
        let Some(socket) = self.socket.as_mut() else {
            return Ok(());
        };
        if let Some(tls) = self.tls.as_mut() {
            while tls.wants_write() {
                match tls.write_tls(socket) {
                    Ok(0) => {
                        return Err(Error::Transport("socket closed while writing".into()));
                    }
                    Ok(_) => {}
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(error) => return Err(Error::Transport(error.to_string())),
                }
            }
            return Ok(());
        }
        while !self.wire_out.is_empty() {
            match socket.write(&self.wire_out) {
                Ok(0) => {
                    return Err(Error::Transport("socket closed while writing".into()));
                }
                Ok(written) => {
                    let _ = self.wire_out.split_to(written);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => return Err(Error::Transport(error.to_string())),
            }
        }
        Ok(())
    }

    /// Reads from the socket (through TLS when present) into `sink`
    pub fn read_wire(&mut self, sink: &mut BytesMut) -> Result<WireRead, Error> {
        let Some(socket) = self.socket.as_mut() else {
            return Ok(WireRead::WouldBlock);
        };

        if let Some(tls) = self.tls.as_mut() {
            let mut total = 0usize;
            loop {
                match tls.read_tls(socket) {
                    Ok(0) => {
                        return if total > 0 {
                            Ok(WireRead::Got(total))
                        } else {
                            Ok(WireRead::Eof)
                        };
                    }
                    Ok(_) => {
                        let state = tls
                            .process_new_packets()
                            .map_err(|error| Error::Tls(error.to_string()))?;
                        let mut remaining = state.plaintext_bytes_to_read();
                        let mut chunk = [0u8; 4096];
                        while remaining > 0 {
                            match tls.reader().read(&mut chunk) {
                                Ok(0) => break,
                                Ok(read) => {
                                    sink.extend_from_slice(&chunk[..read]);
                                    total += read;
                                    remaining = remaining.saturating_sub(read);
                                }
                                Err(error)
                                    if error.kind() == std::io::ErrorKind::WouldBlock =>
                                {
                                    break;
                                }
                                Err(error) => {
                                    return Err(Error::Tls(error.to_string()));
                                }
                            }
                        }
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        return Ok(WireRead::Got(total));
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(error) => return Err(Error::Transport(error.to_string())),
                }
            }
        }

        let mut total = 0usize;
        let mut chunk = [0u8; 4096];
        loop {
            match socket.read(&mut chunk) {
                Ok(0) => {
                    return if total > 0 {
                        Ok(WireRead::Got(total))
                    } else {
                        Ok(WireRead::Eof)
                    };
                }
                Ok(read) => {
                    sink.extend_from_slice(&chunk[..read]);
                    total += read;
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(WireRead::Got(total));
                }
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => return Err(Error::Transport(error.to_string())),
            }
        }
    }

    /// True once the TLS handshake finished
    pub fn tls_handshake_done(&self) -> bool {
        self.tls
            .as_ref()
            .map(|tls| !tls.is_handshaking())
            .unwrap_or(false)
    }

    /// The ALPN protocol the server selected, if any
    pub fn selected_alpn(&self) -> Option<Vec<u8>> {
        self.tls
            .as_ref()
            .and_then(|tls| tls.alpn_protocol())
            .map(<[u8]>::to_vec)
    }

    /// Latches a transport error; pending writes may still drain but no
    /// further reads are scheduled
    pub fn handle_transport_error(&mut self, error: Error) {
        tracing::warn!(key = %self.key, %error, "transport error");
        self.transport_error = true;
        self.conn_err = Some(error);
    }

    /// Fails every request pending on this destination
    pub fn fail_all(&mut self, error: Error) {
        self.handle_transport_error(error.clone());
        for response in self.pending_setup.drain(..) {
            response.fail(error.clone());
        }
        if let Some(response) = self.h1_writing.take() {
            response.fail(error.clone());
        }
        if let Some(response) = self.h1_reading.take() {
            response.fail(error.clone());
        }
        for response in self.h1_write_queue.drain(..) {
            response.fail(error.clone());
        }
        for response in self.h1_read_queue.drain(..) {
            response.fail(error.clone());
        }
        for (_, stream) in self.h2_streams.drain() {
            stream.response.fail(error.clone());
        }
    }
}
