// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The completion thread.
//!
//! One thread owns every destination and runs all protocol state
//! transitions and user callbacks. It is woken by socket readiness (mio)
//! and by deferred callbacks arriving over the task channel; the
//! recursion guard bounces long synchronous chains back through that
//! channel to bound stack depth.

use crate::{
    client::{
        destination::{Destination, Proto, WireRead},
        ReaderBackend, RequestWriter, ResponseReader, ResponseShared, Shared, Task,
        WriterBackend,
    },
    error::Error,
    h2::FrameHandler,
};
use bytes::BytesMut;
use crossbeam_channel::{Receiver, TryRecvError};
use mio::{Events, Poll, Registry, Token};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{atomic::Ordering, Arc, Weak},
    time::Duration,
};

pub(crate) const WAKER_TOKEN: Token = Token(0);

pub(crate) struct Driver {
    poll: Poll,
    registry: Registry,
    tasks: Receiver<Task>,
    shared: Weak<Shared>,
    destinations: HashMap<String, Destination>,
    tokens: HashMap<Token, String>,
    next_token: usize,
}

impl Driver {
    pub(crate) fn new(poll: Poll, tasks: Receiver<Task>, shared: Weak<Shared>) -> Self {
        let registry = poll
            .registry()
            .try_clone()
            .expect("mio registry handles are clonable");
        Self {
            poll,
            registry,
            tasks,
            shared,
            destinations: HashMap::new(),
            tokens: HashMap::new(),
            next_token: 1,
        }
    }

    /// The completion loop: socket readiness, then deferred callbacks
    pub(crate) fn run(mut self) {
        let mut events = Events::with_capacity(64);
        loop {
            if let Err(error) = self.poll.poll(&mut events, Some(Duration::from_millis(500))) {
                if error.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::warn!(%error, "poll failed; completion thread exiting");
                self.shutdown();
                return;
            }

            let ready: Vec<String> = events
                .iter()
                .filter(|event| event.token() != WAKER_TOKEN)
                .filter_map(|event| self.tokens.get(&event.token()).cloned())
                .collect();
            for key in ready {
                self.pump(&key);
            }

            loop {
                match self.tasks.try_recv() {
                    Ok(task) => task(&mut self),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.shutdown();
                        return;
                    }
                }
            }
        }
    }

    fn shutdown(&mut self) {
        for destination in self.destinations.values_mut() {
            destination.fail_all(Error::ClientClosed);
        }
        self.destinations.clear();
        self.tokens.clear();
    }

    fn defer(&self, task: Task) {
        if let Some(shared) = self.shared.upgrade() {
            let _ = shared.post(task);
        }
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Entry point for `Client::request`, on the completion thread
    pub(crate) fn handle_request(&mut self, response: Arc<ResponseShared>) {
        let key = response.uri.destination_key();
        if !self.destinations.contains_key(&key) {
            let token = self.alloc_token();
            let destination = Destination::new(
                key.clone(),
                response.uri.host.clone(),
                response.uri.port,
                response.uri.is_https(),
                token,
            );
            self.tokens.insert(token, key.clone());
            self.destinations.insert(key.clone(), destination);
        }

        let Some(destination) = self.destinations.get_mut(&key) else {
            response.fail(Error::ClientClosed);
            return;
        };
        if let Some(error) = destination.conn_err.clone() {
            response.fail(error);
            return;
        }

        if destination.socket.is_none() && !destination.resolving {
            destination.resolving = true;
            let request = super::dns::DnsRequest {
                host: destination.host.clone(),
                port: destination.port,
                key: key.clone(),
                response,
            };
            if let Some(shared) = self.shared.upgrade() {
                if shared.dns.send(request).is_err() {
                    if let Some(destination) = self.destinations.get_mut(&key) {
                        destination.fail_all(Error::ClientClosed);
                    }
                }
            }
            return;
        }

        if !self.destination_ready(&key) {
            if let Some(destination) = self.destinations.get_mut(&key) {
                destination.pending_setup.push_back(response);
            }
            return;
        }
        self.schedule_request(&key, response);
    }

    fn destination_ready(&self, key: &str) -> bool {
        self.destinations
            .get(key)
            .map(|destination| destination.connected && destination.proto != Proto::Pending)
            .unwrap_or(false)
    }

    /// DNS result, forwarded from the wait thread as a connect callback
    pub(crate) fn on_resolved(
        &mut self,
        key: &str,
        result: Result<Vec<SocketAddr>, String>,
        response: Arc<ResponseShared>,
    ) {
        let Some(destination) = self.destinations.get_mut(key) else {
            response.fail(Error::ClientClosed);
            return;
        };
        destination.resolving = false;
        match result {
            Err(error) => {
                destination.pending_setup.push_front(response);
                destination.fail_all(Error::Dns(error));
            }
            Ok(addrs) => {
                // the request which triggered resolution goes first
                destination.pending_setup.push_front(response);
                destination.start_connect(&self.registry, addrs);
            }
        }
    }

    /// Advances a destination's connection state machine and pumps I/O
    fn pump(&mut self, key: &str) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.transport_error {
            return;
        }

        if !destination.connected {
            match destination.confirm_connect(&self.registry) {
                Some(true) => self.on_connected(key),
                // connecting, retrying the next address, or failed
                _ => return,
            }
            // fall through into I/O for the fresh connection
        }
        self.pump_io(key);
    }

    fn on_connected(&mut self, key: &str) {
        let config = self
            .shared
            .upgrade()
            .and_then(|shared| shared.tls.lock().clone());
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.https {
            let Some(config) = config else {
                destination.fail_all(Error::MissingTlsConfig);
                return;
            };
            if let Err(error) = destination.start_tls(config) {
                destination.fail_all(error);
                return;
            }
            tracing::debug!(key = %key, "tls handshake started");
        } else {
            destination.proto = Proto::H1;
            self.drain_pending_setup(key);
        }
    }

    /// Dispatches requests parked while the connection was being set up
    fn drain_pending_setup(&mut self, key: &str) {
        loop {
            let Some(destination) = self.destinations.get_mut(key) else {
                return;
            };
            let Some(response) = destination.pending_setup.pop_front() else {
                return;
            };
            self.schedule_request(key, response);
        }
    }

    /// Protocol selection after the TLS handshake
    fn on_tls_ready(&mut self, key: &str) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        let alpn = destination.selected_alpn();
        match alpn.as_deref() {
            Some(b"h2") => {
                destination.proto = Proto::H2;
                destination.h2 = Some(FrameHandler::new_client());
                tracing::debug!(key = %key, "alpn selected h2");
            }
            None | Some(b"http/1.1") => {
                destination.proto = Proto::H1;
                tracing::debug!(key = %key, "alpn selected http/1.1");
            }
            Some(other) => {
                let proto = String::from_utf8_lossy(other).to_string();
                destination.fail_all(Error::UnsupportedAlpn(proto));
                return;
            }
        }
        self.drain_pending_setup(key);
        self.flush_destination(key);
    }

    /// Sends queued bytes (and HTTP/2 handler output) to the socket
    fn flush_destination(&mut self, key: &str) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if let Some(handler) = destination.h2.as_mut() {
            if handler.has_output() {
                let out = handler.take_output();
                if let Err(error) = destination.queue_plaintext(&out) {
                    destination.fail_all(error);
                    return;
                }
            }
        }
        if let Err(error) = destination.flush_wire() {
            destination.fail_all(error);
        }
    }

    /// One read/write cycle over the socket
    fn pump_io(&mut self, key: &str) {
        // push pending bytes first: rustls wants the ClientHello (or any
        // queued records) on the wire before progress is possible
        self.flush_destination(key);

        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.transport_error {
            return;
        }

        let mut incoming = BytesMut::new();
        let read = match destination.read_wire(&mut incoming) {
            Ok(read) => read,
            Err(error) => {
                destination.fail_all(error);
                return;
            }
        };

        if destination.https && destination.proto == Proto::Pending {
            if destination.tls_handshake_done() {
                self.on_tls_ready(key);
            } else {
                // keep alternating write/read until the handshake settles
                self.flush_destination(key);
            }
        }

        if read == WireRead::Eof {
            self.on_eof(key);
            return;
        }

        if !incoming.is_empty() {
            let Some(destination) = self.destinations.get_mut(key) else {
                return;
            };
            match destination.proto {
                Proto::H1 => {
                    destination.h1_parser.feed(&incoming);
                    self.h1_start_read(key);
                    self.h1_step_read(key);
                }
                Proto::H2 => self.h2_on_input(key, &incoming),
                Proto::Pending => {
                    // plaintext before protocol selection cannot happen:
                    // rustls buffers handshake data internally
                }
            }
        }

        self.flush_destination(key);
    }

    /// Peer closed the connection
    fn on_eof(&mut self, key: &str) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };

        // an EOF can legitimately terminate an unframed h1 body
        if destination.proto == Proto::H1 && destination.h1_reading.is_some() {
            if destination.h1_parser.on_eof().is_ok() {
                self.h1_step_read(key);
                self.remove_destination(key);
                return;
            }
        }

        let idle = destination.h1_writing.is_none()
            && destination.h1_reading.is_none()
            && destination.h1_write_queue.is_empty()
            && destination.h1_read_queue.is_empty()
            && destination.h2_streams.is_empty()
            && destination.pending_setup.is_empty();
        if idle {
            // normal keep-alive closure between requests
            self.remove_destination(key);
            return;
        }

        destination.fail_all(Error::Transport("connection closed by peer".into()));
        self.remove_destination(key);
    }

    fn remove_destination(&mut self, key: &str) {
        if let Some(mut destination) = self.destinations.remove(key) {
            self.tokens.remove(&destination.token);
            if let Some(mut socket) = destination.socket.take() {
                let _ = self.registry.deregister(&mut socket);
            }
        }
    }

    /// Routes a ready request to the destination's protocol
    fn schedule_request(&mut self, key: &str, response: Arc<ResponseShared>) {
        let Some(destination) = self.destinations.get_mut(key) else {
            response.fail(Error::ClientClosed);
            return;
        };
        match destination.proto {
            Proto::H2 => self.h2_begin_request(key, response),
            Proto::H1 | Proto::Pending => {
                if destination.h1_writing.is_some() {
                    destination.h1_write_queue.push_back(response);
                    return;
                }
                destination.h1_encoder.reset();
                destination.h1_writing = Some(response);
                self.h1_step_write(key);
            }
        }
    }

    // === HTTP/1.1 ===

    fn h1_step_write(&mut self, key: &str) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.check_recursion_limit() {
            let key = key.to_string();
            self.defer(Box::new(move |driver| driver.h1_step_write(&key)));
            return;
        }
        let Some(response) = destination.h1_writing.clone() else {
            return;
        };
        if let Some(error) = destination.conn_err.clone() {
            response.fail(error);
            destination.h1_writing = None;
            return;
        }

        let result = {
            let Destination {
                h1_encoder, h1_out, ..
            } = destination;
            let mut writer = RequestWriter::new(
                &response.uri,
                WriterBackend::H1 {
                    encoder: h1_encoder,
                    out: h1_out,
                },
            );
            let result = response.callback.lock().do_request(&response.uri, &mut writer);
            response
                .head_request
                .store(writer.is_head(), Ordering::Relaxed);
            result.and(writer.take_error().map_or(Ok(()), Err))
        };

        if let Err(error) = result {
            response.fail(error);
            // a partially-written request poisons the connection
            destination.fail_all(Error::Transport("request aborted mid-write".into()));
            return;
        }

        let out = destination.h1_out.split();
        if let Err(error) = destination.queue_plaintext(&out) {
            destination.fail_all(error);
            return;
        }
        let finished = destination.h1_encoder.is_fin();
        self.flush_destination(key);

        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.transport_error {
            return;
        }

        if !finished {
            // resumable request body: re-invoke via the completion queue
            let key = key.to_string();
            self.defer(Box::new(move |driver| driver.h1_step_write(&key)));
            return;
        }

        destination.h1_writing = None;
        destination.h1_read_queue.push_back(response);
        if let Some(next) = destination.h1_write_queue.pop_front() {
            destination.h1_encoder.reset();
            destination.h1_writing = Some(next);
            let key_copy = key.to_string();
            self.defer(Box::new(move |driver| driver.h1_step_write(&key_copy)));
        }
        self.h1_start_read(key);
    }

    /// Starts reading the next queued response when the reader is idle
    fn h1_start_read(&mut self, key: &str) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.h1_reading.is_some() {
            return;
        }
        let Some(response) = destination.h1_read_queue.pop_front() else {
            return;
        };
        destination
            .h1_parser
            .reset(response.head_request.load(Ordering::Relaxed));
        destination.h1_reading = Some(response);
        self.h1_step_read(key);
    }

    fn h1_step_read(&mut self, key: &str) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.check_recursion_limit() {
            let key = key.to_string();
            self.defer(Box::new(move |driver| driver.h1_step_read(&key)));
            return;
        }
        let Some(response) = destination.h1_reading.clone() else {
            return;
        };

        let done = match destination.h1_parser.drive() {
            Ok(done) => done,
            Err(error) => {
                // malformed framing poisons the whole connection
                response.fail(error.clone());
                destination.fail_all(error);
                return;
            }
        };

        if destination.h1_parser.headers_done() && response.is_pending() {
            let mut reader = ResponseReader::new(ReaderBackend::H1(&mut destination.h1_parser));
            let result = response.callback.lock().do_response(&response.uri, &mut reader);
            if let Err(error) = result {
                response.fail(error);
            }
        }

        if done {
            response.complete();
            destination.h1_reading = None;
            if !destination.h1_parser.keep_alive() {
                self.remove_destination(key);
                return;
            }
            self.h1_start_read(key);
        }
    }

    // === HTTP/2 ===

    fn h2_begin_request(&mut self, key: &str, response: Arc<ResponseShared>) {
        let Some(destination) = self.destinations.get_mut(key) else {
            response.fail(Error::ClientClosed);
            return;
        };
        let Some(handler) = destination.h2.as_mut() else {
            response.fail(Error::Transport("http/2 handler missing".into()));
            return;
        };
        let Some(stream_id) = handler.open() else {
            response.fail(Error::Transport(
                "connection is shutting down (GOAWAY)".into(),
            ));
            return;
        };
        destination.h2_streams.insert(
            stream_id,
            super::destination::H2StreamCtx {
                response,
                request: Default::default(),
                body: BytesMut::new(),
            },
        );
        self.h2_step_write(key, stream_id);
    }

    fn h2_step_write(&mut self, key: &str, stream_id: u32) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.check_recursion_limit() {
            let key = key.to_string();
            self.defer(Box::new(move |driver| driver.h2_step_write(&key, stream_id)));
            return;
        }

        let Destination {
            h2, h2_streams, ..
        } = destination;
        let Some(ctx) = h2_streams.get_mut(&stream_id) else {
            return;
        };
        let Some(handler) = h2.as_mut() else {
            return;
        };
        let response = ctx.response.clone();

        let (result, finished) = {
            let mut writer = RequestWriter::new(
                &response.uri,
                WriterBackend::H2 {
                    handler,
                    stream_id,
                    state: &mut ctx.request,
                },
            );
            let result = response.callback.lock().do_request(&response.uri, &mut writer);
            response
                .head_request
                .store(writer.is_head(), Ordering::Relaxed);
            let result = result.and(writer.take_error().map_or(Ok(()), Err));
            (result, writer.is_fin())
        };

        if let Err(error) = result {
            response.fail(error);
            destination.h2_streams.remove(&stream_id);
            if let Some(handler) = destination.h2.as_mut() {
                handler.remove_stream(stream_id);
            }
            return;
        }

        self.flush_destination(key);

        if !finished {
            let key = key.to_string();
            self.defer(Box::new(move |driver| driver.h2_step_write(&key, stream_id)));
        }
    }

    fn h2_on_input(&mut self, key: &str, incoming: &[u8]) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        let Some(handler) = destination.h2.as_mut() else {
            return;
        };

        let events = match handler.add_input(incoming) {
            Ok(events) => events,
            Err(error) => {
                // fatal protocol error: GOAWAY, then drain what we can
                handler.send_goaway(error);
                if let Some(tls) = destination.tls.as_mut() {
                    tls.send_close_notify();
                }
                destination.fail_all(Error::H2(error));
                self.flush_destination(key);
                return;
            }
        };

        for event in events {
            match event {
                crate::h2::Event::Headers(stream_id) | crate::h2::Event::Data(stream_id) => {
                    self.h2_step_read(key, stream_id);
                }
                crate::h2::Event::End(stream_id) => {
                    self.h2_step_read(key, stream_id);
                }
                crate::h2::Event::Reset(stream_id, code) => {
                    let Some(destination) = self.destinations.get_mut(key) else {
                        return;
                    };
                    if let Some(ctx) = destination.h2_streams.remove(&stream_id) {
                        ctx.response.fail(Error::H2StreamReset(code));
                    }
                    if let Some(handler) = destination.h2.as_mut() {
                        handler.remove_stream(stream_id);
                    }
                }
                crate::h2::Event::GoAway(error) => {
                    tracing::debug!(key = %key, ?error, "goaway received");
                    // existing streams may still complete; new opens fail
                }
            }
        }
    }

    fn h2_step_read(&mut self, key: &str, stream_id: u32) {
        let Some(destination) = self.destinations.get_mut(key) else {
            return;
        };
        if destination.check_recursion_limit() {
            let key = key.to_string();
            self.defer(Box::new(move |driver| driver.h2_step_read(&key, stream_id)));
            return;
        }

        let Destination {
            h2, h2_streams, ..
        } = destination;
        let Some(ctx) = h2_streams.get_mut(&stream_id) else {
            return;
        };
        let Some(handler) = h2.as_mut() else {
            return;
        };

        if let Some(body) = handler.take_stream_body(stream_id) {
            ctx.body.extend_from_slice(&body);
        }
        let response = ctx.response.clone();

        let has_headers = handler.stream_headers(stream_id).is_some();
        if (has_headers || !ctx.body.is_empty()) && response.is_pending() {
            let mut reader = ResponseReader::new(ReaderBackend::H2 {
                handler: &mut *handler,
                stream_id,
                body: &mut ctx.body,
            });
            let result = response.callback.lock().do_response(&response.uri, &mut reader);
            if let Err(error) = result {
                response.fail(error);
            }
        }

        if handler.stream_ended(stream_id) {
            response.complete();
            handler.remove_stream(stream_id);
            destination.h2_streams.remove(&stream_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::{Client, RequestWriter, ResponseReader, UserCallback},
        error::Error,
        uri::CanonicalUri,
    };
    use parking_lot::Mutex;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        sync::Arc,
    };

    /// A callback collecting status and body
    struct Collector {
        status: Arc<Mutex<Option<u16>>>,
        body: Arc<Mutex<Vec<u8>>>,
    }

    impl UserCallback for Collector {
        fn do_request(
            &mut self,
            _uri: &CanonicalUri,
            writer: &mut RequestWriter<'_>,
        ) -> Result<(), Error> {
            if !writer.is_fin() {
                writer.begin("GET")?;
                writer.header("accept", "*/*")?;
                writer.finish()?;
            }
            Ok(())
        }

        fn do_response(
            &mut self,
            _uri: &CanonicalUri,
            reader: &mut ResponseReader<'_>,
        ) -> Result<(), Error> {
            *self.status.lock() = reader.status();
            let mut sink = Vec::new();
            reader.read_body(&mut sink);
            self.body.lock().extend_from_slice(&sink);
            Ok(())
        }
    }

    /// Serves canned HTTP/1.1 responses for `count` requests on one
    /// connection
    fn serve_h1(count: usize) -> (std::thread::JoinHandle<()>, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buffer = Vec::new();
            for index in 0..count {
                // read until the end of the request head
                let mut chunk = [0u8; 1024];
                while !buffer
                    .windows(4)
                    .any(|window| window == b"\r\n\r\n")
                {
                    let read = socket.read(&mut chunk).unwrap();
                    if read == 0 {
                        return;
                    }
                    buffer.extend_from_slice(&chunk[..read]);
                }
                let head_end = buffer
                    .windows(4)
                    .position(|window| window == b"\r\n\r\n")
                    .unwrap();
                buffer.drain(..head_end + 4);

                let body = format!("hello {index}");
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).unwrap();
            }
        });
        (handle, port)
    }

    #[test]
    fn plain_http1_request_round_trip() {
        let (server, port) = serve_h1(1);
        let client = Client::new().unwrap();

        let status = Arc::new(Mutex::new(None));
        let body = Arc::new(Mutex::new(Vec::new()));
        let response = client
            .request(
                &format!("http://127.0.0.1:{port}/"),
                Collector {
                    status: status.clone(),
                    body: body.clone(),
                },
            )
            .unwrap();

        response.wait().unwrap();
        assert!(response.done());
        assert_eq!(*status.lock(), Some(200));
        assert_eq!(&body.lock()[..], b"hello 0");
        server.join().unwrap();
    }

    #[test]
    fn http1_requests_are_serialized_in_order() {
        let (server, port) = serve_h1(2);
        let client = Client::new().unwrap();
        let uri = format!("http://127.0.0.1:{port}/");

        let first_body = Arc::new(Mutex::new(Vec::new()));
        let second_body = Arc::new(Mutex::new(Vec::new()));
        let first = client
            .request(
                &uri,
                Collector {
                    status: Arc::new(Mutex::new(None)),
                    body: first_body.clone(),
                },
            )
            .unwrap();
        let second = client
            .request(
                &uri,
                Collector {
                    status: Arc::new(Mutex::new(None)),
                    body: second_body.clone(),
                },
            )
            .unwrap();

        first.wait().unwrap();
        second.wait().unwrap();
        assert_eq!(&first_body.lock()[..], b"hello 0");
        assert_eq!(&second_body.lock()[..], b"hello 1");
        server.join().unwrap();
    }

    #[test]
    fn requests_to_https_without_tls_config_fail_fast() {
        let client = Client::new().unwrap();
        let result = client.request(
            "https://example.com/",
            Collector {
                status: Arc::new(Mutex::new(None)),
                body: Arc::new(Mutex::new(Vec::new())),
            },
        );
        assert!(matches!(result, Err(Error::MissingTlsConfig)));
    }

    #[test]
    fn connect_failures_accumulate() {
        // a port that is almost certainly closed
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = Client::new().unwrap();
        let response = client
            .request(
                &format!("http://127.0.0.1:{port}/"),
                Collector {
                    status: Arc::new(Mutex::new(None)),
                    body: Arc::new(Mutex::new(Vec::new())),
                },
            )
            .unwrap();
        let error = response.wait().unwrap_err();
        assert!(
            matches!(error, Error::Connect(_) | Error::Transport(_)),
            "{error:?}"
        );
    }
}
