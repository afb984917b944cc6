// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The client: request entry point, per-request response handles and the
//! resumable writer/reader surfaces handed to user callbacks.

mod destination;
mod dns;
mod driver;

use crate::{
    error::Error,
    h1::{RequestEncoder, ResponseParser},
    h2::FrameHandler,
    uri::CanonicalUri,
};
use bytes::BytesMut;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::sync::{atomic::AtomicBool, Arc};

pub(crate) use driver::Driver;

/// Per-request application callbacks
///
/// Both methods are resumable: each invocation appends or consumes as
/// much as it has, and is invoked again until the message is complete.
pub trait UserCallback: Send + 'static {
    /// Appends request bytes; call `writer.finish()` once the request
    /// (including any body) is complete
    fn do_request(&mut self, uri: &CanonicalUri, writer: &mut RequestWriter<'_>)
        -> Result<(), Error>;

    /// Consumes response bytes as they become available
    fn do_response(&mut self, uri: &CanonicalUri, reader: &mut ResponseReader<'_>)
        -> Result<(), Error>;
}

#[derive(Debug)]
enum Status {
    Pending,
    Done,
    Failed(Error),
}

/// Shared state behind a `Response` handle; the pipeline holds a second
/// strong reference until the request completes
pub(crate) struct ResponseShared {
    pub(crate) uri: CanonicalUri,
    state: Mutex<Status>,
    cond: Condvar,
    pub(crate) callback: Mutex<Box<dyn UserCallback>>,
    /// Set while writing the request; HEAD responses carry no body
    pub(crate) head_request: AtomicBool,
}

impl ResponseShared {
    pub(crate) fn new(uri: CanonicalUri, callback: Box<dyn UserCallback>) -> Arc<Self> {
        Arc::new(Self {
            uri,
            state: Mutex::new(Status::Pending),
            cond: Condvar::new(),
            callback: Mutex::new(callback),
            head_request: AtomicBool::new(false),
        })
    }

    pub(crate) fn complete(&self) {
        let mut state = self.state.lock();
        if matches!(*state, Status::Pending) {
            *state = Status::Done;
            self.cond.notify_all();
        }
    }

    pub(crate) fn fail(&self, error: Error) {
        let mut state = self.state.lock();
        if matches!(*state, Status::Pending) {
            *state = Status::Failed(error);
            self.cond.notify_all();
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), Status::Pending)
    }
}

/// Handle to an in-flight request
#[derive(Clone)]
pub struct Response {
    pub(crate) shared: Arc<ResponseShared>,
}

impl Response {
    /// Blocks until the request completes or fails
    pub fn wait(&self) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        while matches!(*state, Status::Pending) {
            self.shared.cond.wait(&mut state);
        }
        match &*state {
            Status::Done => Ok(()),
            Status::Failed(error) => Err(error.clone()),
            Status::Pending => unreachable!("wait loop exits only on completion"),
        }
    }

    /// True once the request completed or failed
    pub fn done(&self) -> bool {
        !matches!(*self.shared.state.lock(), Status::Pending)
    }
}

/// Accumulated HTTP/2 request-writing state for one stream
#[derive(Debug, Default)]
pub(crate) struct H2RequestState {
    headers: Vec<(String, String)>,
    headers_sent: bool,
    body_started: bool,
    fin: bool,
}

pub(crate) enum WriterBackend<'a> {
    H1 {
        encoder: &'a mut RequestEncoder,
        out: &'a mut BytesMut,
    },
    H2 {
        handler: &'a mut FrameHandler,
        stream_id: u32,
        state: &'a mut H2RequestState,
    },
}

/// Appends request bytes; dispatches to the HTTP/1.1 or HTTP/2 writer
pub struct RequestWriter<'a> {
    uri: &'a CanonicalUri,
    backend: WriterBackend<'a>,
    error: Option<Error>,
}

impl<'a> RequestWriter<'a> {
    pub(crate) fn new(uri: &'a CanonicalUri, backend: WriterBackend<'a>) -> Self {
        Self {
            uri,
            backend,
            error: None,
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    fn record<T>(&mut self, result: Result<T, Error>) -> Result<(), Error> {
        if let Err(error) = result {
            self.error = Some(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Starts the request with its method; the target comes from the URI
    pub fn begin(&mut self, method: &str) -> Result<(), Error> {
        let target = self.uri.request_target();
        match &mut self.backend {
            WriterBackend::H1 { encoder, out } => {
                let mut result = encoder.request_line(out, method, &target);
                if result.is_ok() {
                    result = encoder.header(out, "host", &self.uri.authority());
                }
                self.record(result)
            }
            WriterBackend::H2 { state, .. } => {
                if state.headers_sent || !state.headers.is_empty() {
                    return self.record::<()>(Err(Error::Application(
                        "request line already written".into(),
                    )));
                }
                state
                    .headers
                    .push((":method".into(), method.to_uppercase()));
                state
                    .headers
                    .push((":scheme".into(), self.uri.scheme.clone()));
                state
                    .headers
                    .push((":authority".into(), self.uri.authority()));
                state.headers.push((":path".into(), target));
                Ok(())
            }
        }
    }

    /// True when the request began with the HEAD method
    pub fn is_head(&self) -> bool {
        match &self.backend {
            WriterBackend::H1 { encoder, .. } => encoder.is_head(),
            WriterBackend::H2 { state, .. } => state
                .headers
                .iter()
                .any(|(name, value)| name == ":method" && value == "HEAD"),
        }
    }

    /// Appends one header
    ///
    /// Names render `Canonical-Case` on HTTP/1.1 and lowercase on HTTP/2;
    /// connection-scoped headers are dropped on HTTP/2.
    pub fn header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        match &mut self.backend {
            WriterBackend::H1 { encoder, out } => {
                let result = encoder.header(out, name, value);
                self.record(result)
            }
            WriterBackend::H2 { state, .. } => {
                if state.headers_sent {
                    return self.record::<()>(Err(Error::Application(
                        "headers are already complete".into(),
                    )));
                }
                let name = name.to_ascii_lowercase();
                if matches!(
                    name.as_str(),
                    "connection" | "host" | "keep-alive" | "transfer-encoding" | "upgrade"
                ) {
                    return Ok(());
                }
                state.headers.push((name, value.to_string()));
                Ok(())
            }
        }
    }

    /// Appends a run of body bytes
    pub fn body(&mut self, data: &[u8]) -> Result<(), Error> {
        match &mut self.backend {
            WriterBackend::H1 { encoder, out } => {
                let result = encoder.body(out, data);
                self.record(result)
            }
            WriterBackend::H2 {
                handler,
                stream_id,
                state,
            } => {
                if !state.headers_sent {
                    let result = handler
                        .send_headers(*stream_id, &state.headers, false)
                        .map_err(Error::from);
                    state.headers_sent = true;
                    state.body_started = true;
                    if let Err(error) = result {
                        self.error = Some(error.clone());
                        return Err(error);
                    }
                }
                let result = handler
                    .send_data(*stream_id, data, false)
                    .map_err(Error::from);
                self.record(result)
            }
        }
    }

    /// Marks the request complete
    pub fn finish(&mut self) -> Result<(), Error> {
        match &mut self.backend {
            WriterBackend::H1 { encoder, out } => {
                let result = encoder.finish(out);
                self.record(result)
            }
            WriterBackend::H2 {
                handler,
                stream_id,
                state,
            } => {
                if state.fin {
                    return Ok(());
                }
                let result = if !state.headers_sent {
                    // header-only request: END_STREAM rides on HEADERS
                    state.headers_sent = true;
                    handler
                        .send_headers(*stream_id, &state.headers, true)
                        .map_err(Error::from)
                } else {
                    handler
                        .send_data(*stream_id, &[], true)
                        .map_err(Error::from)
                };
                state.fin = true;
                self.record(result)
            }
        }
    }

    /// True once `finish` ran; the pipeline stops re-invoking `do_request`
    pub fn is_fin(&self) -> bool {
        match &self.backend {
            WriterBackend::H1 { encoder, .. } => encoder.is_fin(),
            WriterBackend::H2 { state, .. } => state.fin,
        }
    }
}

pub(crate) enum ReaderBackend<'a> {
    H1(&'a mut ResponseParser),
    H2 {
        handler: &'a mut FrameHandler,
        stream_id: u32,
        body: &'a mut BytesMut,
    },
}

/// Consumes response bytes in resumable chunks
pub struct ResponseReader<'a> {
    backend: ReaderBackend<'a>,
}

impl<'a> ResponseReader<'a> {
    pub(crate) fn new(backend: ReaderBackend<'a>) -> Self {
        Self { backend }
    }

    /// The response status code, once the header section arrived
    pub fn status(&self) -> Option<u16> {
        match &self.backend {
            ReaderBackend::H1(parser) => parser.status(),
            ReaderBackend::H2 {
                handler, stream_id, ..
            } => handler
                .stream_headers(*stream_id)?
                .iter()
                .find(|(name, _)| name == ":status")
                .and_then(|(_, value)| value.parse().ok()),
        }
    }

    /// Response headers seen so far (HTTP/2 pseudo-headers excluded)
    pub fn headers(&self) -> Vec<(String, String)> {
        match &self.backend {
            ReaderBackend::H1(parser) => parser.headers().to_vec(),
            ReaderBackend::H2 {
                handler, stream_id, ..
            } => handler
                .stream_headers(*stream_id)
                .map(|headers| {
                    headers
                        .iter()
                        .filter(|(name, _)| !name.starts_with(':'))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Drains decoded body bytes into `sink`, returning how many arrived
    pub fn read_body(&mut self, sink: &mut Vec<u8>) -> usize {
        match &mut self.backend {
            ReaderBackend::H1(parser) => {
                let body = parser.take_body();
                sink.extend_from_slice(&body);
                body.len()
            }
            ReaderBackend::H2 { body, .. } => {
                sink.extend_from_slice(body);
                let len = body.len();
                body.clear();
                len
            }
        }
    }

    /// True once the full response has been delivered
    pub fn is_done(&self) -> bool {
        match &self.backend {
            ReaderBackend::H1(parser) => parser.is_done(),
            ReaderBackend::H2 {
                handler, stream_id, ..
            } => handler.stream_ended(*stream_id),
        }
    }
}

pub(crate) type Task = Box<dyn FnOnce(&mut Driver) + Send>;

pub(crate) struct Shared {
    pub(crate) tasks: Sender<Task>,
    pub(crate) waker: mio::Waker,
    pub(crate) dns: Sender<dns::DnsRequest>,
    pub(crate) tls: Mutex<Option<Arc<rustls::ClientConfig>>>,
}

impl Shared {
    /// Enqueues a deferred callback and wakes the completion thread
    pub(crate) fn post(&self, task: Task) -> Result<(), Error> {
        self.tasks.send(task).map_err(|_| Error::ClientClosed)?;
        let _ = self.waker.wake();
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // unblock the poll loop so it observes the closed channel
        let _ = self.waker.wake();
    }
}

/// The HTTP client: a destination cache plus its worker threads
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Starts the completion and DNS threads
    pub fn new() -> Result<Self, Error> {
        let poll = mio::Poll::new()
            .map_err(|error| Error::Application(format!("poll setup failed: {error}")))?;
        let waker = mio::Waker::new(poll.registry(), driver::WAKER_TOKEN)
            .map_err(|error| Error::Application(format!("waker setup failed: {error}")))?;
        let (task_tx, task_rx) = crossbeam_channel::unbounded();
        let (dns_tx, dns_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            tasks: task_tx,
            waker,
            dns: dns_tx,
            tls: Mutex::new(None),
        });

        let driver_shared = Arc::downgrade(&shared);
        std::thread::Builder::new()
            .name("quill-http-completion".into())
            .spawn(move || Driver::new(poll, task_rx, driver_shared).run())
            .map_err(|error| Error::Application(format!("thread spawn failed: {error}")))?;

        let dns_shared = Arc::downgrade(&shared);
        std::thread::Builder::new()
            .name("quill-http-dns".into())
            .spawn(move || dns::run(dns_rx, dns_shared))
            .map_err(|error| Error::Application(format!("thread spawn failed: {error}")))?;

        Ok(Self { shared })
    }

    /// Installs the TLS configuration used for https destinations
    pub fn set_tls_config(&self, config: rustls::ClientConfig) {
        *self.shared.tls.lock() = Some(Arc::new(config));
    }

    /// Canonicalizes `uri` and schedules the request
    ///
    /// The returned handle resolves once the response completes; errors
    /// before scheduling (URI parse, scheme, missing TLS config) surface
    /// immediately.
    pub fn request(
        &self,
        uri: &str,
        callback: impl UserCallback,
    ) -> Result<Response, Error> {
        let uri = CanonicalUri::parse(uri)?;
        if uri.is_https() && self.shared.tls.lock().is_none() {
            return Err(Error::MissingTlsConfig);
        }

        let shared = ResponseShared::new(uri, Box::new(callback));
        let response = Response {
            shared: shared.clone(),
        };
        self.shared
            .post(Box::new(move |driver| driver.handle_request(shared)))?;
        Ok(response)
    }
}
