// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Resumable HTTP/1.1 response parsing.
//!
//! The parser consumes whatever input it has and remembers exactly where
//! it stopped, so feeding the same response in one buffer or byte by byte
//! yields identical results.

use crate::{error::Error, h1::is_no_body_status, h1::name_eq};
use bytes::{BufMut, BytesMut};

/// How the response body is delimited
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyKind {
    /// Neither content-length nor chunked: the body runs to EOF
    NoInfo,
    /// Status or method semantics forbid a body
    NoBody,
    ContentLength(u64),
    Chunked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    StatusLine,
    Headers,
    Body,
    ChunkSize,
    ChunkData(u64),
    ChunkDataCrlf,
    Trailers,
    Done,
}

/// Incremental response parser
#[derive(Debug)]
pub struct ResponseParser {
    input: BytesMut,
    phase: Phase,
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body_kind: BodyKind,
    content_remaining: u64,
    head_request: bool,
    keep_alive: bool,
    /// Body bytes decoded so far and not yet drained by the caller
    body: BytesMut,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            input: BytesMut::new(),
            phase: Phase::StatusLine,
            status: 0,
            reason: String::new(),
            headers: Vec::new(),
            body_kind: BodyKind::NoInfo,
            content_remaining: 0,
            head_request: false,
            keep_alive: true,
            body: BytesMut::new(),
        }
    }

    /// Prepares for the next response on the same connection, keeping any
    /// already-buffered input
    pub fn reset(&mut self, head_request: bool) {
        self.phase = Phase::StatusLine;
        self.status = 0;
        self.reason.clear();
        self.headers.clear();
        self.body_kind = BodyKind::NoInfo;
        self.content_remaining = 0;
        self.head_request = head_request;
        self.keep_alive = true;
        self.body.clear();
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.input.put_slice(data);
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// True once the status line and headers have been parsed
    #[inline]
    pub fn headers_done(&self) -> bool {
        !matches!(self.phase, Phase::StatusLine | Phase::Headers)
    }

    #[inline]
    pub fn status(&self) -> Option<u16> {
        if self.headers_done() {
            Some(self.status)
        } else {
            None
        }
    }

    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[inline]
    pub fn body_kind(&self) -> BodyKind {
        self.body_kind
    }

    #[inline]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Takes the body bytes decoded so far
    pub fn take_body(&mut self) -> BytesMut {
        core::mem::take(&mut self.body)
    }

    /// The peer closed the connection; an EOF-delimited body completes
    pub fn on_eof(&mut self) -> Result<(), Error> {
        if self.phase == Phase::Body && self.body_kind == BodyKind::NoInfo {
            self.body.put_slice(&self.input.split());
            self.phase = Phase::Done;
            return Ok(());
        }
        if self.phase == Phase::Done {
            return Ok(());
        }
        Err(Error::Transport("connection closed mid-response".into()))
    }

    /// Consumes as much buffered input as possible
    ///
    /// Returns `true` once the response is complete; `false` means more
    /// input is needed and the parse will resume where it stopped.
    pub fn drive(&mut self) -> Result<bool, Error> {
        loop {
            match self.phase {
                Phase::StatusLine => {
                    let Some(line) = self.take_line()? else {
                        return Ok(false);
                    };
                    self.parse_status_line(&line)?;
                    self.phase = Phase::Headers;
                }
                Phase::Headers => {
                    let Some(line) = self.take_line()? else {
                        return Ok(false);
                    };
                    if line.is_empty() {
                        self.on_headers_complete();
                        continue;
                    }
                    self.parse_header_line(&line)?;
                }
                Phase::Body => match self.body_kind {
                    BodyKind::NoBody => self.phase = Phase::Done,
                    BodyKind::NoInfo => {
                        // EOF-delimited: everything buffered is body
                        self.body.put_slice(&self.input.split());
                        return Ok(false);
                    }
                    BodyKind::ContentLength(_) => {
                        let take = self.content_remaining.min(self.input.len() as u64) as usize;
                        self.body.put_slice(&self.input.split_to(take));
                        self.content_remaining -= take as u64;
                        if self.content_remaining == 0 {
                            self.phase = Phase::Done;
                        } else {
                            return Ok(false);
                        }
                    }
                    BodyKind::Chunked => self.phase = Phase::ChunkSize,
                },
                Phase::ChunkSize => {
                    let Some(line) = self.take_line()? else {
                        return Ok(false);
                    };
                    // chunk extensions after ';' are ignored
                    let size_text = match line.iter().position(|byte| *byte == b';') {
                        Some(end) => &line[..end],
                        None => &line[..],
                    };
                    let size_text = core::str::from_utf8(size_text)
                        .map_err(|_| Error::H1("invalid chunk size".into()))?
                        .trim();
                    let size = u64::from_str_radix(size_text, 16)
                        .map_err(|_| Error::H1("invalid chunk size".into()))?;
                    if size == 0 {
                        self.phase = Phase::Trailers;
                    } else {
                        self.phase = Phase::ChunkData(size);
                    }
                }
                Phase::ChunkData(remaining) => {
                    let take = remaining.min(self.input.len() as u64) as usize;
                    self.body.put_slice(&self.input.split_to(take));
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.phase = Phase::ChunkDataCrlf;
                    } else {
                        self.phase = Phase::ChunkData(remaining);
                        return Ok(false);
                    }
                }
                Phase::ChunkDataCrlf => {
                    let Some(line) = self.take_line()? else {
                        return Ok(false);
                    };
                    if !line.is_empty() {
                        return Err(Error::H1("missing CRLF after chunk data".into()));
                    }
                    self.phase = Phase::ChunkSize;
                }
                Phase::Trailers => {
                    let Some(line) = self.take_line()? else {
                        return Ok(false);
                    };
                    if line.is_empty() {
                        self.phase = Phase::Done;
                    }
                    // trailer fields are consumed and dropped
                }
                Phase::Done => return Ok(true),
            }
        }
    }

    /// Removes one `\r\n`- (or `\n`-) terminated line from the input
    fn take_line(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let Some(newline) = self.input.iter().position(|byte| *byte == b'\n') else {
            return Ok(None);
        };
        let mut line = self.input.split_to(newline + 1);
        // drop the newline and an optional preceding carriage return
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Ok(Some(line.to_vec()))
    }

    fn parse_status_line(&mut self, line: &[u8]) -> Result<(), Error> {
        let text =
            core::str::from_utf8(line).map_err(|_| Error::H1("invalid status line".into()))?;
        let mut parts = text.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        if !version.starts_with("HTTP/1.") {
            return Err(Error::H1("unsupported http version".into()));
        }
        let status = parts
            .next()
            .and_then(|status| status.parse::<u16>().ok())
            .filter(|status| (100..=999).contains(status))
            .ok_or_else(|| Error::H1("invalid status code".into()))?;
        self.status = status;
        self.reason = parts.next().unwrap_or("").to_string();
        if version == "HTTP/1.0" {
            self.keep_alive = false;
        }
        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), Error> {
        let text =
            core::str::from_utf8(line).map_err(|_| Error::H1("invalid header line".into()))?;
        let Some((name, value)) = text.split_once(':') else {
            return Err(Error::H1("header line without a colon".into()));
        };
        let name = name.trim_end();
        let value = value.trim_start();

        if name_eq(name, "transfer-encoding") && value.contains("chunked") {
            self.body_kind = BodyKind::Chunked;
        } else if name_eq(name, "content-length") && self.body_kind == BodyKind::NoInfo {
            let length = value
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::H1("invalid content-length value".into()))?;
            self.body_kind = BodyKind::ContentLength(length);
            self.content_remaining = length;
        } else if name_eq(name, "connection") {
            if value.eq_ignore_ascii_case("close") {
                self.keep_alive = false;
            } else if value.eq_ignore_ascii_case("keep-alive") {
                self.keep_alive = true;
            }
        }

        self.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn on_headers_complete(&mut self) {
        if is_no_body_status(self.status, self.head_request) {
            self.body_kind = BodyKind::NoBody;
        } else if let BodyKind::ContentLength(0) = self.body_kind {
            self.body_kind = BodyKind::NoBody;
        }
        self.phase = Phase::Body;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNKED: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Content-Type: text/html\r\n\
        Transfer-Encoding: chunked\r\n\
        \r\n\
        1b\r\n<doctype html><html></html>\r\n\
        5\r\nhello\r\n\
        0\r\n\r\n";

    const SIZED: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

    fn parse_in_one_shot(bytes: &[u8], head: bool) -> ResponseParser {
        let mut parser = ResponseParser::new();
        parser.reset(head);
        parser.feed(bytes);
        assert!(parser.drive().unwrap());
        parser
    }

    /// Parsing the full response at once and byte by byte must agree
    fn assert_restartable(bytes: &[u8]) {
        let mut reference = parse_in_one_shot(bytes, false);
        let reference_body = reference.take_body();

        let mut parser = ResponseParser::new();
        parser.reset(false);
        let mut body = BytesMut::new();
        let mut done = false;
        for byte in bytes {
            parser.feed(core::slice::from_ref(byte));
            done = parser.drive().unwrap();
            body.extend_from_slice(&parser.take_body());
        }
        assert!(done);
        assert_eq!(parser.status(), reference.status());
        assert_eq!(parser.headers(), reference.headers());
        assert_eq!(&body[..], &reference_body[..]);
    }

    #[test]
    fn chunked_bodies_parse() {
        let mut parser = parse_in_one_shot(CHUNKED, false);
        assert_eq!(parser.status(), Some(200));
        assert_eq!(parser.body_kind(), BodyKind::Chunked);
        assert_eq!(&parser.take_body()[..], b"<doctype html><html></html>hello" as &[u8]);
    }

    #[test]
    fn content_length_bodies_parse() {
        let mut parser = parse_in_one_shot(SIZED, false);
        assert_eq!(&parser.take_body()[..], b"hello" as &[u8]);
        assert!(parser.keep_alive());
    }

    #[test]
    fn parser_is_restartable_at_any_split() {
        assert_restartable(CHUNKED);
        assert_restartable(SIZED);
    }

    #[test]
    fn no_body_responses_finish_at_the_header_boundary() {
        let bytes = b"HTTP/1.1 204 No Content\r\nServer: t\r\n\r\n";
        let parser = parse_in_one_shot(bytes, false);
        assert_eq!(parser.body_kind(), BodyKind::NoBody);

        // HEAD responses ignore content-length framing
        let bytes = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n";
        let parser = parse_in_one_shot(bytes, true);
        assert_eq!(parser.body_kind(), BodyKind::NoBody);
    }

    #[test]
    fn eof_delimits_unframed_bodies() {
        let mut parser = ResponseParser::new();
        parser.reset(false);
        parser.feed(b"HTTP/1.1 200 OK\r\n\r\npartial body");
        assert!(!parser.drive().unwrap());
        parser.on_eof().unwrap();
        assert!(parser.is_done());
        assert_eq!(&parser.take_body()[..], b"partial body" as &[u8]);
    }

    #[test]
    fn pipelined_responses_keep_leftover_input() {
        let mut parser = ResponseParser::new();
        parser.reset(false);
        let mut bytes = SIZED.to_vec();
        bytes.extend_from_slice(SIZED);
        parser.feed(&bytes);
        assert!(parser.drive().unwrap());
        assert_eq!(&parser.take_body()[..], b"hello" as &[u8]);

        parser.reset(false);
        assert!(parser.drive().unwrap());
        assert_eq!(&parser.take_body()[..], b"hello" as &[u8]);
    }

    #[test]
    fn early_close_is_a_transport_error() {
        let mut parser = ResponseParser::new();
        parser.reset(false);
        parser.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
        assert!(!parser.drive().unwrap());
        assert!(parser.on_eof().is_err());
    }
}
