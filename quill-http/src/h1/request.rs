// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Streaming HTTP/1.1 request serialization.

use crate::{error::Error, h1::canonical_field_name, h1::name_eq};
use bytes::{BufMut, BytesMut};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Line,
    Headers,
    Body,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BodyFraming {
    /// No framing decided yet; chunked is chosen if body bytes follow
    Undecided,
    ContentLength(u64),
    Chunked,
}

/// Appends a request to an output buffer piece by piece
///
/// The writer is resumable: the user callback appends as much as it has
/// on each invocation and the encoder tracks where in the message it is.
#[derive(Debug)]
pub struct RequestEncoder {
    phase: Phase,
    framing: BodyFraming,
    is_head: bool,
}

impl Default for RequestEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestEncoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::Line,
            framing: BodyFraming::Undecided,
            is_head: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True once the full request (including any body) was appended
    #[inline]
    pub fn is_fin(&self) -> bool {
        self.phase == Phase::Finished
    }

    #[inline]
    pub fn is_head(&self) -> bool {
        self.is_head
    }

    /// Appends `METHOD SP target SP HTTP/1.1 CRLF`
    pub fn request_line(
        &mut self,
        out: &mut BytesMut,
        method: &str,
        target: &str,
    ) -> Result<(), Error> {
        if self.phase != Phase::Line {
            return Err(Error::Application("request line already written".into()));
        }
        self.is_head = method.eq_ignore_ascii_case("HEAD");
        out.put_slice(method.as_bytes());
        out.put_u8(b' ');
        out.put_slice(target.as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");
        self.phase = Phase::Headers;
        Ok(())
    }

    /// Appends one header, canonicalizing the field name
    pub fn header(&mut self, out: &mut BytesMut, name: &str, value: &str) -> Result<(), Error> {
        if self.phase != Phase::Headers {
            return Err(Error::Application("headers are already complete".into()));
        }
        if name_eq(name, "content-length") {
            let length = value
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::Application("invalid content-length value".into()))?;
            self.framing = BodyFraming::ContentLength(length);
        } else if name_eq(name, "transfer-encoding") && value.contains("chunked") {
            self.framing = BodyFraming::Chunked;
        }
        out.put_slice(canonical_field_name(name).as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
        Ok(())
    }

    /// Ends the header block; chunked framing is chosen when a body is
    /// expected but no content length was given
    fn end_headers(&mut self, out: &mut BytesMut, has_body: bool) {
        if has_body && self.framing == BodyFraming::Undecided {
            out.put_slice(b"Transfer-Encoding: chunked\r\n");
            self.framing = BodyFraming::Chunked;
        }
        out.put_slice(b"\r\n");
        self.phase = Phase::Body;
    }

    /// Appends a run of body bytes with the negotiated framing
    pub fn body(&mut self, out: &mut BytesMut, data: &[u8]) -> Result<(), Error> {
        match self.phase {
            Phase::Headers => self.end_headers(out, true),
            Phase::Body => {}
            _ => return Err(Error::Application("body is not writable here".into())),
        }
        match &mut self.framing {
            BodyFraming::Chunked => {
                if !data.is_empty() {
                    let size = format!("{:x}\r\n", data.len());
                    out.put_slice(size.as_bytes());
                    out.put_slice(data);
                    out.put_slice(b"\r\n");
                }
            }
            BodyFraming::ContentLength(remaining) => {
                if (data.len() as u64) > *remaining {
                    return Err(Error::Application(
                        "body exceeds the declared content-length".into(),
                    ));
                }
                *remaining -= data.len() as u64;
                out.put_slice(data);
            }
            BodyFraming::Undecided => unreachable!("framing decided at end_headers"),
        }
        Ok(())
    }

    /// Completes the request
    pub fn finish(&mut self, out: &mut BytesMut) -> Result<(), Error> {
        match self.phase {
            Phase::Headers => {
                self.end_headers(out, false);
            }
            Phase::Body => {}
            Phase::Finished => return Ok(()),
            Phase::Line => {
                return Err(Error::Application("request line was never written".into()))
            }
        }
        match self.framing {
            BodyFraming::Chunked => out.put_slice(b"0\r\n\r\n"),
            BodyFraming::ContentLength(remaining) if remaining != 0 => {
                return Err(Error::Application(
                    "request finished short of the declared content-length".into(),
                ));
            }
            _ => {}
        }
        self.phase = Phase::Finished;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_bodyless_request() {
        let mut out = BytesMut::new();
        let mut encoder = RequestEncoder::new();
        encoder.request_line(&mut out, "GET", "/index.html").unwrap();
        encoder.header(&mut out, "host", "example.com").unwrap();
        encoder.header(&mut out, "accept", "*/*").unwrap();
        encoder.finish(&mut out).unwrap();
        assert!(encoder.is_fin());
        assert_eq!(
            &out[..],
            b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n" as &[u8]
        );
    }

    #[test]
    fn chunked_body_when_no_length_is_declared() {
        let mut out = BytesMut::new();
        let mut encoder = RequestEncoder::new();
        encoder.request_line(&mut out, "POST", "/upload").unwrap();
        encoder.header(&mut out, "host", "example.com").unwrap();
        encoder.body(&mut out, b"hello ").unwrap();
        encoder.body(&mut out, b"world").unwrap();
        encoder.finish(&mut out).unwrap();
        let text = core::str::from_utf8(&out).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with("6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n"));
    }

    #[test]
    fn content_length_body_is_exact() {
        let mut out = BytesMut::new();
        let mut encoder = RequestEncoder::new();
        encoder.request_line(&mut out, "POST", "/upload").unwrap();
        encoder.header(&mut out, "content-length", "5").unwrap();
        encoder.body(&mut out, b"exact").unwrap();
        encoder.finish(&mut out).unwrap();
        assert!(core::str::from_utf8(&out).unwrap().ends_with("\r\n\r\nexact"));

        let mut out = BytesMut::new();
        let mut encoder = RequestEncoder::new();
        encoder.request_line(&mut out, "POST", "/upload").unwrap();
        encoder.header(&mut out, "content-length", "5").unwrap();
        encoder.body(&mut out, b"ab").unwrap();
        assert!(encoder.finish(&mut out).is_err());
    }
}
