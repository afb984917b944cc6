// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client error taxonomy.
//!
//! Transport and protocol errors are fatal to a destination and fan out
//! to every request pending on it, so the type is `Clone`. Application
//! errors bind to a single request. Flow/would-block conditions never
//! surface here.

use crate::h2::H2Error;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The request URI did not parse
    #[error("invalid uri: {0}")]
    Uri(String),

    /// Only http and https are dialable
    #[error("scheme is not http or https")]
    UnsupportedScheme,

    /// An https request needs a TLS config first
    #[error("tls config is not set")]
    MissingTlsConfig,

    /// DNS resolution failed for the destination host
    #[error("dns resolution failed: {0}")]
    Dns(String),

    /// Every resolved address failed to connect; the message accumulates
    /// one entry per attempt
    #[error("connect failed: {0}")]
    Connect(String),

    /// Socket read/write failure, early EOF, or teardown mid-request
    #[error("transport error: {0}")]
    Transport(String),

    /// TLS handshake or record-layer failure
    #[error("tls error: {0}")]
    Tls(String),

    /// The server negotiated a protocol this client does not speak
    #[error("unsupported alpn protocol: {0}")]
    UnsupportedAlpn(String),

    /// HTTP/2 connection error
    #[error("http/2 protocol error: {0:?}")]
    H2(H2Error),

    /// HTTP/2 stream reset by the peer
    #[error("http/2 stream reset: code {0}")]
    H2StreamReset(u32),

    /// Malformed HTTP/1.1 response
    #[error("http/1.1 parse error: {0}")]
    H1(String),

    /// A user callback or configuration problem scoped to one request
    #[error("{0}")]
    Application(String),

    /// The client handle was dropped while work was pending
    #[error("client is already destroyed")]
    ClientClosed,
}

impl From<H2Error> for Error {
    fn from(error: H2Error) -> Self {
        Self::H2(error)
    }
}
