// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! An HTTP client multiplexing HTTP/1.1 and HTTP/2 over a single
//! connection pool.
//!
//! Each `host:port` destination owns one TCP socket, at most one TLS
//! session and either a serialized HTTP/1.1 request/response pipeline or
//! an HTTP/2 frame handler with concurrent streams. All protocol state
//! runs on a single completion thread fed by a deferred-callback queue; a
//! DNS wait thread performs resolution off that thread.

pub mod client;
pub mod error;
pub mod h1;
pub mod h2;
pub mod uri;

pub use client::{Client, RequestWriter, Response, ResponseReader, UserCallback};
pub use error::Error;
pub use uri::CanonicalUri;

/// Builds a TLS client config trusting the bundled webpki roots, with
/// ALPN offering `h2` then `http/1.1`
pub fn default_tls_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    config
}

/// Builds a TLS client config trusting the PEM bundle at `path`
pub fn tls_config_with_ca_file(path: &std::path::Path) -> Result<rustls::ClientConfig, Error> {
    let file = std::fs::File::open(path)
        .map_err(|error| Error::Application(format!("cannot open CA bundle: {error}")))?;
    let mut reader = std::io::BufReader::new(file);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert =
            cert.map_err(|error| Error::Application(format!("invalid CA bundle: {error}")))?;
        roots
            .add(cert)
            .map_err(|error| Error::Application(format!("invalid CA certificate: {error}")))?;
    }
    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}
