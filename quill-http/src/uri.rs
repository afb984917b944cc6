// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request URI canonicalization.
//!
//! Hosts are punycode-encoded and paths percent-encoded before a request
//! leaves the client, so every destination key and request line is plain
//! ASCII. Missing pieces get defaults: scheme `http`, path `/`, the
//! scheme's well-known port.

use crate::error::Error;
use url::Url;

/// Which canonicalization passes to apply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizeFlags {
    /// Punycode-encode the host
    pub host: bool,
    /// Percent-encode non-ASCII path bytes
    pub path: bool,
    /// Decode back to a human-readable form instead
    pub human_friendly: bool,
}

impl Default for NormalizeFlags {
    fn default() -> Self {
        Self {
            host: true,
            path: true,
            human_friendly: false,
        }
    }
}

/// Rewrites `uri` in canonical (wire) form, or decoded back for display
/// when `human_friendly` is set
pub fn normalize(uri: &str, flags: NormalizeFlags) -> Result<String, Error> {
    let parsed = CanonicalUri::parse(uri)?;
    let host = if flags.human_friendly && flags.host {
        parsed.human_friendly_host()
    } else {
        parsed.host.clone()
    };
    let target = if flags.human_friendly && flags.path {
        percent_decode_lossy(&parsed.request_target())
    } else {
        parsed.request_target()
    };
    let default_port = if parsed.scheme == "https" { 443 } else { 80 };
    if parsed.port == default_port {
        Ok(format!("{}://{}{}", parsed.scheme, host, target))
    } else {
        Ok(format!("{}://{}:{}{}", parsed.scheme, host, parsed.port, target))
    }
}

/// Decodes %XX escapes, leaving malformed escapes and non-UTF-8 results
/// untouched
fn percent_decode_lossy(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let hi = (bytes[index + 1] as char).to_digit(16);
            let lo = (bytes[index + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                decoded.push((hi * 16 + lo) as u8);
                index += 3;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8(decoded).unwrap_or_else(|_| input.to_string())
}

/// A parsed and canonicalized request target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalUri {
    pub scheme: String,
    /// ASCII (punycode) host
    pub host: String,
    pub port: u16,
    /// Percent-encoded path, always starting with `/`
    pub path: String,
    pub query: Option<String>,
}

impl CanonicalUri {
    /// Parses and canonicalizes `uri`
    pub fn parse(uri: &str) -> Result<Self, Error> {
        // a bare authority like "example.com/x" parses relative; give it
        // the default scheme first
        let text = if uri.contains("://") {
            uri.to_string()
        } else {
            format!("http://{uri}")
        };
        let url = Url::parse(&text).map_err(|error| Error::Uri(error.to_string()))?;

        let scheme = url.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(Error::UnsupportedScheme);
        }

        // `Url` already produced the punycode form of the host and
        // percent-encoded the path
        let host = url
            .host_str()
            .ok_or_else(|| Error::Uri("missing host".into()))?
            .to_string();
        let port = url
            .port()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        let path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };
        let query = url.query().map(str::to_string);

        Ok(Self {
            scheme,
            host,
            port,
            path,
            query,
        })
    }

    /// The destination cache key, `host:port`
    pub fn destination_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The origin-form request target for the request line
    pub fn request_target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// The Host / :authority header value
    pub fn authority(&self) -> String {
        let default_port = if self.scheme == "https" { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    #[inline]
    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    /// The host decoded back to its Unicode form
    pub fn human_friendly_host(&self) -> String {
        let (host, result) = idna::domain_to_unicode(&self.host);
        if result.is_err() {
            return self.host.clone();
        }
        host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_filled() {
        let uri = CanonicalUri::parse("example.com").unwrap();
        assert_eq!(uri.scheme, "http");
        assert_eq!(uri.port, 80);
        assert_eq!(uri.path, "/");
        assert_eq!(uri.destination_key(), "example.com:80");

        let uri = CanonicalUri::parse("https://example.com/a?b=c").unwrap();
        assert_eq!(uri.port, 443);
        assert_eq!(uri.request_target(), "/a?b=c");
        assert_eq!(uri.authority(), "example.com");

        let uri = CanonicalUri::parse("https://example.com:8443/").unwrap();
        assert_eq!(uri.authority(), "example.com:8443");
    }

    #[test]
    fn punycode_host_round_trip() {
        let uri = CanonicalUri::parse("http://Go言語.com/").unwrap();
        assert_eq!(uri.host.to_ascii_lowercase(), "xn--go-hh0g6u.com");
        assert_eq!(uri.human_friendly_host(), "go言語.com");
    }

    #[test]
    fn non_ascii_paths_are_percent_encoded() {
        let uri = CanonicalUri::parse("http://example.com/日本語").unwrap();
        assert!(uri.path.is_ascii());
        assert_eq!(uri.path, "/%E6%97%A5%E6%9C%AC%E8%AA%9E");
    }

    #[test]
    fn normalize_round_trips_display_form() {
        let wire = normalize("http://Go言語.com/日本語", NormalizeFlags::default()).unwrap();
        assert_eq!(
            wire.to_ascii_lowercase(),
            "http://xn--go-hh0g6u.com/%e6%97%a5%e6%9c%ac%e8%aa%9e"
        );
        let display = normalize(
            &wire,
            NormalizeFlags {
                human_friendly: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(display, "http://go言語.com/日本語");
    }

    #[test]
    fn unsupported_schemes_are_rejected() {
        assert_eq!(
            CanonicalUri::parse("ftp://example.com/"),
            Err(Error::UnsupportedScheme)
        );
        assert!(matches!(
            CanonicalUri::parse("http://"),
            Err(Error::Uri(_))
        ));
    }
}
