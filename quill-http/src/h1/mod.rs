// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP/1.1 request writing and resumable response parsing.

pub mod request;
pub mod response;

pub use request::RequestEncoder;
pub use response::{BodyKind, ResponseParser};

/// Rewrites a field name in canonical `Title-Case` form for HTTP/1.1
/// egress (HTTP/2 egress lowercases instead)
pub fn canonical_field_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut upper_next = true;
    for ch in name.chars() {
        if ch == '-' {
            canonical.push('-');
            upper_next = true;
        } else if upper_next {
            canonical.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            canonical.extend(ch.to_lowercase());
        }
    }
    canonical
}

/// True when a response carries no body regardless of framing headers
pub fn is_no_body_status(status: u16, head_request: bool) -> bool {
    head_request || (100..200).contains(&status) || status == 204 || status == 304
}

/// Field names are case-insensitive
pub fn name_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
