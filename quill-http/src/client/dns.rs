// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The DNS wait thread.
//!
//! Resolution runs on its own thread so the completion thread never
//! blocks on the resolver; results come back as deferred `connect`
//! callbacks.

use crate::client::{ResponseShared, Shared};
use crossbeam_channel::Receiver;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::{Arc, Weak},
};

pub(crate) struct DnsRequest {
    pub host: String,
    pub port: u16,
    /// Destination cache key the result routes back to
    pub key: String,
    pub response: Arc<ResponseShared>,
}

pub(crate) fn run(requests: Receiver<DnsRequest>, shared: Weak<Shared>) {
    for request in requests.iter() {
        let DnsRequest {
            host,
            port,
            key,
            response,
        } = request;

        let resolved: Result<Vec<SocketAddr>, String> = (host.as_str(), port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect())
            .map_err(|error| error.to_string());

        tracing::debug!(host = %host, ok = resolved.is_ok(), "dns resolution finished");

        let Some(shared) = shared.upgrade() else {
            return;
        };
        let _ = shared.post(Box::new(move |driver| {
            driver.on_resolved(&key, resolved, response);
        }));
    }
}
