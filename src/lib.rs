//! cloudterm-gateway - a non-blocking HTTP/WebSocket gateway that exposes a
//! backend terminal service to browser clients over a single TCP listener.
//!
//! The HTTP stack (request parsing, response building, the connection loop,
//! and the per-resource limits in [`limits`]) is a single-threaded,
//! zero-allocation-after-startup engine driven by tokio's reactor: a
//! pre-spawned, fixed-size pool of workers pulls accepted connections off a
//! lock-free queue and runs each to completion before returning for the
//! next one. On top of that engine this crate builds the gateway-specific
//! pieces:
//!
//! - [`pool`], [`hashtable`], [`rbtree`] and [`ringbuf`] - the generic
//!   data structures the rest of the crate is built from: a generation-
//!   tagged object arena, an open-chained hash index, a handle-based
//!   red-black tree, and a single-producer/single-consumer byte ring.
//! - [`session`] - session lifecycle management (creation, lookup,
//!   expiry) built on top of those three structures.
//! - [`ws`] - WebSocket handshake key derivation and RFC 6455 frame
//!   codec.
//! - [`auth`] - bcrypt hash parsing and password verification behind a
//!   pluggable [`auth::PasswordVerifier`] trait.
//! - [`proxy`] - the backend connection and bidirectional byte-forwarding
//!   engine that a WebSocket-upgraded client connection is handed off to.
//! - [`gateway`] - the [`Handler`] implementation that ties the above
//!   together into the actual routing table (static files, the JSON API,
//!   and the terminal WebSocket proxy).
//! - [`config`] - command-line configuration.
//! - [`staticfile`] - the in-memory static asset cache served for
//!   non-API, non-upgrade requests.
//!
//! # Protocol support
//!
//! - **HTTP/1.1**: persistent connections, chunked request bodies are not
//!   accepted (the gateway's API bodies are small and JSON-only).
//! - **HTTP/1.0**: basic support for clients that still send it.
//! - **WebSocket** (RFC 6455): upgrade handshake plus full-duplex framing
//!   for both the terminal proxy and a loopback echo endpoint used for
//!   connectivity checks.
pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub mod auth;
pub mod config;
pub mod gateway;
pub mod hashtable;
pub mod pool;
pub mod proxy;
pub mod rbtree;
pub mod ringbuf;
pub mod session;
pub mod staticfile;
pub mod ws;

pub use crate::{
    errors::GatewayError,
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    server::{
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{Handler, Server, ServerBuilder},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use cloudterm_gateway::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
