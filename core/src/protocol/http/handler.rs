/*
 * handler.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gumdrop, a multi-protocol internet server.
 *
 * Gumdrop is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gumdrop is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gumdrop.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Request handler contract: the surface application components (the
//! file/WebDAV handler foremost) plug into. Identical over HTTP/1.1 and
//! HTTP/2; the codec behind it differs.
//!
//! Request callbacks arrive in order on the connection's worker. Response
//! operations on the ResponseState may be called from any thread, during
//! or after any request callback; output is buffered until `complete` and
//! then emitted in request order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use super::request::Request;
use super::response::Response;
use crate::reactor::Endpoint;

/// Application-side request processing. One instance per request, created
/// through a RequestHandlerFactory.
pub trait RequestHandler: Send {
    /// Request line and headers are in. Abbreviated handlers may respond
    /// right here.
    fn headers(&mut self, state: &ResponseState, request: &Request);

    /// Framing indicates a body follows.
    fn start_request_body(&mut self, _state: &ResponseState) {}

    /// A chunk of request body. May be called with an empty slice.
    fn request_body_content(&mut self, _state: &ResponseState, _data: &[u8]) {}

    /// Body complete, including chunked trailers.
    fn end_request_body(&mut self, _state: &ResponseState) {}

    /// The request is fully received. Default responders finalize here.
    fn request_complete(&mut self, state: &ResponseState);
}

/// Creates one RequestHandler per request. Shared across connections and
/// workers.
pub trait RequestHandlerFactory: Send + Sync {
    fn new_request_handler(&self) -> Box<dyn RequestHandler>;
}

impl<F> RequestHandlerFactory for F
where
    F: Fn() -> Box<dyn RequestHandler> + Send + Sync,
{
    fn new_request_handler(&self) -> Box<dyn RequestHandler> {
        self()
    }
}

struct Output {
    response: Option<Response>,
    body: BytesMut,
    body_started: bool,
    body_ended: bool,
}

struct Shared {
    endpoint: Endpoint,
    output: Mutex<Output>,
    completed: AtomicBool,
    cancelled: AtomicBool,
}

/// Per-request capability for producing the response. Cheap to clone;
/// thread-safe. Output is buffered here until `complete`, at which point
/// the owning codec serializes it in request order.
#[derive(Clone)]
pub struct ResponseState {
    shared: Arc<Shared>,
}

impl ResponseState {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self {
            shared: Arc::new(Shared {
                endpoint,
                output: Mutex::new(Output {
                    response: None,
                    body: BytesMut::new(),
                    body_started: false,
                    body_ended: false,
                }),
                completed: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Set status and headers. Must come before any body content.
    pub fn headers(&self, response: Response) {
        let mut output = self.shared.output.lock().unwrap();
        output.response = Some(response);
    }

    pub fn start_response_body(&self) {
        let mut output = self.shared.output.lock().unwrap();
        output.body_started = true;
    }

    /// Append body bytes. Ignored after cancellation.
    pub fn response_body_content(&self, data: &[u8]) {
        if self.is_cancelled() {
            return;
        }
        let mut output = self.shared.output.lock().unwrap();
        output.body_started = true;
        output.body.extend_from_slice(data);
    }

    pub fn end_response_body(&self) {
        let mut output = self.shared.output.lock().unwrap();
        output.body_ended = true;
    }

    /// The response is fully buffered; the codec may flush it. Safe from
    /// any thread.
    pub fn complete(&self) {
        if !self.shared.completed.swap(true, Ordering::AcqRel) {
            self.shared.endpoint.notify_send_ready();
        }
    }

    /// True once the request was cancelled (connection closed, stream
    /// reset). Handlers should stop producing output.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Codec side: take the buffered response once complete. None when the
    /// handler completed without setting headers (mapped to 500).
    pub(crate) fn take_output(&self) -> Option<(Response, Bytes)> {
        let mut output = self.shared.output.lock().unwrap();
        let response = output.response.take()?;
        let body = output.body.split().freeze();
        Some((response, body))
    }
}

/// Built-in fallback responder: 404 for recognized methods, 501 for the
/// rest. Stands in until an application handler (the file/WebDAV
/// component) is plugged in, and keeps the core testable end to end.
pub struct NotFoundHandler {
    status: u16,
}

impl Default for NotFoundHandler {
    fn default() -> Self {
        Self { status: 404 }
    }
}

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PROPFIND", "PROPPATCH", "MKCOL", "COPY",
    "MOVE", "LOCK", "UNLOCK",
];

impl RequestHandler for NotFoundHandler {
    fn headers(&mut self, _state: &ResponseState, request: &Request) {
        if !KNOWN_METHODS.contains(&request.method.as_str()) {
            self.status = 501;
        }
    }

    fn request_complete(&mut self, state: &ResponseState) {
        let body = match self.status {
            501 => &b"Not Implemented\r\n"[..],
            _ => &b"Not Found\r\n"[..],
        };
        state.headers(
            Response::new(self.status)
                .header("Content-Type", "text/plain; charset=utf-8"),
        );
        state.start_response_body();
        state.response_body_content(body);
        state.end_response_body();
        state.complete();
    }
}

/// Factory for the fallback responder.
pub struct NotFoundFactory;

impl RequestHandlerFactory for NotFoundFactory {
    fn new_request_handler(&self) -> Box<dyn RequestHandler> {
        Box::new(NotFoundHandler::default())
    }
}
