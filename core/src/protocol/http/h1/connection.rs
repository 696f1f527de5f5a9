/*
 * connection.rs
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

//! HTTP/1.1 connection codec. Parses pipelined requests, routes them to
//! per-request application handlers, and serializes responses strictly in
//! request order. Handles Expect/Continue, keep-alive semantics, and the
//! two in-band upgrades: h2c and WebSocket. A secure connection whose
//! ALPN negotiated h2 swaps itself out before any HTTP/1.1 parsing.

use std::collections::VecDeque;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use log::{debug, trace};

use crate::protocol::handler::{ProtocolHandler, SecurityInfo};
use crate::protocol::http::h1::parser::{ParseError, ParseState, RequestEvents, RequestParser};
use crate::protocol::http::h2::H2Connection;
use crate::protocol::http::handler::{RequestHandler, ResponseState};
use crate::protocol::http::headers::Headers;
use crate::protocol::http::request::{Request, Version};
use crate::protocol::http::response::{http_date, reason_phrase, Response, SERVER_TOKEN};
use crate::protocol::websocket::{accept_value, WsConnection};
use crate::protocol::ServiceContext;
use crate::reactor::{Endpoint, TimerHandle};

/// Timer kinds.
const TIMER_HEADER: u64 = 1;
const TIMER_IDLE: u64 = 2;

/// Request being accumulated by the parser.
#[derive(Default)]
struct PendingRequest {
    method: String,
    target: String,
    version: Option<Version>,
    headers: Headers,
}

/// A dispatched request whose response is awaited (pipelining keeps
/// several).
struct InFlight {
    state: ResponseState,
    handler: Box<dyn RequestHandler>,
    head: bool,
    version: Version,
    close_after: bool,
}

/// Routes parser events into the pending request and the newest in-flight
/// request's application handler.
struct Driver<'a> {
    pending: &'a mut PendingRequest,
    inflight: &'a mut VecDeque<InFlight>,
}

impl RequestEvents for Driver<'_> {
    fn request_line(&mut self, method: &str, target: &str, major: u8, minor: u8) {
        self.pending.method = method.to_string();
        self.pending.target = target.to_string();
        self.pending.version = Some(if (major, minor) == (1, 0) {
            Version::Http10
        } else {
            Version::Http11
        });
    }

    fn header(&mut self, name: &str, value: &str) {
        self.pending.headers.add(name, value);
    }

    fn body_chunk(&mut self, data: &[u8]) {
        if let Some(current) = self.inflight.back_mut() {
            current.handler.request_body_content(&current.state, data);
        }
    }

    fn trailer(&mut self, _name: &str, _value: &str) {
        // Trailers are consumed for framing; values are not surfaced.
    }

    fn request_complete(&mut self) {
        if let Some(current) = self.inflight.back_mut() {
            current.handler.end_request_body(&current.state);
            current.handler.request_complete(&current.state);
        }
    }
}

/// ProtocolHandler for HTTP/1.1 connections; the initial handler on every
/// HTTP listener.
pub struct H1Connection {
    ctx: Arc<ServiceContext>,
    endpoint: Option<Endpoint>,
    parser: RequestParser,
    pending: PendingRequest,
    inflight: VecDeque<InFlight>,
    /// No further requests are read; connection closes once responses
    /// drain.
    close_after_current: bool,
    upgraded: bool,
    requests_seen: u64,
    header_timer: Option<TimerHandle>,
    idle_timer: Option<TimerHandle>,
}

impl H1Connection {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        let max_header_size = ctx.config.max_header_size;
        Self {
            ctx,
            endpoint: None,
            parser: RequestParser::new(max_header_size),
            pending: PendingRequest::default(),
            inflight: VecDeque::new(),
            close_after_current: false,
            upgraded: false,
            requests_seen: 0,
            header_timer: None,
            idle_timer: None,
        }
    }

    fn endpoint(&self) -> &Endpoint {
        self.endpoint.as_ref().expect("endpoint set in connected")
    }

    fn arm_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
        let idle = self.ctx.config.idle_timeout;
        self.idle_timer = Some(self.endpoint().schedule_timer(TIMER_IDLE, idle));
    }

    fn arm_header_timer(&mut self) {
        if self.header_timer.is_none() {
            let timeout = self.ctx.config.header_timeout;
            self.header_timer = Some(self.endpoint().schedule_timer(TIMER_HEADER, timeout));
        }
    }

    fn disarm_header_timer(&mut self) {
        if let Some(timer) = self.header_timer.take() {
            timer.cancel();
        }
    }

    /// Emit a direct error response and close. Used for parse failures and
    /// timeouts, outside the ordered response path.
    fn reject(&mut self, status: u16, message: &str) {
        debug!(
            "{}: rejecting with {}: {}",
            self.endpoint().peer_addr(),
            status,
            message
        );
        let body = format!("{} {}\r\n", status, reason_phrase(status));
        let mut out = BytesMut::with_capacity(256);
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).as_bytes());
        out.extend_from_slice(format!("Server: {}\r\n", SERVER_TOKEN).as_bytes());
        out.extend_from_slice(format!("Date: {}\r\n", http_date()).as_bytes());
        out.extend_from_slice(b"Content-Type: text/plain; charset=utf-8\r\n");
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        out.extend_from_slice(b"Connection: close\r\n\r\n");
        out.extend_from_slice(body.as_bytes());
        self.close_after_current = true;
        self.disarm_header_timer();
        let endpoint = self.endpoint().clone();
        endpoint.send(out.freeze());
        endpoint.close();
    }

    /// Decide body framing from the headers. Ok((content_length, chunked)).
    fn body_framing(headers: &Headers) -> Result<(Option<u64>, bool), ParseError> {
        let mut chunked = false;
        if headers.contains("transfer-encoding") {
            if headers.has_token("transfer-encoding", "chunked") {
                chunked = true;
            } else {
                return Err(ParseError {
                    status: 501,
                    message: "unsupported transfer coding",
                });
            }
        }
        let mut content_length = None;
        for value in headers.get_all("content-length") {
            let parsed: u64 = value.trim().parse().map_err(|_| ParseError {
                status: 400,
                message: "invalid Content-Length",
            })?;
            match content_length {
                None => content_length = Some(parsed),
                Some(existing) if existing == parsed => {}
                Some(_) => {
                    return Err(ParseError {
                        status: 400,
                        message: "conflicting Content-Length",
                    })
                }
            }
        }
        if chunked {
            // Transfer-Encoding overrides Content-Length.
            content_length = None;
        }
        Ok((content_length, chunked))
    }

    /// Runs with the parser paused in HeadersComplete. Returns false when
    /// parsing must stop (error or upgrade).
    fn dispatch(&mut self) -> bool {
        let pending = std::mem::take(&mut self.pending);
        self.disarm_header_timer();
        self.requests_seen += 1;

        let version = pending.version.unwrap_or(Version::Http11);
        let mut request = Request::new(pending.method, pending.target, version);
        request.headers = pending.headers;

        if version == Version::Http11 && request.host().is_none() {
            self.reject(400, "missing Host header");
            return false;
        }

        let (content_length, chunked) = match Self::body_framing(&request.headers) {
            Ok(framing) => framing,
            Err(e) => {
                self.reject(e.status, e.message);
                return false;
            }
        };
        if let Some(length) = content_length {
            if length > self.ctx.config.max_body_size {
                self.reject(413, "request body too large");
                return false;
            }
        }
        let has_body = chunked || content_length.map_or(false, |n| n > 0);

        if !has_body && self.try_upgrade(&request) {
            return false;
        }

        let close_after = match version {
            Version::Http10 => !request.headers.has_token("connection", "keep-alive"),
            _ => request.headers.has_token("connection", "close"),
        };
        if close_after {
            self.close_after_current = true;
        }

        let state = ResponseState::new(self.endpoint().clone());
        let mut handler = self.ctx.request_handlers.new_request_handler();
        let head = request.is_head();
        handler.headers(&state, &request);

        let expects_continue = version == Version::Http11
            && request
                .headers
                .get("expect")
                .map_or(false, |v| v.trim().eq_ignore_ascii_case("100-continue"));

        self.inflight.push_back(InFlight {
            state,
            handler,
            head,
            version,
            close_after,
        });

        // Interim 100 only when this request is alone on the wire, so it
        // cannot overtake an earlier response. Skipped when the handler
        // already produced a final response.
        if expects_continue && has_body && self.inflight.len() == 1 {
            let current = self.inflight.back().unwrap();
            if !current.state.is_complete() {
                self.endpoint()
                    .send(Bytes::from_static(b"HTTP/1.1 100 Continue\r\n\r\n"));
            }
        }

        self.parser.set_body_mode(content_length, chunked);

        let current = self.inflight.back_mut().unwrap();
        if has_body {
            current.handler.start_request_body(&current.state);
        } else {
            current.handler.request_complete(&current.state);
        }
        true
    }

    /// Upgrade paths checked at headers-complete on bodyless requests.
    /// Returns true when the connection's handler was swapped.
    fn try_upgrade(&mut self, request: &Request) -> bool {
        if !request.headers.has_token("connection", "upgrade") {
            return false;
        }
        if self.ctx.config.h2c_upgrade_enabled
            && request.headers.has_token("upgrade", "h2c")
            && self.inflight.is_empty()
        {
            if let Some(value) = request.headers.get("http2-settings") {
                match URL_SAFE_NO_PAD.decode(value.trim()) {
                    Ok(payload) if payload.len() % 6 == 0 => {
                        trace!("{}: h2c upgrade", self.endpoint().peer_addr());
                        let settings = parse_settings_payload(&payload);
                        self.endpoint().send(Bytes::from_static(
                            b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: h2c\r\n\r\n",
                        ));
                        let next = H2Connection::for_upgrade(
                            self.ctx.clone(),
                            settings,
                            request.clone(),
                        );
                        self.endpoint().upgrade(Box::new(next));
                        self.upgraded = true;
                        return true;
                    }
                    _ => {
                        self.reject(400, "invalid HTTP2-Settings");
                        return true;
                    }
                }
            }
            return false;
        }
        if self.ctx.config.websocket_enabled
            && request.headers.has_token("upgrade", "websocket")
            && request.method == "GET"
            && request.version == Version::Http11
        {
            let Some(factory) = self.ctx.websocket_handlers.clone() else {
                return false;
            };
            let version_ok = request
                .headers
                .get("sec-websocket-version")
                .map_or(false, |v| v.trim() == "13");
            let key = request.headers.get("sec-websocket-key").map(str::trim);
            let key_ok = key.map_or(false, |k| {
                base64::engine::general_purpose::STANDARD
                    .decode(k)
                    .map_or(false, |raw| raw.len() == 16)
            });
            if !version_ok || !key_ok {
                self.reject(400, "malformed WebSocket upgrade");
                return true;
            }
            let accept = accept_value(key.unwrap().as_bytes());
            trace!("{}: websocket upgrade", self.endpoint().peer_addr());
            let mut out = BytesMut::with_capacity(192);
            out.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
            out.extend_from_slice(b"Upgrade: websocket\r\nConnection: Upgrade\r\n");
            out.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", accept).as_bytes());
            out.extend_from_slice(format!("Server: {}\r\n\r\n", SERVER_TOKEN).as_bytes());
            self.endpoint().send(out.freeze());
            let handler = factory.new_websocket_handler();
            self.endpoint()
                .upgrade(Box::new(WsConnection::new(handler)));
            self.upgraded = true;
            return true;
        }
        false
    }

    /// Serialize one buffered response.
    fn serialize(in_flight: InFlight, closing: bool) -> Bytes {
        let (mut response, body) = match in_flight.state.take_output() {
            Some(output) => output,
            None => {
                debug!("handler completed without a response; answering 500");
                (
                    Response::new(500).header("Content-Type", "text/plain; charset=utf-8"),
                    Bytes::from_static(b"Internal Server Error\r\n"),
                )
            }
        };

        // The codec owns framing and connection headers.
        for name in ["content-length", "transfer-encoding", "connection", "keep-alive", "upgrade"] {
            response.headers.remove(name);
        }

        let mut out = BytesMut::with_capacity(256 + body.len());
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", response.status, response.reason()).as_bytes(),
        );
        if !response.headers.contains("server") {
            out.extend_from_slice(format!("Server: {}\r\n", SERVER_TOKEN).as_bytes());
        }
        if !response.headers.contains("date") {
            out.extend_from_slice(format!("Date: {}\r\n", http_date()).as_bytes());
        }
        for (name, value) in response.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        let bodyless = response.bodyless();
        if !bodyless {
            out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        if closing {
            out.extend_from_slice(b"Connection: close\r\n");
        } else if in_flight.version == Version::Http10 {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
        }
        out.extend_from_slice(b"\r\n");
        if !bodyless && !in_flight.head {
            out.extend_from_slice(&body);
        }
        out.freeze()
    }
}

impl ProtocolHandler for H1Connection {
    fn connected(&mut self, endpoint: &Endpoint) {
        self.endpoint = Some(endpoint.clone());
        self.arm_idle_timer();
    }

    fn security_established(&mut self, info: &SecurityInfo) {
        if self.ctx.config.http2_enabled && info.alpn.as_deref() == Some("h2") {
            trace!("{}: ALPN selected h2", self.endpoint().peer_addr());
            let next = H2Connection::new(self.ctx.clone());
            self.endpoint().upgrade(Box::new(next));
            self.upgraded = true;
        }
    }

    fn receive(&mut self, buf: &mut BytesMut) {
        if self.upgraded {
            return;
        }
        if self.close_after_current && self.parser.state() == ParseState::RequestLine {
            // Pipelined bytes after Connection: close are discarded.
            buf.clear();
            return;
        }
        self.arm_idle_timer();
        if self.parser.state() == ParseState::RequestLine && !buf.is_empty() {
            self.arm_header_timer();
        }
        loop {
            let mut driver = Driver {
                pending: &mut self.pending,
                inflight: &mut self.inflight,
            };
            if let Err(e) = self.parser.receive(buf, &mut driver) {
                self.reject(e.status, e.message);
                buf.clear();
                return;
            }
            match self.parser.state() {
                ParseState::HeadersComplete => {
                    if !self.dispatch() {
                        if self.upgraded {
                            return;
                        }
                        buf.clear();
                        return;
                    }
                }
                ParseState::Idle => {
                    if self.close_after_current {
                        buf.clear();
                        return;
                    }
                    self.parser.reset();
                    if buf.is_empty() {
                        return;
                    }
                    self.arm_header_timer();
                }
                _ => return,
            }
        }
    }

    fn send_ready(&mut self) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        while let Some(front) = self.inflight.front() {
            if front.state.is_cancelled() {
                self.inflight.pop_front();
                continue;
            }
            if !front.state.is_complete() {
                break;
            }
            let in_flight = self.inflight.pop_front().unwrap();
            let response_close = in_flight.close_after
                || (self.close_after_current && self.inflight.is_empty());
            let bytes = Self::serialize(in_flight, response_close);
            endpoint.send(bytes);
            if response_close {
                endpoint.close();
                break;
            }
        }
    }

    fn timer_expired(&mut self, kind: u64) {
        match kind {
            TIMER_HEADER => {
                if matches!(
                    self.parser.state(),
                    ParseState::RequestLine | ParseState::Headers
                ) {
                    self.reject(408, "header parse timeout");
                }
            }
            TIMER_IDLE => {
                if self.inflight.is_empty() && self.parser.state() == ParseState::RequestLine {
                    if self.requests_seen == 0 {
                        self.reject(408, "idle timeout");
                    } else {
                        trace!("{}: keep-alive idle timeout", self.endpoint().peer_addr());
                        self.endpoint().close();
                    }
                } else {
                    self.arm_idle_timer();
                }
            }
            _ => {}
        }
    }

    fn disconnected(&mut self) {
        self.disarm_header_timer();
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
        for in_flight in &self.inflight {
            in_flight.state.cancel();
        }
        self.inflight.clear();
    }
}

fn parse_settings_payload(payload: &[u8]) -> Vec<(u16, u32)> {
    payload
        .chunks_exact(6)
        .map(|chunk| {
            (
                u16::from_be_bytes([chunk[0], chunk[1]]),
                u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]),
            )
        })
        .collect()
}
