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

//! HTTP/2 server connection: client preface validation, SETTINGS
//! exchange, the stream state machine, flow-controlled DATA in both
//! directions, HEADERS/CONTINUATION assembly through HPACK, and the
//! response path into the shared RequestHandler contract.
//!
//! Streams live in a table keyed by id; a stream holds only its own
//! state, so nothing here is shared between streams except the
//! connection-level windows and the HPACK tables, which belong to the
//! connection. Scheduling among ready streams is FIFO by id; PRIORITY is
//! parsed and recorded but does not build a dependency tree.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};

use super::frame::*;
use super::handler::FrameHandler;
use super::parser::FrameParser;
use super::writer::FrameWriter;
use super::CONNECTION_PREFACE;
use crate::protocol::handler::ProtocolHandler;
use crate::protocol::http::handler::{RequestHandler, ResponseState};
use crate::protocol::http::hpack;
use crate::protocol::http::request::{Request, Version};
use crate::protocol::http::response::{http_date, Response, SERVER_TOKEN};
use crate::protocol::ServiceContext;
use crate::reactor::{Endpoint, TimerHandle};

const TIMER_SETTINGS: u64 = 11;
const TIMER_IDLE: u64 = 12;
const TIMER_PING: u64 = 13;

/// Hard cap on an assembled header block (HEADERS + CONTINUATIONs).
const MAX_HEADER_BLOCK: usize = 1024 * 1024;

/// SETTINGS as tracked for each direction.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: false,
            max_concurrent_streams: 100,
            initial_window_size: DEFAULT_WINDOW_SIZE as u32,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as u32,
            max_header_list_size: 8192,
        }
    }
}

/// Stream states (RFC 7540 §5.1). The reserved states belong to server
/// push, which stays off unless the peer enables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// The peer's END_STREAM arrived.
    pub fn recv_end_stream(self) -> StreamState {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        }
    }

    /// We sent END_STREAM.
    pub fn send_end_stream(self) -> StreamState {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            StreamState::ReservedLocal => StreamState::HalfClosedRemote,
            other => other,
        }
    }

    /// May the peer still send DATA or trailers on this stream?
    pub fn peer_may_send(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }
}

struct Stream {
    state: StreamState,
    send_window: i32,
    recv_window: i32,
    handler: Option<Box<dyn RequestHandler>>,
    response: Option<ResponseState>,
    /// Response head was encoded and queued.
    headers_sent: bool,
    /// Response body bytes not yet covered by the send windows.
    pending_body: Bytes,
    /// END_STREAM still owed after pending_body drains.
    end_pending: bool,
    head: bool,
}

impl Stream {
    fn new(state: StreamState, send_window: i32, recv_window: i32) -> Self {
        Self {
            state,
            send_window,
            recv_window,
            handler: None,
            response: None,
            headers_sent: false,
            pending_body: Bytes::new(),
            end_pending: false,
            head: false,
        }
    }
}

/// Header block being assembled across HEADERS/CONTINUATION.
struct Assembly {
    stream_id: u32,
    end_stream: bool,
    trailers: bool,
    /// Decode for HPACK state, then refuse the stream with this code.
    refuse: Option<u32>,
    block: BytesMut,
}

/// ProtocolHandler for HTTP/2 connections, entered via ALPN or h2c
/// upgrade.
pub struct H2Connection {
    parser: FrameParser,
    preface_done: bool,
    inner: Inner,
}

struct Inner {
    ctx: Arc<ServiceContext>,
    endpoint: Option<Endpoint>,
    writer: FrameWriter,
    decoder: hpack::Decoder,
    encoder: hpack::Encoder,
    local: Settings,
    peer: Settings,
    /// The first frame after the preface must be the client SETTINGS.
    awaiting_first_settings: bool,
    settings_acked: bool,
    conn_send_window: i32,
    conn_recv_window: i32,
    streams: HashMap<u32, Stream>,
    highest_peer_stream: u32,
    assembly: Option<Assembly>,
    goaway_sent: bool,
    goaway_received: bool,
    failed: bool,
    /// Request carried over by an h2c upgrade, to answer on stream 1.
    upgraded_request: Option<Request>,
    settings_timer: Option<TimerHandle>,
    idle_timer: Option<TimerHandle>,
    ping_counter: u64,
}

impl H2Connection {
    /// Connection entered through TLS ALPN or prior knowledge.
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self::build(ctx, Vec::new(), None)
    }

    /// Connection entered through an h2c upgrade: the decoded
    /// HTTP2-Settings are the peer's initial settings and the upgrading
    /// request is answered on stream 1.
    pub fn for_upgrade(
        ctx: Arc<ServiceContext>,
        peer_settings: Vec<(u16, u32)>,
        request: Request,
    ) -> Self {
        Self::build(ctx, peer_settings, Some(request))
    }

    fn build(
        ctx: Arc<ServiceContext>,
        peer_settings: Vec<(u16, u32)>,
        upgraded_request: Option<Request>,
    ) -> Self {
        let local = Settings::default();
        let peer = Settings::default();
        let mut inner = Inner {
            ctx,
            endpoint: None,
            writer: FrameWriter::new(),
            decoder: hpack::Decoder::new(local.header_table_size as usize),
            encoder: hpack::Encoder::new(peer.header_table_size as usize),
            local,
            peer,
            awaiting_first_settings: true,
            settings_acked: false,
            conn_send_window: DEFAULT_WINDOW_SIZE,
            conn_recv_window: DEFAULT_WINDOW_SIZE,
            streams: HashMap::new(),
            highest_peer_stream: 0,
            assembly: None,
            goaway_sent: false,
            goaway_received: false,
            failed: false,
            upgraded_request,
            settings_timer: None,
            idle_timer: None,
            ping_counter: 0,
        };
        // h2c: settings from the HTTP2-Settings header apply before any
        // frame arrives.
        inner.apply_peer_settings(&peer_settings);
        Self {
            parser: FrameParser::new(),
            preface_done: false,
            inner,
        }
    }
}

impl ProtocolHandler for H2Connection {
    fn connected(&mut self, endpoint: &Endpoint) {
        self.inner.connected(endpoint);
    }

    fn receive(&mut self, buf: &mut BytesMut) {
        if self.inner.failed {
            buf.clear();
            return;
        }
        self.inner.arm_idle_timer();
        if !self.preface_done {
            if buf.len() < CONNECTION_PREFACE.len() {
                return;
            }
            if &buf[..CONNECTION_PREFACE.len()] != CONNECTION_PREFACE {
                debug!("invalid HTTP/2 connection preface");
                self.inner
                    .connection_error(ERROR_PROTOCOL_ERROR, "invalid connection preface");
                buf.clear();
                return;
            }
            let _ = buf.split_to(CONNECTION_PREFACE.len());
            self.preface_done = true;
        }
        let _ = self.parser.receive(buf, &mut self.inner);
        if self.inner.failed {
            buf.clear();
        }
        self.inner.pump_responses();
        self.inner.after_work();
    }

    fn send_ready(&mut self) {
        self.inner.pump_responses();
        self.inner.after_work();
    }

    fn timer_expired(&mut self, kind: u64) {
        self.inner.timer_expired(kind);
        self.inner.after_work();
    }

    fn disconnected(&mut self) {
        self.inner.cancel_all_streams();
        if let Some(timer) = self.inner.settings_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.inner.idle_timer.take() {
            timer.cancel();
        }
    }
}

impl Inner {
    fn endpoint(&self) -> &Endpoint {
        self.endpoint.as_ref().expect("endpoint set in connected")
    }

    fn connected(&mut self, endpoint: &Endpoint) {
        self.endpoint = Some(endpoint.clone());

        if self.failed {
            // Failed while applying h2c upgrade settings; the GOAWAY is
            // already buffered.
            self.flush();
            endpoint.close();
            return;
        }

        // Server preface: our SETTINGS, before anything else.
        let local = self.local;
        self.writer.settings(&[
            (SETTINGS_HEADER_TABLE_SIZE, local.header_table_size),
            (SETTINGS_ENABLE_PUSH, 0),
            (SETTINGS_MAX_CONCURRENT_STREAMS, local.max_concurrent_streams),
            (SETTINGS_INITIAL_WINDOW_SIZE, local.initial_window_size),
            (SETTINGS_MAX_FRAME_SIZE, local.max_frame_size),
            (SETTINGS_MAX_HEADER_LIST_SIZE, local.max_header_list_size),
        ]);
        self.flush();

        let settings_timeout = self.ctx.config.header_timeout;
        self.settings_timer = Some(endpoint.schedule_timer(TIMER_SETTINGS, settings_timeout));
        if let Some(interval) = self.ctx.config.http2_ping_interval {
            endpoint.schedule_timer(TIMER_PING, interval);
        }
        self.arm_idle_timer();

        // The h2c-upgrading request is already complete on stream 1,
        // half-closed (remote).
        if let Some(request) = self.upgraded_request.take() {
            let send_window = self.peer.initial_window_size as i32;
            let recv_window = self.local.initial_window_size as i32;
            let stream = Stream::new(StreamState::HalfClosedRemote, send_window, recv_window);
            self.streams.insert(1, stream);
            self.highest_peer_stream = 1;
            self.dispatch_request(1, request, true);
        }
    }

    fn arm_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
        let idle = self.ctx.config.idle_timeout;
        self.idle_timer = Some(self.endpoint().schedule_timer(TIMER_IDLE, idle));
    }

    fn timer_expired(&mut self, kind: u64) {
        match kind {
            TIMER_SETTINGS => {
                if self.awaiting_first_settings || !self.settings_acked {
                    self.connection_error(ERROR_SETTINGS_TIMEOUT, "SETTINGS exchange timed out");
                }
            }
            TIMER_IDLE => {
                if self.streams.is_empty() && !self.failed {
                    trace!("h2 idle timeout, going away");
                    if !self.goaway_sent {
                        self.goaway_sent = true;
                        self.writer
                            .goaway(self.highest_peer_stream, ERROR_NO_ERROR, b"");
                        self.flush();
                    }
                    self.endpoint().close();
                } else {
                    self.arm_idle_timer();
                }
            }
            TIMER_PING => {
                if !self.failed {
                    self.ping_counter += 1;
                    self.writer.ping(self.ping_counter, false);
                    self.flush();
                    if let Some(interval) = self.ctx.config.http2_ping_interval {
                        self.endpoint().schedule_timer(TIMER_PING, interval);
                    }
                }
            }
            _ => {}
        }
    }

    fn flush(&mut self) {
        if !self.writer.is_empty() {
            if let Some(endpoint) = &self.endpoint {
                let bytes = self.writer.take_buffer();
                endpoint.send(bytes);
            }
        }
    }

    /// End-of-callback bookkeeping: flush frames, close when drained.
    fn after_work(&mut self) {
        self.flush();
        if (self.goaway_received || self.goaway_sent) && self.streams.is_empty() {
            self.endpoint().close();
        }
    }

    fn connection_error(&mut self, code: u32, message: &str) {
        if self.failed {
            return;
        }
        warn!("h2 connection error {}: {}", error_to_string(code), message);
        self.failed = true;
        if !self.goaway_sent {
            self.goaway_sent = true;
            self.writer
                .goaway(self.highest_peer_stream, code, message.as_bytes());
        }
        self.cancel_all_streams();
        // Before `connected` (h2c settings applied at build time) there is
        // nowhere to send yet; the GOAWAY stays in the writer until then.
        if let Some(endpoint) = self.endpoint.clone() {
            self.flush();
            endpoint.close();
        }
    }

    fn stream_error(&mut self, stream_id: u32, code: u32) {
        debug!("h2 stream {} error {}", stream_id, error_to_string(code));
        self.writer.rst_stream(stream_id, code);
        if let Some(stream) = self.streams.remove(&stream_id) {
            if let Some(state) = stream.response {
                state.cancel();
            }
        }
    }

    fn cancel_all_streams(&mut self) {
        for (_, stream) in self.streams.drain() {
            if let Some(state) = stream.response {
                state.cancel();
            }
        }
    }

    /// Frames other than CONTINUATION are forbidden while a header block
    /// is being assembled.
    fn check_not_assembling(&mut self) -> bool {
        if self.assembly.is_some() {
            self.connection_error(
                ERROR_PROTOCOL_ERROR,
                "frame interleaved in header block assembly",
            );
            return false;
        }
        true
    }

    /// The first frame after the client preface must be SETTINGS.
    fn check_first_settings_done(&mut self) -> bool {
        if self.awaiting_first_settings {
            self.connection_error(ERROR_PROTOCOL_ERROR, "first frame was not SETTINGS");
            return false;
        }
        true
    }

    fn apply_peer_settings(&mut self, settings: &[(u16, u32)]) {
        for &(id, value) in settings {
            match id {
                SETTINGS_HEADER_TABLE_SIZE => {
                    self.peer.header_table_size = value;
                    let limit = (value as usize).min(hpack::DEFAULT_TABLE_SIZE);
                    self.encoder.set_max_table_size(limit);
                }
                SETTINGS_ENABLE_PUSH => {
                    if value > 1 {
                        self.connection_error(ERROR_PROTOCOL_ERROR, "ENABLE_PUSH not boolean");
                        return;
                    }
                    self.peer.enable_push = value == 1;
                }
                SETTINGS_MAX_CONCURRENT_STREAMS => {
                    self.peer.max_concurrent_streams = value;
                }
                SETTINGS_INITIAL_WINDOW_SIZE => {
                    if value > MAX_WINDOW_SIZE as u32 {
                        self.connection_error(
                            ERROR_FLOW_CONTROL_ERROR,
                            "INITIAL_WINDOW_SIZE exceeds 2^31-1",
                        );
                        return;
                    }
                    // Retroactive delta on every open stream's send window.
                    let delta = value as i64 - self.peer.initial_window_size as i64;
                    let mut overflow = false;
                    for stream in self.streams.values_mut() {
                        let adjusted = stream.send_window as i64 + delta;
                        if adjusted > MAX_WINDOW_SIZE {
                            overflow = true;
                            break;
                        }
                        stream.send_window = adjusted as i32;
                    }
                    if overflow {
                        self.connection_error(
                            ERROR_FLOW_CONTROL_ERROR,
                            "stream window overflow on INITIAL_WINDOW_SIZE change",
                        );
                        return;
                    }
                    self.peer.initial_window_size = value;
                }
                SETTINGS_MAX_FRAME_SIZE => {
                    if !(MIN_MAX_FRAME_SIZE as u32..=MAX_MAX_FRAME_SIZE as u32).contains(&value) {
                        self.connection_error(ERROR_PROTOCOL_ERROR, "MAX_FRAME_SIZE out of range");
                        return;
                    }
                    self.writer.set_max_frame_size(value as usize);
                }
                SETTINGS_MAX_HEADER_LIST_SIZE => {
                    self.peer.max_header_list_size = value;
                }
                _ => {} // unknown settings are ignored
            }
        }
    }

    /// Decode, validate and dispatch a completed header block.
    fn finish_assembly(&mut self) {
        let assembly = match self.assembly.take() {
            Some(assembly) => assembly,
            None => return,
        };

        struct Collect(Vec<(String, String)>);
        impl hpack::HeaderHandler for Collect {
            fn header(&mut self, name: &str, value: &str) {
                self.0.push((name.to_string(), value.to_string()));
            }
        }
        let mut collect = Collect(Vec::new());
        let mut cursor = &assembly.block[..];
        if self.decoder.decode(&mut cursor, &mut collect).is_err() {
            self.connection_error(ERROR_COMPRESSION_ERROR, "header block failed to decode");
            return;
        }
        let fields = collect.0;

        if let Some(code) = assembly.refuse {
            self.stream_error(assembly.stream_id, code);
            return;
        }

        if assembly.trailers {
            // Trailers end the request; field values are not surfaced.
            self.finish_request_recv_side(assembly.stream_id);
            return;
        }

        let list_size: usize = fields.iter().map(|(n, v)| n.len() + v.len() + 32).sum();
        if list_size > self.local.max_header_list_size as usize {
            self.respond_without_handler(
                assembly.stream_id,
                assembly.end_stream,
                Response::new(431),
            );
            return;
        }

        let request = match build_request(&fields) {
            Some(request) => request,
            None => {
                self.stream_error(assembly.stream_id, ERROR_PROTOCOL_ERROR);
                return;
            }
        };

        let send_window = self.peer.initial_window_size as i32;
        let recv_window = self.local.initial_window_size as i32;
        let state = if assembly.end_stream {
            StreamState::HalfClosedRemote
        } else {
            StreamState::Open
        };
        self.streams
            .insert(assembly.stream_id, Stream::new(state, send_window, recv_window));
        self.dispatch_request(assembly.stream_id, request, assembly.end_stream);
    }

    fn dispatch_request(&mut self, stream_id: u32, request: Request, complete: bool) {
        let state = ResponseState::new(self.endpoint().clone());
        let mut handler = self.ctx.request_handlers.new_request_handler();
        let head = request.is_head();
        handler.headers(&state, &request);
        if complete {
            handler.request_complete(&state);
        } else {
            handler.start_request_body(&state);
        }
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.handler = Some(handler);
            stream.response = Some(state);
            stream.head = head;
        }
    }

    /// A stream answered by the codec itself (431 and friends): encode a
    /// response head with no application handler involved.
    fn respond_without_handler(&mut self, stream_id: u32, peer_done: bool, response: Response) {
        let send_window = self.peer.initial_window_size as i32;
        let recv_window = self.local.initial_window_size as i32;
        let state = if peer_done {
            StreamState::HalfClosedRemote
        } else {
            StreamState::Open
        };
        let mut stream = Stream::new(state, send_window, recv_window);
        let response_state = ResponseState::new(self.endpoint().clone());
        response_state.headers(response);
        response_state.complete();
        stream.response = Some(response_state);
        self.streams.insert(stream_id, stream);
    }

    /// END_STREAM arrived (DATA, HEADERS, or trailers): run the tail of
    /// the request callbacks and settle the stream state.
    fn finish_request_recv_side(&mut self, stream_id: u32) {
        let closed = match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                if let (Some(handler), Some(state)) =
                    (stream.handler.as_mut(), stream.response.as_ref())
                {
                    handler.end_request_body(state);
                    handler.request_complete(state);
                }
                stream.state = stream.state.recv_end_stream();
                stream.state == StreamState::Closed
            }
            None => return,
        };
        if closed {
            self.streams.remove(&stream_id);
        }
    }

    /// Serialize ready responses, bounded by flow control windows, the
    /// peer's frame size, and the outbound high-water mark. FIFO by
    /// stream id.
    fn pump_responses(&mut self) {
        if self.failed {
            return;
        }
        let mut ids: Vec<u32> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if self.endpoint().send_blocked() {
                break;
            }
            self.pump_stream(id);
        }
    }

    fn pump_stream(&mut self, id: u32) {
        let endpoint = self.endpoint().clone();
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };

        if !stream.headers_sent {
            let Some(state) = stream.response.as_ref() else {
                return;
            };
            if state.is_cancelled() {
                return;
            }
            if !state.is_complete() {
                return;
            }
            let (response, body) = match state.take_output() {
                Some(output) => output,
                None => {
                    debug!("stream {}: handler completed without a response", id);
                    (Response::new(500), Bytes::new())
                }
            };
            let fields = response_fields(&response, body.len(), stream.head);
            let mut block = BytesMut::new();
            self.encoder.encode_block(&fields, &mut block);
            let body = if stream.head || response.bodyless() {
                Bytes::new()
            } else {
                body
            };
            let end_stream = body.is_empty();
            self.writer.headers(id, &block, end_stream);
            stream.headers_sent = true;
            stream.pending_body = body;
            stream.end_pending = !end_stream;
            if end_stream {
                stream.state = stream.state.send_end_stream();
            }
        }

        // DATA limited by both windows and the peer's frame size.
        while stream.end_pending {
            let remaining = stream.pending_body.len();
            let window = stream.send_window.min(self.conn_send_window).max(0) as usize;
            let frame_limit = self.writer.max_frame_size();
            let take = remaining.min(window).min(frame_limit);
            if remaining > 0 && take == 0 {
                return; // window exhausted; WINDOW_UPDATE resumes us
            }
            let chunk = stream.pending_body.split_to(take);
            let last = stream.pending_body.is_empty();
            self.writer.data(id, &chunk, last);
            stream.send_window -= take as i32;
            self.conn_send_window -= take as i32;
            if last {
                stream.end_pending = false;
                stream.state = stream.state.send_end_stream();
            }
            if endpoint.send_blocked() {
                break;
            }
        }

        let done = stream.state == StreamState::Closed && !stream.end_pending;
        if done {
            self.streams.remove(&id);
        }
    }
}

/// Turn decoded pseudo-headers and fields into a Request. None means the
/// request is malformed (RFC 7540 §8.1.2).
fn build_request(fields: &[(String, String)]) -> Option<Request> {
    let mut method = None;
    let mut path = None;
    let mut scheme = None;
    let mut authority = None;
    let mut headers = Vec::new();
    let mut pseudo_done = false;

    for (name, value) in fields {
        if let Some(pseudo) = name.strip_prefix(':') {
            if pseudo_done {
                return None; // pseudo-header after a regular field
            }
            match pseudo {
                "method" if method.is_none() => method = Some(value.clone()),
                "path" if path.is_none() && !value.is_empty() => path = Some(value.clone()),
                "scheme" if scheme.is_none() => scheme = Some(value.clone()),
                "authority" if authority.is_none() => authority = Some(value.clone()),
                _ => return None,
            }
        } else {
            pseudo_done = true;
            if name.chars().any(|c| c.is_ascii_uppercase()) {
                return None;
            }
            match name.as_str() {
                "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding"
                | "upgrade" => return None,
                "te" if !value.trim().eq_ignore_ascii_case("trailers") => return None,
                _ => headers.push((name.clone(), value.clone())),
            }
        }
    }

    let mut request = Request::new(method?, path?, Version::Http2);
    scheme?;
    if let Some(authority) = authority {
        request.headers.add("host", authority);
    }
    for (name, value) in headers {
        request.headers.add(name, value);
    }
    Some(request)
}

/// Header list for a response head: :status first, then fields with
/// lowercase names, connection-specific headers dropped, server/date
/// added, content-length owned by the codec.
fn response_fields(response: &Response, body_len: usize, head: bool) -> Vec<(String, String)> {
    let mut fields = vec![(":status".to_string(), response.status.to_string())];
    let mut saw_server = false;
    let mut saw_date = false;
    let mut saw_content_length = false;
    for (name, value) in response.headers.iter() {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "upgrade" => {
                continue
            }
            "content-length" => {
                // Meaningful for HEAD, where the codec sends no body.
                if !head {
                    continue;
                }
                saw_content_length = true;
            }
            "server" => saw_server = true,
            "date" => saw_date = true,
            _ => {}
        }
        fields.push((lower, value.to_string()));
    }
    if !saw_server {
        fields.push(("server".to_string(), SERVER_TOKEN.to_string()));
    }
    if !saw_date {
        fields.push(("date".to_string(), http_date()));
    }
    if !head && !saw_content_length && !response.bodyless() {
        fields.push(("content-length".to_string(), body_len.to_string()));
    }
    fields
}

impl FrameHandler for Inner {
    fn data_frame(&mut self, stream_id: u32, end_stream: bool, data: Bytes, flow_len: usize) {
        if !self.check_not_assembling() || !self.check_first_settings_done() {
            return;
        }
        self.conn_recv_window -= flow_len as i32;
        if self.conn_recv_window < 0 {
            self.connection_error(ERROR_FLOW_CONTROL_ERROR, "connection window exceeded");
            return;
        }
        // Replenish the connection window regardless of stream fate.
        self.conn_recv_window += flow_len as i32;
        if flow_len > 0 {
            self.writer.window_update(0, flow_len as u32);
        }

        let stream_state = match self.streams.get(&stream_id) {
            Some(stream) => stream.state,
            None => {
                if stream_id <= self.highest_peer_stream && stream_id % 2 == 1 {
                    self.stream_error(stream_id, ERROR_STREAM_CLOSED);
                } else {
                    self.connection_error(ERROR_PROTOCOL_ERROR, "DATA on idle stream");
                }
                return;
            }
        };
        if !stream_state.peer_may_send() {
            self.stream_error(stream_id, ERROR_STREAM_CLOSED);
            return;
        }

        let window_violated = {
            let stream = self.streams.get_mut(&stream_id).unwrap();
            stream.recv_window -= flow_len as i32;
            stream.recv_window < 0
        };
        if window_violated {
            self.stream_error(stream_id, ERROR_FLOW_CONTROL_ERROR);
            return;
        }

        {
            let stream = self.streams.get_mut(&stream_id).unwrap();
            if let (Some(handler), Some(state)) =
                (stream.handler.as_mut(), stream.response.as_ref())
            {
                handler.request_body_content(state, &data);
            }
            if !end_stream && flow_len > 0 {
                stream.recv_window += flow_len as i32;
                self.writer.window_update(stream_id, flow_len as u32);
            }
        }
        if end_stream {
            self.finish_request_recv_side(stream_id);
        }
    }

    fn headers_frame(
        &mut self,
        stream_id: u32,
        end_stream: bool,
        end_headers: bool,
        stream_dependency: u32,
        _exclusive: bool,
        _weight: u8,
        header_block_fragment: Bytes,
    ) {
        if !self.check_not_assembling() || !self.check_first_settings_done() {
            return;
        }
        if stream_id % 2 == 0 {
            self.connection_error(ERROR_PROTOCOL_ERROR, "client used even stream id");
            return;
        }

        let mut refuse = None;
        let existing = self.streams.get(&stream_id).map(|stream| stream.state);
        let trailers = match existing {
            Some(state) if state.peer_may_send() => {
                if !end_stream {
                    self.connection_error(
                        ERROR_PROTOCOL_ERROR,
                        "trailers without END_STREAM",
                    );
                    return;
                }
                true
            }
            Some(_) => {
                refuse = Some(ERROR_STREAM_CLOSED);
                false
            }
            None => {
                if stream_id <= self.highest_peer_stream {
                    self.connection_error(ERROR_PROTOCOL_ERROR, "stream id not increasing");
                    return;
                }
                self.highest_peer_stream = stream_id;
                if self.goaway_sent || self.goaway_received {
                    refuse = Some(ERROR_REFUSED_STREAM);
                } else if self.streams.len() >= self.local.max_concurrent_streams as usize {
                    refuse = Some(ERROR_REFUSED_STREAM);
                } else if stream_dependency == stream_id {
                    refuse = Some(ERROR_PROTOCOL_ERROR);
                }
                false
            }
        };

        self.assembly = Some(Assembly {
            stream_id,
            end_stream,
            trailers,
            refuse,
            block: BytesMut::from(&header_block_fragment[..]),
        });
        if end_headers {
            self.finish_assembly();
        }
    }

    fn priority_frame(
        &mut self,
        stream_id: u32,
        stream_dependency: u32,
        _exclusive: bool,
        _weight: u8,
    ) {
        if !self.check_not_assembling() || !self.check_first_settings_done() {
            return;
        }
        if stream_dependency == stream_id {
            self.stream_error(stream_id, ERROR_PROTOCOL_ERROR);
        }
        // Recorded but not scheduled on: dispatch stays FIFO.
    }

    fn rst_stream_frame(&mut self, stream_id: u32, error_code: u32) {
        if !self.check_not_assembling() || !self.check_first_settings_done() {
            return;
        }
        if stream_id > self.highest_peer_stream {
            self.connection_error(ERROR_PROTOCOL_ERROR, "RST_STREAM on idle stream");
            return;
        }
        trace!(
            "stream {} reset by peer: {}",
            stream_id,
            error_to_string(error_code)
        );
        if let Some(stream) = self.streams.remove(&stream_id) {
            if let Some(state) = stream.response {
                state.cancel();
            }
        }
    }

    fn settings_frame(&mut self, ack: bool, settings: Vec<(u16, u32)>) {
        if !self.check_not_assembling() {
            return;
        }
        if ack {
            if self.awaiting_first_settings {
                self.connection_error(ERROR_PROTOCOL_ERROR, "SETTINGS ACK before client SETTINGS");
                return;
            }
            self.settings_acked = true;
            if let Some(timer) = self.settings_timer.take() {
                timer.cancel();
            }
            return;
        }
        self.awaiting_first_settings = false;
        self.apply_peer_settings(&settings);
        if self.failed {
            return;
        }
        if self.settings_acked {
            if let Some(timer) = self.settings_timer.take() {
                timer.cancel();
            }
        }
        self.writer.settings_ack();
    }

    fn push_promise_frame(
        &mut self,
        _stream_id: u32,
        _promised_stream_id: u32,
        _end_headers: bool,
        _header_block_fragment: Bytes,
    ) {
        // Clients do not push.
        self.connection_error(ERROR_PROTOCOL_ERROR, "PUSH_PROMISE from client");
    }

    fn ping_frame(&mut self, ack: bool, opaque_data: u64) {
        if !self.check_not_assembling() || !self.check_first_settings_done() {
            return;
        }
        if !ack {
            self.writer.ping(opaque_data, true);
        }
    }

    fn goaway_frame(&mut self, last_stream_id: u32, error_code: u32, _debug_data: Bytes) {
        if !self.check_not_assembling() {
            return;
        }
        debug!(
            "peer GOAWAY: last stream {}, {}",
            last_stream_id,
            error_to_string(error_code)
        );
        self.goaway_received = true;
    }

    fn window_update_frame(&mut self, stream_id: u32, window_size_increment: u32) {
        if !self.check_not_assembling() || !self.check_first_settings_done() {
            return;
        }
        if stream_id == 0 {
            let adjusted = self.conn_send_window as i64 + window_size_increment as i64;
            if adjusted > MAX_WINDOW_SIZE {
                self.connection_error(ERROR_FLOW_CONTROL_ERROR, "connection window overflow");
                return;
            }
            self.conn_send_window = adjusted as i32;
        } else {
            let overflow = match self.streams.get_mut(&stream_id) {
                Some(stream) => {
                    let adjusted = stream.send_window as i64 + window_size_increment as i64;
                    if adjusted > MAX_WINDOW_SIZE {
                        true
                    } else {
                        stream.send_window = adjusted as i32;
                        false
                    }
                }
                // WINDOW_UPDATE for a stream already closed is ignored.
                None => return,
            };
            if overflow {
                self.stream_error(stream_id, ERROR_FLOW_CONTROL_ERROR);
                return;
            }
        }
        // Window growth may unblock pending response bodies.
        self.pump_responses();
    }

    fn continuation_frame(
        &mut self,
        stream_id: u32,
        end_headers: bool,
        header_block_fragment: Bytes,
    ) {
        match self.assembly.as_mut() {
            Some(assembly) if assembly.stream_id == stream_id => {
                if assembly.block.len() + header_block_fragment.len() > MAX_HEADER_BLOCK {
                    self.connection_error(ERROR_ENHANCE_YOUR_CALM, "header block too large");
                    return;
                }
                assembly.block.extend_from_slice(&header_block_fragment);
                if end_headers {
                    self.finish_assembly();
                }
            }
            _ => {
                self.connection_error(
                    ERROR_PROTOCOL_ERROR,
                    "CONTINUATION without open header block",
                );
            }
        }
    }

    fn frame_error(&mut self, error_code: u32, stream_id: u32, message: String) {
        if stream_id == 0 {
            self.connection_error(error_code, &message);
        } else {
            self.stream_error(stream_id, error_code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_fsm_transitions() {
        // open → half-closed(remote) on peer END_STREAM, then closed on ours.
        let state = StreamState::Open;
        let state = state.recv_end_stream();
        assert_eq!(state, StreamState::HalfClosedRemote);
        let state = state.send_end_stream();
        assert_eq!(state, StreamState::Closed);

        // The other interleaving.
        let state = StreamState::Open.send_end_stream();
        assert_eq!(state, StreamState::HalfClosedLocal);
        assert_eq!(state.recv_end_stream(), StreamState::Closed);

        // reserved(local) sends HEADERS → half-closed(remote).
        assert_eq!(
            StreamState::ReservedLocal.send_end_stream(),
            StreamState::HalfClosedRemote
        );

        assert!(StreamState::Open.peer_may_send());
        assert!(StreamState::HalfClosedLocal.peer_may_send());
        assert!(!StreamState::HalfClosedRemote.peer_may_send());
        assert!(!StreamState::Closed.peer_may_send());
    }

    #[test]
    fn build_request_maps_pseudo_headers() {
        let fields = vec![
            (":method".to_string(), "GET".to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":authority".to_string(), "files.example.net".to_string()),
            (":path".to_string(), "/dir/file.txt".to_string()),
            ("accept".to_string(), "*/*".to_string()),
        ];
        let request = build_request(&fields).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/dir/file.txt");
        assert_eq!(request.version, Version::Http2);
        assert_eq!(request.host(), Some("files.example.net"));
        assert_eq!(request.headers.get("accept"), Some("*/*"));
    }

    #[test]
    fn build_request_rejects_malformed() {
        // Missing :path.
        let fields = vec![
            (":method".to_string(), "GET".to_string()),
            (":scheme".to_string(), "https".to_string()),
        ];
        assert!(build_request(&fields).is_none());

        // Pseudo-header after a regular field.
        let fields = vec![
            (":method".to_string(), "GET".to_string()),
            ("accept".to_string(), "*/*".to_string()),
            (":path".to_string(), "/".to_string()),
        ];
        assert!(build_request(&fields).is_none());

        // Connection-specific header.
        let fields = vec![
            (":method".to_string(), "GET".to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":path".to_string(), "/".to_string()),
            ("connection".to_string(), "close".to_string()),
        ];
        assert!(build_request(&fields).is_none());

        // Uppercase field name.
        let fields = vec![
            (":method".to_string(), "GET".to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":path".to_string(), "/".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
        ];
        assert!(build_request(&fields).is_none());
    }

    #[test]
    fn response_fields_shape() {
        let response = Response::new(200)
            .header("Content-Type", "text/plain")
            .header("Connection", "keep-alive");
        let fields = response_fields(&response, 11, false);
        assert_eq!(fields[0], (":status".to_string(), "200".to_string()));
        assert!(fields.iter().any(|(n, v)| n == "content-type" && v == "text/plain"));
        assert!(!fields.iter().any(|(n, _)| n == "connection"));
        assert!(fields.iter().any(|(n, _)| n == "server"));
        assert!(fields.iter().any(|(n, _)| n == "date"));
        assert!(fields.iter().any(|(n, v)| n == "content-length" && v == "11"));
    }

    #[test]
    fn settings_defaults_match_protocol() {
        let settings = Settings::default();
        assert_eq!(settings.header_table_size, 4096);
        assert!(!settings.enable_push);
        assert_eq!(settings.max_concurrent_streams, 100);
        assert_eq!(settings.initial_window_size, 65535);
        assert_eq!(settings.max_frame_size, 16384);
        assert_eq!(settings.max_header_list_size, 8192);
    }
}
