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

//! Protocol handler contract: the surface between the reactor and a wire
//! protocol implementation. A connection owns exactly one ProtocolHandler
//! at a time; upgrades (h2c, WebSocket) swap it through the endpoint.

use bytes::BytesMut;
use std::io;

use crate::reactor::Endpoint;

/// Details of an established TLS session, reported once after the
/// handshake completes.
#[derive(Debug, Clone)]
pub struct SecurityInfo {
    /// Protocol version, e.g. "TLSv1.3".
    pub protocol: String,
    /// Negotiated cipher suite name.
    pub cipher_suite: String,
    /// Negotiated ALPN protocol, if any.
    pub alpn: Option<String>,
}

/// Wire protocol state machine driven by the reactor. All callbacks run on
/// the connection's owning worker thread, strictly serialized.
///
/// `receive` gets the connection's inbound buffer and consumes a prefix of
/// it; whatever it leaves is presented again at the head of the next
/// delivery (underflow preservation).
pub trait ProtocolHandler: Send {
    /// Connection is attached to its worker (or this handler was just
    /// swapped in). Keep a clone of the endpoint for output.
    fn connected(&mut self, endpoint: &Endpoint);

    /// Bytes arrived (plaintext when the connection is secure). Consume a
    /// prefix; the rest is buffered for the next call.
    fn receive(&mut self, buf: &mut BytesMut);

    /// Output can make progress: a response was completed by application
    /// code, or the outbound queue drained. Default does nothing.
    fn send_ready(&mut self) {}

    /// A timer scheduled through `Endpoint::schedule_timer` fired.
    fn timer_expired(&mut self, _kind: u64) {}

    /// TLS handshake completed on this connection.
    fn security_established(&mut self, _info: &SecurityInfo) {}

    /// Transport-level error. The connection closes after this returns.
    fn error(&mut self, _error: &io::Error) {}

    /// The connection is gone; called exactly once, last.
    fn disconnected(&mut self);
}
