/*
 * mod.rs
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

//! WebSocket (RFC 6455): frame codec shared by both roles, the server
//! handshake computation, and the post-upgrade connection handler.

mod connection;
mod frame;
mod handshake;

pub use connection::{WsConnection, WsSender};
pub use frame::{
    encode_frame, FrameEvents, FrameParser, MAX_FRAME_PAYLOAD, OP_BINARY, OP_CLOSE,
    OP_CONTINUATION, OP_PING, OP_PONG, OP_TEXT,
};
pub use handshake::accept_value;

/// Application-side WebSocket endpoint. One instance per connection,
/// created through a WebSocketHandlerFactory at upgrade time. Callbacks
/// arrive on the connection's worker; the sender is thread-safe.
pub trait WebSocketHandler: Send {
    /// Upgrade completed; keep the sender for emitting frames.
    fn connected(&mut self, sender: &WsSender);

    /// Complete text message (fragments already reassembled).
    fn text_message(&mut self, data: &str);

    /// Complete binary message.
    fn binary_message(&mut self, data: &[u8]);

    /// Ping received; the connection answers with a pong itself.
    fn ping(&mut self, _data: &[u8]) {}

    /// Pong received.
    fn pong(&mut self, _data: &[u8]) {}

    /// The connection is closing: peer close frame (with its code), or
    /// transport loss (code None). Called exactly once.
    fn closed(&mut self, code: Option<u16>, reason: &str);
}

/// Creates one WebSocketHandler per upgraded connection.
pub trait WebSocketHandlerFactory: Send + Sync {
    fn new_websocket_handler(&self) -> Box<dyn WebSocketHandler>;
}

impl<F> WebSocketHandlerFactory for F
where
    F: Fn() -> Box<dyn WebSocketHandler> + Send + Sync,
{
    fn new_websocket_handler(&self) -> Box<dyn WebSocketHandler> {
        self()
    }
}
