/*
 * lib.rs
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

//! Gumdrop network core: a readiness reactor with a worker pool, TLS via
//! rustls, HTTP/1.1 and HTTP/2 with our own HPACK, WebSocket framing, and
//! the handler contracts that application components (file/WebDAV
//! serving, the mail protocols) plug into.
//!
//! Bytes flow: socket → reactor worker → TLS pump (secure listeners) →
//! the connection's ProtocolHandler. For HTTP/1.1 that handler is the
//! request parser plus response serializer; for HTTP/2 a frame decoder
//! routing per-stream state machines. Both end in the same
//! RequestHandler interface.

pub mod config;
pub mod protocol;
pub mod reactor;
pub mod server;

pub use config::{ListenerConfig, ServerConfig};
pub use protocol::http::{
    Headers, Request, RequestHandler, RequestHandlerFactory, Response, ResponseState,
};
pub use protocol::websocket::{WebSocketHandler, WebSocketHandlerFactory};
pub use protocol::{ProtocolHandler, SecurityInfo, ServiceContext};
pub use reactor::{Endpoint, Reactor, TimerHandle, TimerService};
pub use server::Server;
