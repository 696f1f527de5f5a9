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

//! Wire protocol implementations and the handler contracts between them,
//! the reactor below, and application components above.

pub mod handler;
pub mod http;
pub mod line;
pub mod webdav;
pub mod websocket;

use std::sync::Arc;

pub use handler::{ProtocolHandler, SecurityInfo};

use crate::config::ListenerConfig;
use http::handler::RequestHandlerFactory;
use websocket::WebSocketHandlerFactory;

/// Everything a protocol handler needs from its listener: limits and
/// feature switches, plus the application factories requests are routed
/// to. One per listener, shared by all its connections.
pub struct ServiceContext {
    pub config: ListenerConfig,
    pub request_handlers: Arc<dyn RequestHandlerFactory>,
    pub websocket_handlers: Option<Arc<dyn WebSocketHandlerFactory>>,
}
