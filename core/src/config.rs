/*
 * config.rs
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

//! Listener and server configuration. Plain data; wiring it from files is
//! a concern of the embedding application, and TLS material (certificates,
//! keys) arrives ready-made as a rustls ServerConfig from the keystore
//! component.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one listening socket.
#[derive(Clone)]
pub struct ListenerConfig {
    pub address: IpAddr,
    pub port: u16,
    /// TLS on this listener. `tls` must be set when true.
    pub secure: bool,
    pub tls: Option<Arc<rustls::ServerConfig>>,
    /// Limit on the request line and header block (HTTP/1.1) and on the
    /// decoded header list (HTTP/2).
    pub max_header_size: usize,
    /// Limit on declared request body size; beyond it the request is
    /// answered 413.
    pub max_body_size: u64,
    /// Connection closes after this long without a complete request.
    pub idle_timeout: Duration,
    /// TLS handshake must finish within this.
    pub handshake_timeout: Duration,
    /// A started request's header block must arrive within this.
    pub header_timeout: Duration,
    /// Offer h2 on ALPN (secure listeners).
    pub http2_enabled: bool,
    /// Accept `Upgrade: h2c` on cleartext connections.
    pub h2c_upgrade_enabled: bool,
    /// Accept WebSocket upgrades (requires a WebSocket handler factory).
    pub websocket_enabled: bool,
    /// Keep-alive PING cadence on HTTP/2 connections.
    pub http2_ping_interval: Option<Duration>,
}

impl ListenerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            secure: false,
            tls: None,
            max_header_size: 16 * 1024,
            max_body_size: 64 * 1024 * 1024,
            idle_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
            header_timeout: Duration::from_secs(10),
            http2_enabled: true,
            h2c_upgrade_enabled: true,
            websocket_enabled: true,
            http2_ping_interval: None,
        }
    }

    /// Secure listener using externally supplied TLS material.
    pub fn new_secure(port: u16, tls: Arc<rustls::ServerConfig>) -> Self {
        let mut config = Self::new(port);
        config.secure = true;
        config.tls = Some(tls);
        config
    }
}

/// Whole-server configuration: the shared worker pool plus one entry per
/// listener.
#[derive(Clone)]
pub struct ServerConfig {
    /// Worker threads shared by all listeners; 0 means one per CPU.
    pub workers: usize,
    pub listeners: Vec<ListenerConfig>,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            workers: 0,
            listeners: Vec::new(),
        }
    }

    pub fn listener(mut self, listener: ListenerConfig) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
