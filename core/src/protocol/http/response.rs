/*
 * response.rs
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

//! Outgoing response head: numeric status plus headers. The codecs add
//! Server, Date and framing headers when they serialize.

use chrono::Utc;

use super::headers::Headers;

/// Value of the Server header the codecs emit.
pub const SERVER_TOKEN: &str = concat!("gumdrop/", env!("CARGO_PKG_VERSION"));

/// Response status and headers as produced by a RequestHandler.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
        }
    }

    /// Builder-style header append.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn reason(&self) -> &'static str {
        reason_phrase(self.status)
    }

    /// True when this status never carries a body (RFC 7230 §3.3.3).
    pub fn bodyless(&self) -> bool {
        matches!(self.status, 100..=199 | 204 | 304)
    }
}

/// Reason phrase for the statuses the core emits (RFC 7231 §6).
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        423 => "Locked",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

/// Current time as an IMF-fixdate for the Date header (RFC 7231 §7.1.1.1).
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
