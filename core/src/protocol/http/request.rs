/*
 * request.rs
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

//! Incoming HTTP request: method, target, version, headers. Shared by the
//! HTTP/1.1 and HTTP/2 paths; the body streams through the RequestHandler
//! callbacks rather than living here.

use super::headers::Headers;

/// Protocol version a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
    Http2,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::Http2 => "HTTP/2",
        }
    }
}

/// One request as handed to a RequestHandler.
#[derive(Debug, Clone)]
pub struct Request {
    /// Method token, e.g. "GET". Uppercase on the wire is preserved.
    pub method: String,
    /// Request target as sent (origin-form for ordinary requests).
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

impl Request {
    pub fn new(method: impl Into<String>, target: impl Into<String>, version: Version) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version,
            headers: Headers::new(),
        }
    }

    /// Host the request addresses: Host header (HTTP/1.1) or :authority
    /// (HTTP/2, stored as Host during decode).
    pub fn host(&self) -> Option<&str> {
        self.headers.get("host")
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
}
