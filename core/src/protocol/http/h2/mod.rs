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

//! HTTP/2: frame codec, stream state machine, flow control, and the
//! server connection handler (no external h2 crate).

mod connection;
mod frame;
mod handler;
mod parser;
mod writer;

pub use connection::{H2Connection, Settings, StreamState};
pub use frame::{
    error_to_string, DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE, ERROR_CANCEL,
    ERROR_COMPRESSION_ERROR, ERROR_ENHANCE_YOUR_CALM, ERROR_FLOW_CONTROL_ERROR,
    ERROR_FRAME_SIZE_ERROR, ERROR_INTERNAL_ERROR, ERROR_NO_ERROR, ERROR_PROTOCOL_ERROR,
    ERROR_REFUSED_STREAM, ERROR_SETTINGS_TIMEOUT, ERROR_STREAM_CLOSED, FLAG_ACK,
    FLAG_END_HEADERS, FLAG_END_STREAM, FLAG_PADDED, FLAG_PRIORITY, FRAME_HEADER_LENGTH,
    MAX_MAX_FRAME_SIZE, MAX_WINDOW_SIZE, MIN_MAX_FRAME_SIZE, SETTINGS_ENABLE_PUSH,
    SETTINGS_HEADER_TABLE_SIZE, SETTINGS_INITIAL_WINDOW_SIZE, SETTINGS_MAX_CONCURRENT_STREAMS,
    SETTINGS_MAX_FRAME_SIZE, SETTINGS_MAX_HEADER_LIST_SIZE, TYPE_CONTINUATION, TYPE_DATA,
    TYPE_GOAWAY, TYPE_HEADERS, TYPE_PING, TYPE_PRIORITY, TYPE_PUSH_PROMISE, TYPE_RST_STREAM,
    TYPE_SETTINGS, TYPE_WINDOW_UPDATE,
};
pub use handler::FrameHandler;
pub use parser::FrameParser;
pub use writer::FrameWriter;

/// HTTP/2 connection preface (PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
