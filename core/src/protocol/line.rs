/*
 * line.rs
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

//! CRLF line framing for the line-based sub-protocols (SMTP, IMAP, POP).
//! A free function over the inbound buffer, not a connection type: the
//! protocol handler calls it from `receive` and keeps whatever trails the
//! last complete line for the next delivery.

use bytes::BytesMut;

/// Line consumer. After every line the framer asks whether to keep going;
/// answering false leaves the remaining bytes untouched, which is how
/// protocols step out of line mode mid-buffer (SMTP DATA).
pub trait LineHandler {
    /// One line, including its CRLF terminator.
    fn line_received(&mut self, line: &[u8]);

    /// Keep scanning for further lines in this buffer?
    fn continue_line_processing(&self) -> bool {
        true
    }
}

/// Scan `buf` for CRLF-terminated lines, invoking the handler for each.
/// Bytes after the last complete line stay in `buf`.
pub fn read_lines<H: LineHandler>(buf: &mut BytesMut, handler: &mut H) {
    loop {
        let line_end = match buf.windows(2).position(|w| w == b"\r\n") {
            Some(n) => n,
            None => return,
        };
        let line = buf.split_to(line_end + 2);
        handler.line_received(&line);
        if !handler.continue_line_processing() {
            return;
        }
    }
}
