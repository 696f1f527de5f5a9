/*
 * parser.rs
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

//! HTTP/1.1 request push parser: request line, headers, body with
//! Content-Length or chunked framing. Feed bytes via `receive`; events
//! fire as complete tokens parse, partial data stays in the buffer.
//!
//! After the header block the parser pauses in `HeadersComplete`; the
//! connection inspects the headers, answers 100-continue and upgrades,
//! then sets the body mode and resumes. Errors carry the HTTP status the
//! connection should answer with before closing (400, 414, 431, 505).

use bytes::{Buf, BytesMut};

/// Parse failure with the status code to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    pub status: u16,
    pub message: &'static str,
}

impl ParseError {
    fn bad_request(message: &'static str) -> Self {
        Self {
            status: 400,
            message,
        }
    }
}

/// Callbacks for parsed request tokens.
pub trait RequestEvents {
    fn request_line(&mut self, method: &str, target: &str, major: u8, minor: u8);
    fn header(&mut self, name: &str, value: &str);
    fn body_chunk(&mut self, data: &[u8]);
    fn trailer(&mut self, name: &str, value: &str);
    fn request_complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    /// Header block done; the connection must call `set_body_mode`.
    HeadersComplete,
    Body,
    ChunkSize,
    ChunkData,
    /// CRLF after a chunk's data.
    ChunkDataEnd,
    ChunkTrailer,
    /// Request fully parsed; `reset` starts the next one.
    Idle,
}

/// Push parser for one HTTP/1.1 request at a time.
pub struct RequestParser {
    state: ParseState,
    /// Limit on the request line and on the whole header block.
    max_header_size: usize,
    header_bytes: usize,
    /// Buffered header awaiting possible obs-fold continuation.
    pending_header: Option<(String, String)>,
    content_length: u64,
    body_received: u64,
    chunk_remaining: u64,
}

impl RequestParser {
    pub fn new(max_header_size: usize) -> Self {
        Self {
            state: ParseState::RequestLine,
            max_header_size,
            header_bytes: 0,
            pending_header: None,
            content_length: 0,
            body_received: 0,
            chunk_remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Prepare for the next pipelined request.
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.header_bytes = 0;
        self.pending_header = None;
        self.content_length = 0;
        self.body_received = 0;
        self.chunk_remaining = 0;
    }

    /// Set body framing after headers (state HeadersComplete). No body
    /// moves the parser straight to Idle; the connection finishes the
    /// request itself in that case.
    pub fn set_body_mode(&mut self, content_length: Option<u64>, chunked: bool) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        if chunked {
            self.state = ParseState::ChunkSize;
        } else {
            match content_length {
                Some(0) | None => self.state = ParseState::Idle,
                Some(n) => {
                    self.content_length = n;
                    self.body_received = 0;
                    self.state = ParseState::Body;
                }
            }
        }
    }

    /// Consume as much as possible from `buf`, firing events. Partial
    /// tokens stay in the buffer for the next call.
    pub fn receive<H: RequestEvents>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), ParseError> {
        loop {
            match self.state {
                ParseState::RequestLine => {
                    // Tolerate blank lines before the request line.
                    while buf.len() >= 2 && buf[0] == b'\r' && buf[1] == b'\n' {
                        buf.advance(2);
                    }
                    let line_end = match find_crlf(buf) {
                        Some(n) => n,
                        None => {
                            if buf.len() > self.max_header_size {
                                return Err(ParseError {
                                    status: 414,
                                    message: "request line too long",
                                });
                            }
                            return Ok(());
                        }
                    };
                    if line_end > self.max_header_size {
                        return Err(ParseError {
                            status: 414,
                            message: "request line too long",
                        });
                    }
                    let line = buf.split_to(line_end + 2);
                    self.parse_request_line(&line[..line_end], handler)?;
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let line_end = match find_crlf(buf) {
                        Some(n) => n,
                        None => {
                            if self.header_bytes + buf.len() > self.max_header_size {
                                return Err(ParseError {
                                    status: 431,
                                    message: "header block too large",
                                });
                            }
                            return Ok(());
                        }
                    };
                    self.header_bytes += line_end + 2;
                    if self.header_bytes > self.max_header_size {
                        return Err(ParseError {
                            status: 431,
                            message: "header block too large",
                        });
                    }
                    let line = buf.split_to(line_end + 2);
                    if line_end == 0 {
                        if let Some((name, value)) = self.pending_header.take() {
                            handler.header(&name, &value);
                        }
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    self.parse_header_line(&line[..line_end], handler)?;
                }
                ParseState::HeadersComplete => return Ok(()),
                ParseState::Body => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let want = (self.content_length - self.body_received) as usize;
                    let take = want.min(buf.len());
                    let chunk = buf.split_to(take);
                    handler.body_chunk(&chunk);
                    self.body_received += take as u64;
                    if self.body_received >= self.content_length {
                        handler.request_complete();
                        self.state = ParseState::Idle;
                    }
                }
                ParseState::ChunkSize => {
                    let line_end = match find_crlf(buf) {
                        Some(n) => n,
                        None => return Ok(()),
                    };
                    let line = buf.split_to(line_end + 2);
                    let size = parse_chunk_size(&line[..line_end])?;
                    if size == 0 {
                        self.state = ParseState::ChunkTrailer;
                    } else {
                        self.chunk_remaining = size;
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let take = (self.chunk_remaining as usize).min(buf.len());
                    let chunk = buf.split_to(take);
                    handler.body_chunk(&chunk);
                    self.chunk_remaining -= take as u64;
                    if self.chunk_remaining == 0 {
                        self.state = ParseState::ChunkDataEnd;
                    }
                }
                ParseState::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ParseError::bad_request("chunk data not CRLF-terminated"));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let line_end = match find_crlf(buf) {
                        Some(n) => n,
                        None => return Ok(()),
                    };
                    let line = buf.split_to(line_end + 2);
                    if line_end == 0 {
                        handler.request_complete();
                        self.state = ParseState::Idle;
                    } else if let Some(colon) = line[..line_end].iter().position(|&b| b == b':') {
                        let name = trim_ascii(&line[..colon]);
                        let value = trim_ascii(&line[colon + 1..line_end]);
                        handler.trailer(
                            &String::from_utf8_lossy(name),
                            &String::from_utf8_lossy(value),
                        );
                    }
                }
                ParseState::Idle => return Ok(()),
            }
        }
    }

    fn parse_request_line<H: RequestEvents>(
        &mut self,
        line: &[u8],
        handler: &mut H,
    ) -> Result<(), ParseError> {
        let text = std::str::from_utf8(line)
            .map_err(|_| ParseError::bad_request("request line not ASCII"))?;
        let mut parts = text.split(' ');
        let method = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::bad_request("missing method"))?;
        let target = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::bad_request("missing request target"))?;
        let version = parts
            .next()
            .ok_or_else(|| ParseError::bad_request("missing HTTP version"))?;
        if parts.next().is_some() {
            return Err(ParseError::bad_request("extra fields in request line"));
        }
        if !method.bytes().all(is_token_char) {
            return Err(ParseError::bad_request("method is not a token"));
        }
        if !target.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(ParseError::bad_request("request target has invalid octets"));
        }
        let (major, minor) = parse_version(version)?;
        if (major, minor) != (1, 0) && (major, minor) != (1, 1) {
            return Err(ParseError {
                status: 505,
                message: "unsupported HTTP version",
            });
        }
        handler.request_line(method, target, major, minor);
        Ok(())
    }

    fn parse_header_line<H: RequestEvents>(
        &mut self,
        line: &[u8],
        handler: &mut H,
    ) -> Result<(), ParseError> {
        // obs-fold: a continuation line extends the previous header value,
        // joined by a single SP (RFC 7230 §3.2.4).
        if line[0] == b' ' || line[0] == b'\t' {
            match self.pending_header.as_mut() {
                Some((_, value)) => {
                    let folded = trim_ascii(line);
                    value.push(' ');
                    value.push_str(&String::from_utf8_lossy(folded));
                    return Ok(());
                }
                None => return Err(ParseError::bad_request("continuation before any header")),
            }
        }
        if let Some((name, value)) = self.pending_header.take() {
            handler.header(&name, &value);
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| ParseError::bad_request("header line without colon"))?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|&b| is_token_char(b)) {
            return Err(ParseError::bad_request("header name is not a token"));
        }
        let value = trim_ascii(&line[colon + 1..]);
        self.pending_header = Some((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
        Ok(())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

fn parse_version(version: &str) -> Result<(u8, u8), ParseError> {
    let rest = version
        .strip_prefix("HTTP/")
        .ok_or_else(|| ParseError::bad_request("malformed HTTP version"))?;
    let bytes = rest.as_bytes();
    if bytes.len() != 3 || !bytes[0].is_ascii_digit() || bytes[1] != b'.' || !bytes[2].is_ascii_digit()
    {
        return Err(ParseError::bad_request("malformed HTTP version"));
    }
    Ok((bytes[0] - b'0', bytes[2] - b'0'))
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let text =
        std::str::from_utf8(line).map_err(|_| ParseError::bad_request("chunk size not ASCII"))?;
    let hex = text.split(';').next().unwrap_or("").trim();
    if hex.is_empty() || hex.len() > 16 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::bad_request("invalid chunk size"));
    }
    u64::from_str_radix(hex, 16).map_err(|_| ParseError::bad_request("invalid chunk size"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Record {
        request_line: Option<(String, String, u8, u8)>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        trailers: Vec<(String, String)>,
        complete: bool,
    }

    impl RequestEvents for Record {
        fn request_line(&mut self, method: &str, target: &str, major: u8, minor: u8) {
            self.request_line = Some((method.into(), target.into(), major, minor));
        }
        fn header(&mut self, name: &str, value: &str) {
            self.headers.push((name.into(), value.into()));
        }
        fn body_chunk(&mut self, data: &[u8]) {
            self.body.extend_from_slice(data);
        }
        fn trailer(&mut self, name: &str, value: &str) {
            self.trailers.push((name.into(), value.into()));
        }
        fn request_complete(&mut self) {
            self.complete = true;
        }
    }

    fn feed(parser: &mut RequestParser, record: &mut Record, bytes: &[u8]) -> Result<(), ParseError> {
        let mut buf = BytesMut::from(bytes);
        let result = parser.receive(&mut buf, record);
        assert!(buf.is_empty() || result.is_err() || parser.state() == ParseState::HeadersComplete);
        result
    }

    #[test]
    fn simple_get() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let mut buf = BytesMut::from(
            &b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n"[..],
        );
        parser.receive(&mut buf, &mut record).unwrap();
        assert_eq!(parser.state(), ParseState::HeadersComplete);
        assert_eq!(
            record.request_line,
            Some(("GET".into(), "/index.html".into(), 1, 1))
        );
        assert_eq!(
            record.headers,
            vec![
                ("Host".to_string(), "example.com".to_string()),
                ("Accept".to_string(), "*/*".to_string()),
            ]
        );
        parser.set_body_mode(None, false);
        assert_eq!(parser.state(), ParseState::Idle);
    }

    #[test]
    fn split_across_arbitrary_boundaries() {
        let wire = b"POST /submit HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello";
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let mut buf = BytesMut::new();
        for chunk in wire.chunks(3) {
            buf.extend_from_slice(chunk);
            parser.receive(&mut buf, &mut record).unwrap();
            if parser.state() == ParseState::HeadersComplete {
                parser.set_body_mode(Some(5), false);
            }
        }
        assert!(record.complete);
        assert_eq!(record.body, b"hello");
    }

    #[test]
    fn chunked_body_with_trailer() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let mut buf = BytesMut::from(
            &b"PUT /up HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n"[..],
        );
        parser.receive(&mut buf, &mut record).unwrap();
        assert_eq!(parser.state(), ParseState::HeadersComplete);
        parser.set_body_mode(None, true);

        buf.extend_from_slice(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Sum: ok\r\n\r\n");
        parser.receive(&mut buf, &mut record).unwrap();
        assert!(record.complete);
        assert_eq!(record.body, b"Wikipedia");
        assert_eq!(record.trailers, vec![("X-Sum".to_string(), "ok".to_string())]);
        assert_eq!(parser.state(), ParseState::Idle);
    }

    #[test]
    fn chunk_extension_ignored() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let mut buf =
            BytesMut::from(&b"PUT / HTTP/1.1\r\nHost: h\r\n\r\n"[..]);
        parser.receive(&mut buf, &mut record).unwrap();
        parser.set_body_mode(None, true);
        buf.extend_from_slice(b"3;name=val\r\nabc\r\n0\r\n\r\n");
        parser.receive(&mut buf, &mut record).unwrap();
        assert_eq!(record.body, b"abc");
        assert!(record.complete);
    }

    #[test]
    fn obs_fold_joined_with_single_space() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let mut buf = BytesMut::from(
            &b"GET / HTTP/1.1\r\nHost: h\r\nX-Long: first\r\n   second\r\n\r\n"[..],
        );
        parser.receive(&mut buf, &mut record).unwrap();
        assert_eq!(
            record.headers,
            vec![
                ("Host".to_string(), "h".to_string()),
                ("X-Long".to_string(), "first second".to_string()),
            ]
        );
    }

    #[test]
    fn bad_method_rejected() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let err = feed(&mut parser, &mut record, b"GE T / HTTP/1.1\r\n").unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn missing_version_rejected() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let err = feed(&mut parser, &mut record, b"GET /\r\n").unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn unsupported_version_is_505() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let err = feed(&mut parser, &mut record, b"GET / HTTP/2.0\r\n").unwrap_err();
        assert_eq!(err.status, 505);
    }

    #[test]
    fn oversized_request_line_is_414() {
        let mut parser = RequestParser::new(64);
        let mut record = Record::default();
        let long = format!("GET /{} HTTP/1.1\r\n", "a".repeat(100));
        let err = feed(&mut parser, &mut record, long.as_bytes()).unwrap_err();
        assert_eq!(err.status, 414);
    }

    #[test]
    fn oversized_headers_are_431() {
        let mut parser = RequestParser::new(64);
        let mut record = Record::default();
        let wire = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "b".repeat(100));
        let err = feed(&mut parser, &mut record, wire.as_bytes()).unwrap_err();
        assert_eq!(err.status, 431);
    }

    #[test]
    fn header_name_with_space_rejected() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let err = feed(
            &mut parser,
            &mut record,
            b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n",
        )
        .unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn leading_blank_lines_tolerated() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let mut buf = BytesMut::from(&b"\r\n\r\nGET / HTTP/1.1\r\nHost: h\r\n\r\n"[..]);
        parser.receive(&mut buf, &mut record).unwrap();
        assert_eq!(parser.state(), ParseState::HeadersComplete);
    }

    #[test]
    fn pipelined_requests_parse_after_reset() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let mut buf = BytesMut::from(
            &b"GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n"[..],
        );
        parser.receive(&mut buf, &mut record).unwrap();
        assert_eq!(parser.state(), ParseState::HeadersComplete);
        parser.set_body_mode(None, false);
        parser.reset();

        let mut second = Record::default();
        parser.receive(&mut buf, &mut second).unwrap();
        assert_eq!(parser.state(), ParseState::HeadersComplete);
        assert_eq!(second.request_line.unwrap().1, "/b");
        assert!(buf.is_empty());
    }

    #[test]
    fn bad_chunk_size_rejected() {
        let mut parser = RequestParser::new(16 * 1024);
        let mut record = Record::default();
        let mut buf = BytesMut::from(&b"PUT / HTTP/1.1\r\nHost: h\r\n\r\n"[..]);
        parser.receive(&mut buf, &mut record).unwrap();
        parser.set_body_mode(None, true);
        buf.extend_from_slice(b"zz\r\n");
        let err = parser.receive(&mut buf, &mut record).unwrap_err();
        assert_eq!(err.status, 400);
    }
}
