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

//! HTTP/2 frame push parser: consumes complete frames from a buffer and
//! dispatches to a FrameHandler. A partial frame is left in the buffer for
//! the next delivery. Malformed frames are reported through
//! `frame_error`; the connection layer decides stream or connection scope.

use bytes::{Buf, Bytes, BytesMut};
use std::io;

use super::frame::*;
use super::handler::FrameHandler;

/// Push parser for HTTP/2 frames. Feed bytes via `receive`; the handler is
/// invoked for each complete frame.
pub struct FrameParser {
    max_frame_size: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Raise the acceptable frame size after we advertise a larger
    /// SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: usize) {
        assert!(
            (MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&size),
            "max frame size out of range"
        );
        self.max_frame_size = size;
    }

    /// Consume as many complete frames as possible from buf. Partial frame
    /// data is left in buf. Returns Err only when the handler reported a
    /// connection-fatal condition via frame_error and parsing must stop.
    pub fn receive<H: FrameHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), io::Error> {
        while buf.len() >= FRAME_HEADER_LENGTH {
            let length = (buf[0] as usize) << 16 | (buf[1] as usize) << 8 | (buf[2] as usize);
            if length > self.max_frame_size {
                handler.frame_error(
                    ERROR_FRAME_SIZE_ERROR,
                    0,
                    format!("frame size {} exceeds maximum {}", length, self.max_frame_size),
                );
                return Ok(());
            }
            if buf.len() < FRAME_HEADER_LENGTH + length {
                return Ok(());
            }
            let frame_type = buf[3];
            let flags = buf[4];
            let stream_id = ((buf[5] & 0x7f) as u32) << 24
                | (buf[6] as u32) << 16
                | (buf[7] as u32) << 8
                | (buf[8] as u32);

            buf.advance(FRAME_HEADER_LENGTH);
            let payload = buf.split_to(length).freeze();

            dispatch_frame(frame_type, flags, stream_id, payload, handler);
        }
        Ok(())
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch_frame<H: FrameHandler>(
    frame_type: u8,
    flags: u8,
    stream_id: u32,
    payload: Bytes,
    handler: &mut H,
) {
    match frame_type {
        TYPE_DATA => parse_data(flags, stream_id, payload, handler),
        TYPE_HEADERS => parse_headers(flags, stream_id, payload, handler),
        TYPE_PRIORITY => parse_priority(stream_id, payload, handler),
        TYPE_RST_STREAM => parse_rst_stream(stream_id, payload, handler),
        TYPE_SETTINGS => parse_settings(flags, stream_id, payload, handler),
        TYPE_PUSH_PROMISE => parse_push_promise(flags, stream_id, payload, handler),
        TYPE_PING => parse_ping(flags, stream_id, payload, handler),
        TYPE_GOAWAY => parse_goaway(stream_id, payload, handler),
        TYPE_WINDOW_UPDATE => parse_window_update(stream_id, payload, handler),
        TYPE_CONTINUATION => parse_continuation(flags, stream_id, payload, handler),
        _ => {} // unknown frame types are ignored (RFC 7540 §4.1)
    }
}

fn parse_data<H: FrameHandler>(flags: u8, stream_id: u32, mut payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.frame_error(ERROR_PROTOCOL_ERROR, 0, "DATA frame on stream 0".into());
        return;
    }
    let flow_len = payload.len();
    let end_stream = (flags & FLAG_END_STREAM) != 0;
    let data = if (flags & FLAG_PADDED) != 0 {
        if payload.is_empty() {
            handler.frame_error(
                ERROR_PROTOCOL_ERROR,
                0,
                "padded DATA frame without pad length".into(),
            );
            return;
        }
        let pad_len = payload.get_u8() as usize;
        if payload.len() < pad_len {
            handler.frame_error(
                ERROR_PROTOCOL_ERROR,
                0,
                "DATA frame padding exceeds payload".into(),
            );
            return;
        }
        payload.split_to(payload.len() - pad_len)
    } else {
        payload
    };
    handler.data_frame(stream_id, end_stream, data, flow_len);
}

fn parse_headers<H: FrameHandler>(flags: u8, stream_id: u32, mut payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.frame_error(ERROR_PROTOCOL_ERROR, 0, "HEADERS frame on stream 0".into());
        return;
    }
    let end_stream = (flags & FLAG_END_STREAM) != 0;
    let end_headers = (flags & FLAG_END_HEADERS) != 0;

    let pad_len = if (flags & FLAG_PADDED) != 0 {
        if payload.is_empty() {
            handler.frame_error(
                ERROR_PROTOCOL_ERROR,
                0,
                "padded HEADERS frame without pad length".into(),
            );
            return;
        }
        payload.get_u8() as usize
    } else {
        0
    };

    let (stream_dependency, exclusive, weight) = if (flags & FLAG_PRIORITY) != 0 {
        if payload.len() < 5 {
            handler.frame_error(
                ERROR_FRAME_SIZE_ERROR,
                stream_id,
                "HEADERS frame with PRIORITY too short".into(),
            );
            return;
        }
        let b0 = payload.get_u8();
        let exclusive = (b0 & 0x80) != 0;
        let stream_dependency = (b0 as u32 & 0x7f) << 24
            | (payload.get_u8() as u32) << 16
            | (payload.get_u8() as u32) << 8
            | (payload.get_u8() as u32);
        let weight = payload.get_u8().saturating_add(1);
        (stream_dependency, exclusive, weight)
    } else {
        (0u32, false, 16u8)
    };

    if payload.len() < pad_len {
        handler.frame_error(
            ERROR_PROTOCOL_ERROR,
            0,
            "HEADERS frame padding exceeds payload".into(),
        );
        return;
    }
    let header_block = payload.split_to(payload.len() - pad_len);
    handler.headers_frame(
        stream_id,
        end_stream,
        end_headers,
        stream_dependency,
        exclusive,
        weight,
        header_block,
    );
}

fn parse_priority<H: FrameHandler>(stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.frame_error(ERROR_PROTOCOL_ERROR, 0, "PRIORITY frame on stream 0".into());
        return;
    }
    if payload.len() != 5 {
        handler.frame_error(
            ERROR_FRAME_SIZE_ERROR,
            stream_id,
            "PRIORITY frame must be 5 bytes".into(),
        );
        return;
    }
    let mut p = payload;
    let b0 = p.get_u8();
    let exclusive = (b0 & 0x80) != 0;
    let stream_dependency = (b0 as u32 & 0x7f) << 24
        | (p.get_u8() as u32) << 16
        | (p.get_u8() as u32) << 8
        | (p.get_u8() as u32);
    let weight = p.get_u8().saturating_add(1);
    handler.priority_frame(stream_id, stream_dependency, exclusive, weight);
}

fn parse_rst_stream<H: FrameHandler>(stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.frame_error(ERROR_PROTOCOL_ERROR, 0, "RST_STREAM frame on stream 0".into());
        return;
    }
    if payload.len() != 4 {
        handler.frame_error(
            ERROR_FRAME_SIZE_ERROR,
            0,
            "RST_STREAM frame must be 4 bytes".into(),
        );
        return;
    }
    let mut p = payload;
    let error_code = p.get_u32();
    handler.rst_stream_frame(stream_id, error_code);
}

fn parse_settings<H: FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id != 0 {
        handler.frame_error(
            ERROR_PROTOCOL_ERROR,
            0,
            "SETTINGS frame with non-zero stream id".into(),
        );
        return;
    }
    let ack = (flags & FLAG_ACK) != 0;
    if ack && !payload.is_empty() {
        handler.frame_error(ERROR_FRAME_SIZE_ERROR, 0, "SETTINGS ACK frame must be empty".into());
        return;
    }
    if payload.len() % 6 != 0 {
        handler.frame_error(
            ERROR_FRAME_SIZE_ERROR,
            0,
            "SETTINGS frame size must be a multiple of 6".into(),
        );
        return;
    }
    let mut settings = Vec::with_capacity(payload.len() / 6);
    let mut p = payload;
    while p.len() >= 6 {
        let id = p.get_u16();
        let value = p.get_u32();
        settings.push((id, value));
    }
    handler.settings_frame(ack, settings);
}

fn parse_push_promise<H: FrameHandler>(flags: u8, stream_id: u32, mut payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.frame_error(ERROR_PROTOCOL_ERROR, 0, "PUSH_PROMISE frame on stream 0".into());
        return;
    }
    let end_headers = (flags & FLAG_END_HEADERS) != 0;
    let pad_len = if (flags & FLAG_PADDED) != 0 {
        if payload.is_empty() {
            handler.frame_error(
                ERROR_PROTOCOL_ERROR,
                0,
                "padded PUSH_PROMISE frame without pad length".into(),
            );
            return;
        }
        payload.get_u8() as usize
    } else {
        0
    };
    if payload.len() < 4 {
        handler.frame_error(
            ERROR_FRAME_SIZE_ERROR,
            0,
            "PUSH_PROMISE frame too short".into(),
        );
        return;
    }
    let promised_stream_id = payload.get_u32() & 0x7fff_ffff;
    if payload.len() < pad_len {
        handler.frame_error(
            ERROR_PROTOCOL_ERROR,
            0,
            "PUSH_PROMISE frame padding exceeds payload".into(),
        );
        return;
    }
    let header_block = payload.split_to(payload.len() - pad_len);
    handler.push_promise_frame(stream_id, promised_stream_id, end_headers, header_block);
}

fn parse_ping<H: FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id != 0 {
        handler.frame_error(
            ERROR_PROTOCOL_ERROR,
            0,
            "PING frame with non-zero stream id".into(),
        );
        return;
    }
    if payload.len() != 8 {
        handler.frame_error(ERROR_FRAME_SIZE_ERROR, 0, "PING frame must be 8 bytes".into());
        return;
    }
    let ack = (flags & FLAG_ACK) != 0;
    let mut p = payload;
    let opaque = p.get_u64();
    handler.ping_frame(ack, opaque);
}

fn parse_goaway<H: FrameHandler>(stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id != 0 {
        handler.frame_error(
            ERROR_PROTOCOL_ERROR,
            0,
            "GOAWAY frame with non-zero stream id".into(),
        );
        return;
    }
    if payload.len() < 8 {
        handler.frame_error(
            ERROR_FRAME_SIZE_ERROR,
            0,
            "GOAWAY frame must be at least 8 bytes".into(),
        );
        return;
    }
    let mut p = payload;
    let last_stream_id = p.get_u32() & 0x7fff_ffff;
    let error_code = p.get_u32();
    handler.goaway_frame(last_stream_id, error_code, p);
}

fn parse_window_update<H: FrameHandler>(stream_id: u32, payload: Bytes, handler: &mut H) {
    if payload.len() != 4 {
        handler.frame_error(
            ERROR_FRAME_SIZE_ERROR,
            0,
            "WINDOW_UPDATE frame must be 4 bytes".into(),
        );
        return;
    }
    let mut p = payload;
    let increment = p.get_u32() & 0x7fff_ffff;
    if increment == 0 {
        handler.frame_error(
            ERROR_PROTOCOL_ERROR,
            stream_id,
            "WINDOW_UPDATE increment must be non-zero".into(),
        );
        return;
    }
    handler.window_update_frame(stream_id, increment);
}

fn parse_continuation<H: FrameHandler>(flags: u8, stream_id: u32, payload: Bytes, handler: &mut H) {
    if stream_id == 0 {
        handler.frame_error(ERROR_PROTOCOL_ERROR, 0, "CONTINUATION frame on stream 0".into());
        return;
    }
    let end_headers = (flags & FLAG_END_HEADERS) != 0;
    handler.continuation_frame(stream_id, end_headers, payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Record {
        data: Vec<(u32, bool, Vec<u8>, usize)>,
        headers: Vec<(u32, bool, bool, Vec<u8>)>,
        settings: Vec<(bool, Vec<(u16, u32)>)>,
        pings: Vec<(bool, u64)>,
        window_updates: Vec<(u32, u32)>,
        rst_streams: Vec<(u32, u32)>,
        goaways: Vec<(u32, u32)>,
        errors: Vec<(u32, u32, String)>,
    }

    impl FrameHandler for Record {
        fn data_frame(&mut self, stream_id: u32, end_stream: bool, data: Bytes, flow_len: usize) {
            self.data.push((stream_id, end_stream, data.to_vec(), flow_len));
        }
        fn headers_frame(
            &mut self,
            stream_id: u32,
            end_stream: bool,
            end_headers: bool,
            _dep: u32,
            _excl: bool,
            _weight: u8,
            block: Bytes,
        ) {
            self.headers
                .push((stream_id, end_stream, end_headers, block.to_vec()));
        }
        fn priority_frame(&mut self, _s: u32, _d: u32, _e: bool, _w: u8) {}
        fn rst_stream_frame(&mut self, stream_id: u32, error_code: u32) {
            self.rst_streams.push((stream_id, error_code));
        }
        fn settings_frame(&mut self, ack: bool, settings: Vec<(u16, u32)>) {
            self.settings.push((ack, settings));
        }
        fn push_promise_frame(&mut self, _s: u32, _p: u32, _e: bool, _b: Bytes) {}
        fn ping_frame(&mut self, ack: bool, opaque: u64) {
            self.pings.push((ack, opaque));
        }
        fn goaway_frame(&mut self, last: u32, code: u32, _debug: Bytes) {
            self.goaways.push((last, code));
        }
        fn window_update_frame(&mut self, stream_id: u32, increment: u32) {
            self.window_updates.push((stream_id, increment));
        }
        fn continuation_frame(&mut self, _s: u32, _e: bool, _b: Bytes) {}
        fn frame_error(&mut self, code: u32, stream_id: u32, message: String) {
            self.errors.push((code, stream_id, message));
        }
    }

    fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let len = payload.len();
        out.push((len >> 16) as u8);
        out.push((len >> 8) as u8);
        out.push(len as u8);
        out.push(frame_type);
        out.push(flags);
        out.extend_from_slice(&stream_id.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn data_frame_with_padding_reports_flow_len() {
        let mut payload = vec![3u8]; // pad length
        payload.extend_from_slice(b"hello");
        payload.extend_from_slice(&[0, 0, 0]);
        let wire = frame(TYPE_DATA, FLAG_PADDED | FLAG_END_STREAM, 5, &payload);

        let mut buf = BytesMut::from(&wire[..]);
        let mut record = Record::default();
        FrameParser::new().receive(&mut buf, &mut record).unwrap();
        assert_eq!(record.data.len(), 1);
        let (stream_id, end_stream, data, flow_len) = &record.data[0];
        assert_eq!(*stream_id, 5);
        assert!(*end_stream);
        assert_eq!(data, b"hello");
        assert_eq!(*flow_len, 9);
    }

    #[test]
    fn partial_frame_left_in_buffer() {
        let wire = frame(TYPE_PING, 0, 0, &42u64.to_be_bytes());
        let mut buf = BytesMut::from(&wire[..wire.len() - 3]);
        let mut record = Record::default();
        let mut parser = FrameParser::new();
        parser.receive(&mut buf, &mut record).unwrap();
        assert!(record.pings.is_empty());
        assert_eq!(buf.len(), wire.len() - 3);

        buf.extend_from_slice(&wire[wire.len() - 3..]);
        parser.receive(&mut buf, &mut record).unwrap();
        assert_eq!(record.pings, vec![(false, 42)]);
        assert!(buf.is_empty());
    }

    #[test]
    fn settings_parsed_as_pairs() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&SETTINGS_MAX_CONCURRENT_STREAMS.to_be_bytes());
        payload.extend_from_slice(&100u32.to_be_bytes());
        payload.extend_from_slice(&SETTINGS_INITIAL_WINDOW_SIZE.to_be_bytes());
        payload.extend_from_slice(&65535u32.to_be_bytes());
        let wire = frame(TYPE_SETTINGS, 0, 0, &payload);

        let mut buf = BytesMut::from(&wire[..]);
        let mut record = Record::default();
        FrameParser::new().receive(&mut buf, &mut record).unwrap();
        assert_eq!(
            record.settings,
            vec![(false, vec![(3, 100), (4, 65535)])]
        );
    }

    #[test]
    fn settings_ack_with_payload_is_frame_size_error() {
        let wire = frame(TYPE_SETTINGS, FLAG_ACK, 0, &[0; 6]);
        let mut buf = BytesMut::from(&wire[..]);
        let mut record = Record::default();
        FrameParser::new().receive(&mut buf, &mut record).unwrap();
        assert_eq!(record.errors[0].0, ERROR_FRAME_SIZE_ERROR);
    }

    #[test]
    fn window_update_zero_increment_rejected() {
        let wire = frame(TYPE_WINDOW_UPDATE, 0, 1, &0u32.to_be_bytes());
        let mut buf = BytesMut::from(&wire[..]);
        let mut record = Record::default();
        FrameParser::new().receive(&mut buf, &mut record).unwrap();
        assert_eq!(record.errors[0].0, ERROR_PROTOCOL_ERROR);
        assert_eq!(record.errors[0].1, 1);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut wire = vec![0xff, 0xff, 0xff, TYPE_DATA, 0];
        wire.extend_from_slice(&1u32.to_be_bytes());
        let mut buf = BytesMut::from(&wire[..]);
        let mut record = Record::default();
        FrameParser::new().receive(&mut buf, &mut record).unwrap();
        assert_eq!(record.errors[0].0, ERROR_FRAME_SIZE_ERROR);
    }

    #[test]
    fn unknown_frame_type_ignored() {
        let wire = frame(0x42, 0, 3, b"whatever");
        let mut buf = BytesMut::from(&wire[..]);
        let mut record = Record::default();
        FrameParser::new().receive(&mut buf, &mut record).unwrap();
        assert!(record.errors.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn goaway_parsed() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&7u32.to_be_bytes());
        payload.extend_from_slice(&ERROR_ENHANCE_YOUR_CALM.to_be_bytes());
        let wire = frame(TYPE_GOAWAY, 0, 0, &payload);
        let mut buf = BytesMut::from(&wire[..]);
        let mut record = Record::default();
        FrameParser::new().receive(&mut buf, &mut record).unwrap();
        assert_eq!(record.goaways, vec![(7, ERROR_ENHANCE_YOUR_CALM)]);
    }
}
