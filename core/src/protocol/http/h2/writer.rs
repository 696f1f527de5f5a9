/*
 * writer.rs
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

//! HTTP/2 frame writer: serializes frames into a buffer. The connection
//! takes the buffer and hands it to the endpoint's send queue. A header
//! block longer than the peer's MAX_FRAME_SIZE is fragmented into HEADERS
//! plus CONTINUATION frames in one call, so the burst stays contiguous.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::*;

/// Writes HTTP/2 frames into a BytesMut. Call `take_buffer` to hand the
/// accumulated bytes to the transport.
pub struct FrameWriter {
    buf: BytesMut,
    /// Peer's SETTINGS_MAX_FRAME_SIZE: upper bound on emitted payloads.
    max_frame_size: usize,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_MAX_FRAME_SIZE + FRAME_HEADER_LENGTH),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Apply the peer's SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: usize) {
        assert!(
            (MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&size),
            "max frame size out of range"
        );
        self.max_frame_size = size;
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn frame_header(&mut self, length: usize, frame_type: u8, flags: u8, stream_id: u32) {
        debug_assert!(length <= self.max_frame_size);
        self.buf.put_u8((length >> 16) as u8);
        self.buf.put_u8((length >> 8) as u8);
        self.buf.put_u8(length as u8);
        self.buf.put_u8(frame_type);
        self.buf.put_u8(flags);
        self.buf.put_u32(stream_id & 0x7fff_ffff);
    }

    /// One DATA frame. The caller bounds `data` by the send windows and
    /// the peer's max frame size.
    pub fn data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        debug_assert!(stream_id != 0);
        debug_assert!(data.len() <= self.max_frame_size);
        let flags = if end_stream { FLAG_END_STREAM } else { 0 };
        self.frame_header(data.len(), TYPE_DATA, flags, stream_id);
        self.buf.extend_from_slice(data);
    }

    /// A complete header block: HEADERS plus as many CONTINUATION frames
    /// as the block needs. The burst is emitted back to back.
    pub fn headers(&mut self, stream_id: u32, header_block: &[u8], end_stream: bool) {
        debug_assert!(stream_id != 0);
        let first_len = header_block.len().min(self.max_frame_size);
        let (first, mut rest) = header_block.split_at(first_len);
        let mut flags = if end_stream { FLAG_END_STREAM } else { 0 };
        if rest.is_empty() {
            flags |= FLAG_END_HEADERS;
        }
        self.frame_header(first.len(), TYPE_HEADERS, flags, stream_id);
        self.buf.extend_from_slice(first);

        while !rest.is_empty() {
            let chunk_len = rest.len().min(self.max_frame_size);
            let (chunk, remainder) = rest.split_at(chunk_len);
            let flags = if remainder.is_empty() { FLAG_END_HEADERS } else { 0 };
            self.frame_header(chunk.len(), TYPE_CONTINUATION, flags, stream_id);
            self.buf.extend_from_slice(chunk);
            rest = remainder;
        }
    }

    /// PUSH_PROMISE carrying the promised stream id and a header block,
    /// fragmented with CONTINUATION as needed.
    pub fn push_promise(&mut self, stream_id: u32, promised_stream_id: u32, header_block: &[u8]) {
        debug_assert!(stream_id != 0);
        let first_len = header_block.len().min(self.max_frame_size - 4);
        let (first, mut rest) = header_block.split_at(first_len);
        let flags = if rest.is_empty() { FLAG_END_HEADERS } else { 0 };
        self.frame_header(4 + first.len(), TYPE_PUSH_PROMISE, flags, stream_id);
        self.buf.put_u32(promised_stream_id & 0x7fff_ffff);
        self.buf.extend_from_slice(first);

        while !rest.is_empty() {
            let chunk_len = rest.len().min(self.max_frame_size);
            let (chunk, remainder) = rest.split_at(chunk_len);
            let flags = if remainder.is_empty() { FLAG_END_HEADERS } else { 0 };
            self.frame_header(chunk.len(), TYPE_CONTINUATION, flags, stream_id);
            self.buf.extend_from_slice(chunk);
            rest = remainder;
        }
    }

    pub fn rst_stream(&mut self, stream_id: u32, error_code: u32) {
        debug_assert!(stream_id != 0);
        self.frame_header(4, TYPE_RST_STREAM, 0, stream_id);
        self.buf.put_u32(error_code);
    }

    pub fn settings(&mut self, settings: &[(u16, u32)]) {
        self.frame_header(settings.len() * 6, TYPE_SETTINGS, 0, 0);
        for &(id, value) in settings {
            self.buf.put_u16(id);
            self.buf.put_u32(value);
        }
    }

    pub fn settings_ack(&mut self) {
        self.frame_header(0, TYPE_SETTINGS, FLAG_ACK, 0);
    }

    pub fn ping(&mut self, opaque_data: u64, ack: bool) {
        let flags = if ack { FLAG_ACK } else { 0 };
        self.frame_header(8, TYPE_PING, flags, 0);
        self.buf.put_u64(opaque_data);
    }

    pub fn goaway(&mut self, last_stream_id: u32, error_code: u32, debug_data: &[u8]) {
        self.frame_header(8 + debug_data.len(), TYPE_GOAWAY, 0, 0);
        self.buf.put_u32(last_stream_id & 0x7fff_ffff);
        self.buf.put_u32(error_code);
        self.buf.extend_from_slice(debug_data);
    }

    pub fn window_update(&mut self, stream_id: u32, increment: u32) {
        debug_assert!(increment != 0 && increment <= 0x7fff_ffff);
        self.frame_header(4, TYPE_WINDOW_UPDATE, 0, stream_id);
        self.buf.put_u32(increment);
    }

    /// Take the accumulated bytes; the writer stays usable.
    pub fn take_buffer(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::http::h2::{FrameHandler, FrameParser};
    use bytes::BytesMut;

    #[derive(Default)]
    struct Record {
        frames: Vec<(u8, u32, bool, Vec<u8>)>, // (type, stream, end_headers/end_stream, payload)
    }

    impl FrameHandler for Record {
        fn data_frame(&mut self, stream_id: u32, end_stream: bool, data: Bytes, _flow: usize) {
            self.frames.push((TYPE_DATA, stream_id, end_stream, data.to_vec()));
        }
        fn headers_frame(
            &mut self,
            stream_id: u32,
            _end_stream: bool,
            end_headers: bool,
            _dep: u32,
            _excl: bool,
            _weight: u8,
            block: Bytes,
        ) {
            self.frames
                .push((TYPE_HEADERS, stream_id, end_headers, block.to_vec()));
        }
        fn priority_frame(&mut self, _s: u32, _d: u32, _e: bool, _w: u8) {}
        fn rst_stream_frame(&mut self, stream_id: u32, code: u32) {
            self.frames
                .push((TYPE_RST_STREAM, stream_id, false, code.to_be_bytes().to_vec()));
        }
        fn settings_frame(&mut self, ack: bool, settings: Vec<(u16, u32)>) {
            let mut payload = Vec::new();
            for (id, v) in settings {
                payload.extend_from_slice(&id.to_be_bytes());
                payload.extend_from_slice(&v.to_be_bytes());
            }
            self.frames.push((TYPE_SETTINGS, 0, ack, payload));
        }
        fn push_promise_frame(&mut self, s: u32, p: u32, e: bool, b: Bytes) {
            let mut payload = p.to_be_bytes().to_vec();
            payload.extend_from_slice(&b);
            self.frames.push((TYPE_PUSH_PROMISE, s, e, payload));
        }
        fn ping_frame(&mut self, ack: bool, opaque: u64) {
            self.frames
                .push((TYPE_PING, 0, ack, opaque.to_be_bytes().to_vec()));
        }
        fn goaway_frame(&mut self, last: u32, code: u32, _d: Bytes) {
            let mut payload = last.to_be_bytes().to_vec();
            payload.extend_from_slice(&code.to_be_bytes());
            self.frames.push((TYPE_GOAWAY, 0, false, payload));
        }
        fn window_update_frame(&mut self, stream_id: u32, increment: u32) {
            self.frames.push((
                TYPE_WINDOW_UPDATE,
                stream_id,
                false,
                increment.to_be_bytes().to_vec(),
            ));
        }
        fn continuation_frame(&mut self, stream_id: u32, end_headers: bool, block: Bytes) {
            self.frames
                .push((TYPE_CONTINUATION, stream_id, end_headers, block.to_vec()));
        }
        fn frame_error(&mut self, code: u32, stream_id: u32, message: String) {
            panic!("frame error {} on {}: {}", code, stream_id, message);
        }
    }

    fn parse_all(bytes: Bytes) -> Record {
        let mut buf = BytesMut::from(&bytes[..]);
        let mut record = Record::default();
        FrameParser::new().receive(&mut buf, &mut record).unwrap();
        assert!(buf.is_empty());
        record
    }

    #[test]
    fn data_roundtrip() {
        let mut writer = FrameWriter::new();
        writer.data(3, b"payload", true);
        let record = parse_all(writer.take_buffer());
        assert_eq!(record.frames, vec![(TYPE_DATA, 3, true, b"payload".to_vec())]);
    }

    #[test]
    fn short_header_block_is_single_headers_frame() {
        let mut writer = FrameWriter::new();
        writer.headers(1, b"block", true);
        let record = parse_all(writer.take_buffer());
        assert_eq!(record.frames.len(), 1);
        assert_eq!(record.frames[0].0, TYPE_HEADERS);
        assert!(record.frames[0].2, "END_HEADERS must be set");
    }

    #[test]
    fn long_header_block_fragments_into_continuations() {
        let mut writer = FrameWriter::new();
        let block = vec![0xaau8; DEFAULT_MAX_FRAME_SIZE * 2 + 100];
        writer.headers(1, &block, false);
        let record = parse_all(writer.take_buffer());
        assert_eq!(record.frames.len(), 3);
        assert_eq!(record.frames[0].0, TYPE_HEADERS);
        assert!(!record.frames[0].2);
        assert_eq!(record.frames[1].0, TYPE_CONTINUATION);
        assert!(!record.frames[1].2);
        assert_eq!(record.frames[2].0, TYPE_CONTINUATION);
        assert!(record.frames[2].2, "final CONTINUATION carries END_HEADERS");
        let total: usize = record.frames.iter().map(|f| f.3.len()).sum();
        assert_eq!(total, block.len());
    }

    #[test]
    fn settings_and_ack() {
        let mut writer = FrameWriter::new();
        writer.settings(&[(SETTINGS_MAX_CONCURRENT_STREAMS, 100)]);
        writer.settings_ack();
        let record = parse_all(writer.take_buffer());
        assert_eq!(record.frames.len(), 2);
        assert!(!record.frames[0].2);
        assert!(record.frames[1].2);
    }

    #[test]
    fn goaway_carries_last_stream_and_code() {
        let mut writer = FrameWriter::new();
        writer.goaway(9, ERROR_PROTOCOL_ERROR, b"");
        let record = parse_all(writer.take_buffer());
        assert_eq!(record.frames[0].0, TYPE_GOAWAY);
        assert_eq!(&record.frames[0].3[..4], &9u32.to_be_bytes());
        assert_eq!(&record.frames[0].3[4..8], &ERROR_PROTOCOL_ERROR.to_be_bytes());
    }

    #[test]
    fn window_update_roundtrip() {
        let mut writer = FrameWriter::new();
        writer.window_update(0, 65535);
        writer.window_update(5, 1024);
        let record = parse_all(writer.take_buffer());
        assert_eq!(record.frames[0].1, 0);
        assert_eq!(record.frames[1].1, 5);
    }
}
