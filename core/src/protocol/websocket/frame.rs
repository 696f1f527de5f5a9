/*
 * frame.rs
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

//! WebSocket frame format (RFC 6455 §5) for both roles: the parser
//! enforces the masking rule for its role (client frames masked, server
//! frames not), 7/16/64-bit lengths, and control-frame constraints.

use bytes::{Buf, BufMut, BytesMut};
use std::io;

// Opcodes
pub const OP_CONTINUATION: u8 = 0;
pub const OP_TEXT: u8 = 1;
pub const OP_BINARY: u8 = 2;
pub const OP_CLOSE: u8 = 8;
pub const OP_PING: u8 = 9;
pub const OP_PONG: u8 = 10;

/// Max payload length accepted for a single data frame. Control frames
/// are capped at 125 by the protocol.
pub const MAX_FRAME_PAYLOAD: usize = 65536;

/// Callback for completed frames (payload already unmasked).
pub trait FrameEvents {
    fn frame(&mut self, opcode: u8, fin: bool, data: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Header,
    ExtendedLen2,
    ExtendedLen8,
    MaskKey,
    Payload,
}

/// Push parser for WebSocket frames.
pub struct FrameParser {
    /// Server role: incoming frames must be masked. Client role: must not.
    expect_masked: bool,
    state: FrameState,
    opcode: u8,
    fin: bool,
    masked: bool,
    mask_key: [u8; 4],
    payload_len: u64,
}

fn bad(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl FrameParser {
    pub fn new(expect_masked: bool) -> Self {
        Self {
            expect_masked,
            state: FrameState::Header,
            opcode: 0,
            fin: false,
            masked: false,
            mask_key: [0; 4],
            payload_len: 0,
        }
    }

    fn is_control(&self) -> bool {
        self.opcode >= OP_CLOSE
    }

    fn check_length(&self) -> Result<(), io::Error> {
        if self.is_control() {
            if self.payload_len > 125 {
                return Err(bad("control frame payload over 125 bytes"));
            }
            if !self.fin {
                return Err(bad("fragmented control frame"));
            }
        } else if self.payload_len > MAX_FRAME_PAYLOAD as u64 {
            return Err(bad("data frame payload too long"));
        }
        Ok(())
    }

    /// Feed stream bytes; fires the handler per complete frame. Partial
    /// frames stay in the buffer.
    pub fn receive<H: FrameEvents>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), io::Error> {
        loop {
            match self.state {
                FrameState::Header => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    let b0 = buf.get_u8();
                    let b1 = buf.get_u8();
                    if (b0 & 0x70) != 0 {
                        return Err(bad("RSV bits set without negotiated extension"));
                    }
                    self.fin = (b0 & 0x80) != 0;
                    self.opcode = b0 & 0x0f;
                    if !matches!(
                        self.opcode,
                        OP_CONTINUATION | OP_TEXT | OP_BINARY | OP_CLOSE | OP_PING | OP_PONG
                    ) {
                        return Err(bad("reserved opcode"));
                    }
                    self.masked = (b1 & 0x80) != 0;
                    if self.masked != self.expect_masked {
                        return Err(if self.expect_masked {
                            bad("client frame not masked")
                        } else {
                            bad("server frame masked")
                        });
                    }
                    match b1 & 0x7f {
                        126 => self.state = FrameState::ExtendedLen2,
                        127 => self.state = FrameState::ExtendedLen8,
                        len => {
                            self.payload_len = len as u64;
                            self.check_length()?;
                            self.state = if self.masked {
                                FrameState::MaskKey
                            } else {
                                FrameState::Payload
                            };
                        }
                    }
                }
                FrameState::ExtendedLen2 => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    self.payload_len = buf.get_u16() as u64;
                    self.check_length()?;
                    self.state = if self.masked {
                        FrameState::MaskKey
                    } else {
                        FrameState::Payload
                    };
                }
                FrameState::ExtendedLen8 => {
                    if buf.len() < 8 {
                        return Ok(());
                    }
                    self.payload_len = buf.get_u64();
                    self.check_length()?;
                    self.state = if self.masked {
                        FrameState::MaskKey
                    } else {
                        FrameState::Payload
                    };
                }
                FrameState::MaskKey => {
                    if buf.len() < 4 {
                        return Ok(());
                    }
                    buf.copy_to_slice(&mut self.mask_key);
                    self.state = FrameState::Payload;
                }
                FrameState::Payload => {
                    let need = self.payload_len as usize;
                    if buf.len() < need {
                        return Ok(());
                    }
                    let mut payload = buf.split_to(need);
                    if self.masked {
                        for (i, byte) in payload.iter_mut().enumerate() {
                            *byte ^= self.mask_key[i % 4];
                        }
                    }
                    handler.frame(self.opcode, self.fin, &payload);
                    self.state = FrameState::Header;
                }
            }
        }
    }
}

/// Serialize one frame. Masking (client role) uses the given key; servers
/// pass None.
pub fn encode_frame(
    opcode: u8,
    fin: bool,
    payload: &[u8],
    mask_key: Option<[u8; 4]>,
    out: &mut BytesMut,
) {
    let fin_bit = if fin { 0x80 } else { 0 };
    out.put_u8(fin_bit | (opcode & 0x0f));
    let mask_bit = if mask_key.is_some() { 0x80 } else { 0 };
    let len = payload.len();
    if len < 126 {
        out.put_u8(mask_bit | len as u8);
    } else if len < 65536 {
        out.put_u8(mask_bit | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(len as u64);
    }
    match mask_key {
        Some(key) => {
            out.put_slice(&key);
            for (i, &byte) in payload.iter().enumerate() {
                out.put_u8(byte ^ key[i % 4]);
            }
        }
        None => out.put_slice(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        frames: Vec<(u8, bool, Vec<u8>)>,
    }

    impl FrameEvents for Collect {
        fn frame(&mut self, opcode: u8, fin: bool, data: &[u8]) {
            self.frames.push((opcode, fin, data.to_vec()));
        }
    }

    #[test]
    fn masked_client_frame_roundtrip() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, true, b"Hello", Some([0x37, 0xfa, 0x21, 0x3d]), &mut wire);
        // RFC 6455 §5.7 single-frame masked text example.
        assert_eq!(
            &wire[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );

        let mut parser = FrameParser::new(true);
        let mut collect = Collect::default();
        parser.receive(&mut wire, &mut collect).unwrap();
        assert_eq!(collect.frames, vec![(OP_TEXT, true, b"Hello".to_vec())]);
    }

    #[test]
    fn unmasked_server_frame_roundtrip() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, true, b"Hello", None, &mut wire);
        assert_eq!(&wire[..], &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);

        let mut parser = FrameParser::new(false);
        let mut collect = Collect::default();
        parser.receive(&mut wire, &mut collect).unwrap();
        assert_eq!(collect.frames, vec![(OP_TEXT, true, b"Hello".to_vec())]);
    }

    #[test]
    fn server_rejects_unmasked_client_frame() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, true, b"x", None, &mut wire);
        let mut parser = FrameParser::new(true);
        let mut collect = Collect::default();
        assert!(parser.receive(&mut wire, &mut collect).is_err());
    }

    #[test]
    fn sixteen_bit_length() {
        let payload = vec![0xabu8; 300];
        let mut wire = BytesMut::new();
        encode_frame(OP_BINARY, true, &payload, Some([1, 2, 3, 4]), &mut wire);
        assert_eq!(wire[1] & 0x7f, 126);

        let mut parser = FrameParser::new(true);
        let mut collect = Collect::default();
        parser.receive(&mut wire, &mut collect).unwrap();
        assert_eq!(collect.frames[0].2, payload);
    }

    #[test]
    fn frame_split_across_deliveries() {
        let mut wire = BytesMut::new();
        encode_frame(OP_PING, true, b"ka", Some([9, 9, 9, 9]), &mut wire);
        let wire = wire.freeze();

        let mut parser = FrameParser::new(true);
        let mut collect = Collect::default();
        let mut buf = BytesMut::new();
        for &byte in wire.iter() {
            buf.put_u8(byte);
            parser.receive(&mut buf, &mut collect).unwrap();
        }
        assert_eq!(collect.frames, vec![(OP_PING, true, b"ka".to_vec())]);
    }

    #[test]
    fn oversized_control_frame_rejected() {
        let payload = vec![0u8; 126];
        let mut wire = BytesMut::new();
        encode_frame(OP_PING, true, &payload, Some([0, 0, 0, 0]), &mut wire);
        let mut parser = FrameParser::new(true);
        let mut collect = Collect::default();
        assert!(parser.receive(&mut wire, &mut collect).is_err());
    }

    #[test]
    fn fragmented_control_frame_rejected() {
        let mut wire = BytesMut::new();
        encode_frame(OP_PING, false, b"x", Some([0, 0, 0, 0]), &mut wire);
        let mut parser = FrameParser::new(true);
        let mut collect = Collect::default();
        assert!(parser.receive(&mut wire, &mut collect).is_err());
    }

    #[test]
    fn rsv_bits_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u8(0xc1); // FIN + RSV1 + text
        wire.put_u8(0x80); // masked, len 0
        wire.put_slice(&[0, 0, 0, 0]);
        let mut parser = FrameParser::new(true);
        let mut collect = Collect::default();
        assert!(parser.receive(&mut wire, &mut collect).is_err());
    }
}
