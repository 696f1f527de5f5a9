/*
 * connection.rs
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

//! WebSocket connection handler, swapped in after a successful 101.
//! Reassembles fragmented messages (one in flight per direction), answers
//! pings, echoes close frames, and hands complete messages to the
//! application's WebSocketHandler.

use bytes::{Bytes, BytesMut};
use log::{debug, trace};

use super::frame::{
    encode_frame, FrameEvents, FrameParser, OP_BINARY, OP_CLOSE, OP_CONTINUATION, OP_PING,
    OP_PONG, OP_TEXT,
};
use super::WebSocketHandler;
use crate::protocol::handler::ProtocolHandler;
use crate::reactor::Endpoint;

/// Cap on a reassembled message (sum of fragment payloads).
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Status codes used by the connection itself.
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_INVALID_DATA: u16 = 1007;
const CLOSE_TOO_BIG: u16 = 1009;

/// Thread-safe sending half handed to the application handler. Server
/// frames are never masked.
#[derive(Clone)]
pub struct WsSender {
    endpoint: Endpoint,
}

impl WsSender {
    pub fn send_text(&self, data: &str) {
        self.send_frame(OP_TEXT, data.as_bytes());
    }

    pub fn send_binary(&self, data: &[u8]) {
        self.send_frame(OP_BINARY, data);
    }

    pub fn send_ping(&self, data: &[u8]) {
        self.send_frame(OP_PING, &data[..data.len().min(125)]);
    }

    pub fn send_close(&self, code: u16, reason: &str) {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(&reason.as_bytes()[..reason.len().min(123)]);
        self.send_frame(OP_CLOSE, &payload);
        self.endpoint.close();
    }

    fn send_frame(&self, opcode: u8, payload: &[u8]) {
        let mut out = BytesMut::with_capacity(payload.len() + 10);
        encode_frame(opcode, true, payload, None, &mut out);
        self.endpoint.send(out.freeze());
    }
}

enum WsEvent {
    Frame { opcode: u8, fin: bool, data: Bytes },
}

#[derive(Default)]
struct CollectFrames(Vec<WsEvent>);

impl FrameEvents for CollectFrames {
    fn frame(&mut self, opcode: u8, fin: bool, data: &[u8]) {
        self.0.push(WsEvent::Frame {
            opcode,
            fin,
            data: Bytes::copy_from_slice(data),
        });
    }
}

/// ProtocolHandler for the post-upgrade WebSocket phase.
pub struct WsConnection {
    endpoint: Option<Endpoint>,
    parser: FrameParser,
    handler: Box<dyn WebSocketHandler>,
    /// Opcode of the fragmented message being assembled.
    fragment_opcode: Option<u8>,
    fragments: BytesMut,
    close_sent: bool,
    close_notified: bool,
}

impl WsConnection {
    pub fn new(handler: Box<dyn WebSocketHandler>) -> Self {
        Self {
            endpoint: None,
            // Client-to-server frames must be masked.
            parser: FrameParser::new(true),
            handler,
            fragment_opcode: None,
            fragments: BytesMut::new(),
            close_sent: false,
            close_notified: false,
        }
    }

    fn sender(&self) -> WsSender {
        WsSender {
            endpoint: self.endpoint.clone().expect("endpoint set in connected"),
        }
    }

    fn fail(&mut self, code: u16, reason: &str) {
        debug!("websocket failing: {} {}", code, reason);
        if !self.close_sent {
            self.close_sent = true;
            self.sender().send_close(code, reason);
        }
        if !self.close_notified {
            self.close_notified = true;
            self.handler.closed(Some(code), reason);
        }
    }

    fn deliver_message(&mut self, opcode: u8, data: &[u8]) {
        match opcode {
            OP_TEXT => match std::str::from_utf8(data) {
                Ok(text) => self.handler.text_message(text),
                Err(_) => self.fail(CLOSE_INVALID_DATA, "text message not UTF-8"),
            },
            OP_BINARY => self.handler.binary_message(data),
            _ => {}
        }
    }

    fn on_frame(&mut self, opcode: u8, fin: bool, data: Bytes) {
        match opcode {
            OP_TEXT | OP_BINARY => {
                if self.fragment_opcode.is_some() {
                    self.fail(CLOSE_PROTOCOL_ERROR, "new message inside fragmented message");
                    return;
                }
                if fin {
                    self.deliver_message(opcode, &data);
                } else {
                    self.fragment_opcode = Some(opcode);
                    self.fragments.clear();
                    self.fragments.extend_from_slice(&data);
                }
            }
            OP_CONTINUATION => {
                let Some(message_opcode) = self.fragment_opcode else {
                    self.fail(CLOSE_PROTOCOL_ERROR, "continuation without message");
                    return;
                };
                if self.fragments.len() + data.len() > MAX_MESSAGE_SIZE {
                    self.fail(CLOSE_TOO_BIG, "message too large");
                    return;
                }
                self.fragments.extend_from_slice(&data);
                if fin {
                    self.fragment_opcode = None;
                    let message = self.fragments.split().freeze();
                    self.deliver_message(message_opcode, &message);
                }
            }
            OP_PING => {
                trace!("websocket ping, {} bytes", data.len());
                self.handler.ping(&data);
                if !self.close_sent {
                    let mut out = BytesMut::with_capacity(data.len() + 4);
                    encode_frame(OP_PONG, true, &data, None, &mut out);
                    self.endpoint.as_ref().unwrap().send(out.freeze());
                }
            }
            OP_PONG => self.handler.pong(&data),
            OP_CLOSE => {
                let (code, reason) = if data.len() >= 2 {
                    let code = u16::from_be_bytes([data[0], data[1]]);
                    let reason = String::from_utf8_lossy(&data[2..]).into_owned();
                    (Some(code), reason)
                } else {
                    (None, String::new())
                };
                // Echo the peer's code (1000 when it sent none), flush,
                // close the transport.
                if !self.close_sent {
                    self.close_sent = true;
                    self.sender()
                        .send_close(code.unwrap_or(CLOSE_NORMAL), "");
                }
                if !self.close_notified {
                    self.close_notified = true;
                    self.handler.closed(code, &reason);
                }
                self.endpoint.as_ref().unwrap().close();
            }
            _ => {}
        }
    }
}

impl ProtocolHandler for WsConnection {
    fn connected(&mut self, endpoint: &Endpoint) {
        self.endpoint = Some(endpoint.clone());
        let sender = self.sender();
        self.handler.connected(&sender);
    }

    fn receive(&mut self, buf: &mut BytesMut) {
        let mut collect = CollectFrames::default();
        if let Err(e) = self.parser.receive(buf, &mut collect) {
            buf.clear();
            self.fail(CLOSE_PROTOCOL_ERROR, &e.to_string());
            return;
        }
        for event in collect.0 {
            let WsEvent::Frame { opcode, fin, data } = event;
            self.on_frame(opcode, fin, data);
            if self.close_sent {
                break;
            }
        }
    }

    fn disconnected(&mut self) {
        if !self.close_notified {
            self.close_notified = true;
            self.handler.closed(None, "");
        }
    }
}
