/*
 * tls.rs
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

//! TLS record pump between the raw socket and the handler's plaintext
//! stream, on top of a rustls ServerConnection. The readable side reads
//! ciphertext, processes records, and appends plaintext to the
//! connection's inbound buffer; the writable side moves queued plaintext
//! into the session and flushes records out. Handshake driving falls out
//! of wants_read/wants_write. The server's TLS material arrives from
//! outside as an Arc<rustls::ServerConfig>.

use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::BytesMut;
use mio::net::TcpStream;
use rustls::{ServerConfig, ServerConnection};

use crate::protocol::handler::SecurityInfo;

/// Cap on plaintext buffered inside the session awaiting wrap; sends
/// beyond it stay on the endpoint queue until records drain.
const SESSION_BUFFER_LIMIT: usize = 64 * 1024;

pub(crate) struct ReadOutcome {
    /// Plaintext bytes appended to the inbound buffer.
    pub plaintext: usize,
    /// Peer sent EOF or close_notify.
    pub eof: bool,
    /// The handshake completed during this read.
    pub handshake_complete: bool,
}

pub(crate) struct TlsPump {
    session: ServerConnection,
    handshake_reported: bool,
    close_notify_sent: bool,
}

impl TlsPump {
    pub fn new(config: Arc<ServerConfig>) -> io::Result<Self> {
        let mut session = ServerConnection::new(config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        session.set_buffer_limit(Some(SESSION_BUFFER_LIMIT));
        Ok(Self {
            session,
            handshake_reported: false,
            close_notify_sent: false,
        })
    }

    /// Pull ciphertext from the socket, process records, append plaintext
    /// to `out`. Unconsumed plaintext already in `out` is untouched, so
    /// the handler's underflow contract holds across TLS too.
    pub fn read(&mut self, socket: &mut TcpStream, out: &mut BytesMut) -> io::Result<ReadOutcome> {
        let mut outcome = ReadOutcome {
            plaintext: 0,
            eof: false,
            handshake_complete: false,
        };
        loop {
            match self.session.read_tls(socket) {
                Ok(0) => {
                    outcome.eof = true;
                    break;
                }
                Ok(_) => {
                    let state = match self.session.process_new_packets() {
                        Ok(state) => state,
                        Err(e) => {
                            // Best effort: flush the alert before failing.
                            let _ = self.session.write_tls(socket);
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                e.to_string(),
                            ));
                        }
                    };
                    let pending = state.plaintext_bytes_to_read();
                    if pending > 0 {
                        let start = out.len();
                        out.resize(start + pending, 0);
                        self.session.reader().read_exact(&mut out[start..])?;
                        outcome.plaintext += pending;
                    }
                    if state.peer_has_closed() {
                        outcome.eof = true;
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if !self.session.is_handshaking() && !self.handshake_reported {
            self.handshake_reported = true;
            outcome.handshake_complete = true;
        }
        Ok(outcome)
    }

    /// Buffer plaintext into the session for wrapping. Returns how many
    /// bytes the session accepted; the rest stays queued upstream.
    pub fn write_plaintext(&mut self, data: &[u8]) -> io::Result<usize> {
        self.session.writer().write(data)
    }

    /// Flush wrapped records to the socket until it would block.
    pub fn write_socket(&mut self, socket: &mut TcpStream) -> io::Result<()> {
        while self.session.wants_write() {
            match self.session.write_tls(socket) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Queue close_notify (once).
    pub fn send_close_notify(&mut self) {
        if !self.close_notify_sent {
            self.close_notify_sent = true;
            self.session.send_close_notify();
        }
    }

    pub fn wants_write(&self) -> bool {
        self.session.wants_write()
    }

    pub fn is_handshaking(&self) -> bool {
        self.session.is_handshaking()
    }

    /// Session parameters for `security_established`. Valid once the
    /// handshake is done.
    pub fn security_info(&self) -> SecurityInfo {
        let protocol = self
            .session
            .protocol_version()
            .map(|v| format!("{:?}", v))
            .unwrap_or_else(|| "unknown".to_string());
        let cipher_suite = self
            .session
            .negotiated_cipher_suite()
            .map(|s| format!("{:?}", s.suite()))
            .unwrap_or_else(|| "unknown".to_string());
        let alpn = self
            .session
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned());
        SecurityInfo {
            protocol,
            cipher_suite,
            alpn,
        }
    }
}
