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

//! One connection as the reactor sees it: the socket, optional TLS pump,
//! the active protocol handler, and the inbound buffer whose unconsumed
//! suffix survives between deliveries. Interest is recomputed after every
//! round of work: always readable, writable while output is pending.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use log::{debug, trace};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use super::endpoint::Endpoint;
use super::tls::TlsPump;
use crate::protocol::handler::ProtocolHandler;

const READ_CHUNK: usize = 16 * 1024;

pub(crate) struct Connection {
    socket: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsPump>,
    handler: Box<dyn ProtocolHandler>,
    endpoint: Endpoint,
    inbound: BytesMut,
    registered_interest: Option<Interest>,
    peer_eof: bool,
    /// Output has drained and the transport should be torn down.
    done: bool,
    /// Run the handler's send_ready after the next drain (socket became
    /// writable again).
    send_ready_hint: bool,
    disconnect_notified: bool,
}

impl Connection {
    pub(crate) fn new(
        socket: TcpStream,
        peer: SocketAddr,
        tls: Option<TlsPump>,
        handler: Box<dyn ProtocolHandler>,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            socket,
            peer,
            tls,
            handler,
            endpoint,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            registered_interest: None,
            peer_eof: false,
            done: false,
            send_ready_hint: false,
            disconnect_notified: false,
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn register(&mut self, registry: &Registry, token: usize) -> io::Result<()> {
        let interest = self.desired_interest();
        registry.register(&mut self.socket, Token(token), interest)?;
        self.registered_interest = Some(interest);
        Ok(())
    }

    /// First callback after registration.
    pub(crate) fn start(&mut self) {
        self.handler.connected(&self.endpoint);
        self.apply_pending_upgrade();
    }

    /// Socket readable: pull bytes (through the TLS pump when secure),
    /// deliver plaintext to the handler.
    pub(crate) fn on_readable(&mut self) -> io::Result<()> {
        let mut got_data = false;
        if let Some(tls) = self.tls.as_mut() {
            let outcome = tls.read(&mut self.socket, &mut self.inbound)?;
            if outcome.handshake_complete {
                let info = tls.security_info();
                trace!("{}: TLS established: {:?}", self.peer, info);
                self.handler.security_established(&info);
                self.apply_pending_upgrade();
            }
            got_data = outcome.plaintext > 0;
            if outcome.eof {
                self.peer_eof = true;
            }
        } else {
            let mut tmp = [0u8; READ_CHUNK];
            loop {
                match self.socket.read(&mut tmp) {
                    Ok(0) => {
                        self.peer_eof = true;
                        break;
                    }
                    Ok(n) => {
                        self.inbound.extend_from_slice(&tmp[..n]);
                        got_data = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        if got_data {
            self.deliver();
        }
        if self.peer_eof {
            trace!("{}: peer closed", self.peer);
            // Let the handler serialize anything already complete before
            // the flush-and-close in drain_output.
            self.send_ready_hint = true;
        }
        Ok(())
    }

    /// Hand buffered plaintext to the handler; re-deliver to a swapped-in
    /// handler until the buffer is consumed or nobody makes progress.
    fn deliver(&mut self) {
        loop {
            if !self.inbound.is_empty() {
                self.handler.receive(&mut self.inbound);
            }
            if self.apply_pending_upgrade() && !self.inbound.is_empty() {
                continue;
            }
            return;
        }
    }

    /// Swap in a pending upgrade handler, if any. The new handler gets its
    /// `connected` callback; leftover inbound bytes flow to it on the next
    /// delivery loop iteration.
    pub(crate) fn apply_pending_upgrade(&mut self) -> bool {
        match self.endpoint.take_upgrade() {
            Some(handler) => {
                trace!("{}: protocol handler swapped", self.peer);
                self.handler = handler;
                self.handler.connected(&self.endpoint);
                true
            }
            None => false,
        }
    }

    pub(crate) fn socket_writable(&mut self) {
        self.send_ready_hint = true;
    }

    pub(crate) fn handler_send_ready(&mut self) {
        self.handler.send_ready();
    }

    pub(crate) fn timer_expired(&mut self, kind: u64) {
        self.handler.timer_expired(kind);
    }

    pub(crate) fn transport_error(&mut self, error: &io::Error) {
        self.handler.error(error);
    }

    /// Move queued output toward the socket. Figures out when the
    /// connection is finished: close requested (or peer EOF) and
    /// everything flushed.
    pub(crate) fn drain_output(&mut self) -> io::Result<()> {
        self.write_queue()?;
        if self.send_ready_hint && !self.endpoint.send_blocked() {
            self.send_ready_hint = false;
            self.handler.send_ready();
            self.write_queue()?;
        }
        let closing = self.endpoint.close_requested() || self.peer_eof;
        if closing && !self.endpoint.has_output() {
            if let Some(tls) = self.tls.as_mut() {
                tls.send_close_notify();
                tls.write_socket(&mut self.socket)?;
                if !tls.wants_write() {
                    self.done = true;
                }
            } else {
                self.done = true;
            }
        }
        Ok(())
    }

    fn write_queue(&mut self) -> io::Result<()> {
        if let Some(tls) = self.tls.as_mut() {
            while let Some(mut buf) = self.endpoint.pop_output() {
                let n = tls.write_plaintext(&buf)?;
                self.endpoint.consumed_output(n);
                if n < buf.len() {
                    buf.advance(n);
                    self.endpoint.unpop_output(buf);
                    break;
                }
            }
            tls.write_socket(&mut self.socket)?;
        } else {
            while let Some(mut buf) = self.endpoint.pop_output() {
                match self.socket.write(&buf) {
                    Ok(n) => {
                        self.endpoint.consumed_output(n);
                        if n < buf.len() {
                            buf.advance(n);
                            self.endpoint.unpop_output(buf);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.endpoint.unpop_output(buf);
                        break;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        self.endpoint.unpop_output(buf);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    pub(crate) fn finished(&self) -> bool {
        self.done
    }

    /// TLS handshake still in progress (always false on plain sockets).
    pub(crate) fn is_handshaking(&self) -> bool {
        self.tls.as_ref().map_or(false, |t| t.is_handshaking())
    }

    /// Interest for the current state: reads always (to observe peer
    /// close), writes while output is pending.
    fn desired_interest(&self) -> Interest {
        let mut interest = Interest::READABLE;
        let wants_write =
            self.endpoint.has_output() || self.tls.as_ref().map_or(false, |t| t.wants_write());
        if wants_write {
            interest |= Interest::WRITABLE;
        }
        interest
    }

    pub(crate) fn update_interest(&mut self, registry: &Registry, token: usize) -> io::Result<()> {
        let desired = self.desired_interest();
        if self.registered_interest != Some(desired) {
            registry.reregister(&mut self.socket, Token(token), desired)?;
            self.registered_interest = Some(desired);
        }
        Ok(())
    }

    /// Tear down: deregister, shut the socket, notify the handler once.
    pub(crate) fn shutdown(&mut self, registry: &Registry) {
        self.endpoint.mark_cancelled();
        let _ = registry.deregister(&mut self.socket);
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
        if !self.disconnect_notified {
            self.disconnect_notified = true;
            debug!("{}: disconnected", self.peer);
            self.handler.disconnected();
        }
    }

    /// Teardown path for a connection that never made it into the slab.
    pub(crate) fn abort_without_registration(&mut self) {
        self.endpoint.mark_cancelled();
        if !self.disconnect_notified {
            self.disconnect_notified = true;
            self.handler.disconnected();
        }
    }
}
