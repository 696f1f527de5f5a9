/*
 * endpoint.rs
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

//! Endpoint: the capability a protocol handler holds on its connection.
//! Send is safe from any thread; it enqueues onto the connection's
//! outbound FIFO and wakes the owning worker. Everything else the handler
//! does with the connection also funnels through here: closing, swapping
//! the protocol handler on upgrade, scheduling timers.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use log::warn;

use super::timer::{TimerHandle, TimerService};
use super::worker::WorkerHandle;
use crate::protocol::handler::ProtocolHandler;

/// Soft high-water mark on queued output. Handlers should stop producing
/// above it and resume on `send_ready`.
pub const SEND_HIGH_WATER: usize = 256 * 1024;
/// Hard cap on queued output; a connection exceeding it is aborted.
pub const SEND_HARD_LIMIT: usize = 4 * 1024 * 1024;

struct Outbound {
    queue: VecDeque<Bytes>,
    close_after_flush: bool,
    upgrade: Option<Box<dyn ProtocolHandler>>,
}

struct Shared {
    worker: WorkerHandle,
    timer: Arc<TimerService>,
    peer: SocketAddr,
    secure: bool,
    token: AtomicUsize,
    outbound: Mutex<Outbound>,
    queued: AtomicUsize,
    cancelled: AtomicBool,
    pump_pending: AtomicBool,
}

/// Handle to one connection. Clones share state; all clones become inert
/// once the connection closes.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

impl Endpoint {
    pub(crate) fn new(
        worker: WorkerHandle,
        timer: Arc<TimerService>,
        peer: SocketAddr,
        secure: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                worker,
                timer,
                peer,
                secure,
                token: AtomicUsize::new(usize::MAX),
                outbound: Mutex::new(Outbound {
                    queue: VecDeque::new(),
                    close_after_flush: false,
                    upgrade: None,
                }),
                queued: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                pump_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Queue bytes for transmission, in FIFO order with all other sends on
    /// this connection. Safe from any thread. Data queued after `close` or
    /// after the connection went away is discarded.
    pub fn send(&self, data: Bytes) {
        if data.is_empty() || self.shared.cancelled.load(Ordering::Relaxed) {
            return;
        }
        let len = data.len();
        {
            let mut outbound = self.shared.outbound.lock().unwrap();
            if outbound.close_after_flush {
                return;
            }
            outbound.queue.push_back(data);
            self.shared.queued.fetch_add(len, Ordering::Relaxed);
        }
        if self.shared.queued.load(Ordering::Relaxed) > SEND_HARD_LIMIT {
            warn!("{}: outbound queue over hard limit, aborting", self.shared.peer);
            self.abort();
            return;
        }
        self.schedule_pump();
    }

    /// Flush queued output, then close the connection gracefully.
    pub fn close(&self) {
        self.shared.outbound.lock().unwrap().close_after_flush = true;
        self.schedule_pump();
    }

    /// Drop the connection without flushing.
    pub fn abort(&self) {
        if self.shared.cancelled.swap(true, Ordering::Relaxed) {
            return;
        }
        let token = self.shared.token.load(Ordering::Relaxed);
        self.shared
            .worker
            .submit(Box::new(move |state| state.drop_connection(token)));
    }

    /// Swap the connection's protocol handler. Applied on the owning
    /// worker after the current callback returns; unconsumed inbound bytes
    /// are delivered to the new handler.
    pub fn upgrade(&self, handler: Box<dyn ProtocolHandler>) {
        self.shared.outbound.lock().unwrap().upgrade = Some(handler);
        self.schedule_pump();
    }

    /// Ask the worker to call the handler's `send_ready` soon. Safe from
    /// any thread; used when application code completes a response.
    pub fn notify_send_ready(&self) {
        self.schedule_pump();
    }

    /// Bytes currently queued and not yet written to the transport.
    pub fn queued_bytes(&self) -> usize {
        self.shared.queued.load(Ordering::Relaxed)
    }

    /// True once the queue is at or above the soft high-water mark.
    pub fn send_blocked(&self) -> bool {
        self.queued_bytes() >= SEND_HIGH_WATER
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn is_secure(&self) -> bool {
        self.shared.secure
    }

    /// True when the connection is gone or an abort is in flight.
    pub fn is_closed(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    /// Run `timer_expired(kind)` on this connection's handler after
    /// `delay`, unless cancelled first.
    pub fn schedule_timer(&self, kind: u64, delay: Duration) -> TimerHandle {
        let endpoint = self.clone();
        self.shared.timer.schedule(
            delay,
            self.shared.worker.clone(),
            Box::new(move |state| {
                // Guards against slab token reuse after this connection
                // went away.
                if endpoint.is_closed() {
                    return;
                }
                let token = endpoint.shared.token.load(Ordering::Relaxed);
                state.timer_fired(token, kind);
            }),
        )
    }

    fn schedule_pump(&self) {
        if self.shared.cancelled.load(Ordering::Relaxed) {
            return;
        }
        if self.shared.pump_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let token = self.shared.token.load(Ordering::Relaxed);
        let endpoint = self.clone();
        self.shared.worker.submit(Box::new(move |state| {
            // Token may have been assigned after this task was queued.
            let token = if token == usize::MAX {
                endpoint.shared.token.load(Ordering::Relaxed)
            } else {
                token
            };
            state.pump(token);
        }));
    }

    // Reactor-internal surface.

    pub(crate) fn set_token(&self, token: usize) {
        self.shared.token.store(token, Ordering::Relaxed);
    }

    pub(crate) fn token(&self) -> usize {
        self.shared.token.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_pump_pending(&self) {
        self.shared.pump_pending.store(false, Ordering::Release);
    }

    pub(crate) fn mark_cancelled(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
    }

    pub(crate) fn take_upgrade(&self) -> Option<Box<dyn ProtocolHandler>> {
        self.shared.outbound.lock().unwrap().upgrade.take()
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.shared.outbound.lock().unwrap().close_after_flush
    }

    pub(crate) fn pop_output(&self) -> Option<Bytes> {
        self.shared.outbound.lock().unwrap().queue.pop_front()
    }

    /// Return the unwritten tail of a partially written buffer to the head
    /// of the queue.
    pub(crate) fn unpop_output(&self, rest: Bytes) {
        self.shared.outbound.lock().unwrap().queue.push_front(rest);
    }

    pub(crate) fn consumed_output(&self, n: usize) {
        self.shared.queued.fetch_sub(n, Ordering::Relaxed);
    }

    pub(crate) fn has_output(&self) -> bool {
        self.shared.queued.load(Ordering::Relaxed) > 0
    }
}
