/*
 * worker.rs
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

//! Worker thread: one selector, the connections it owns, and a task queue
//! for cross-thread submissions. A connection's handler callbacks all run
//! here; other threads talk to a worker only by submitting tasks, which
//! wake the selector.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, trace, warn};
use mio::{Events, Poll, Registry, Token, Waker};
use slab::Slab;

use super::connection::Connection;

/// Token reserved for the selector waker; connection tokens are slab keys.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// A unit of work executed on a worker thread with access to its state.
pub type Task = Box<dyn FnOnce(&mut WorkerState) + Send>;

struct Injector {
    index: usize,
    tasks: Mutex<VecDeque<Task>>,
    waker: Waker,
}

/// Cheap cloneable handle to a worker: the only way to reach a worker from
/// another thread.
#[derive(Clone)]
pub struct WorkerHandle {
    injector: Arc<Injector>,
}

impl WorkerHandle {
    /// Enqueue a task on this worker and wake its selector. Safe from any
    /// thread.
    pub fn submit(&self, task: Task) {
        self.injector.tasks.lock().unwrap().push_back(task);
        if let Err(e) = self.injector.waker.wake() {
            warn!("worker {}: waker failed: {}", self.injector.index, e);
        }
    }

    pub fn index(&self) -> usize {
        self.injector.index
    }
}

/// Mutable worker-local state: the connection table and the registry used
/// to adjust readiness interest.
pub struct WorkerState {
    pub(crate) registry: Registry,
    pub(crate) connections: Slab<Connection>,
    pub(crate) handle: WorkerHandle,
    stopping: bool,
}

impl WorkerState {
    /// Register a freshly accepted connection with this worker's selector
    /// and run its `connected` callback. Must run on the worker (callers
    /// submit a task).
    pub(crate) fn attach(&mut self, mut conn: Connection) {
        let entry = self.connections.vacant_entry();
        let token = entry.key();
        conn.endpoint().set_token(token);
        match conn.register(&self.registry, token) {
            Ok(()) => {
                trace!(
                    "worker {}: attach {} as token {}",
                    self.handle.index(),
                    conn.peer(),
                    token
                );
                entry.insert(conn);
                self.connections[token].start();
                self.after_io(token);
            }
            Err(e) => {
                warn!("worker {}: register failed: {}", self.handle.index(), e);
                conn.abort_without_registration();
            }
        }
    }

    /// Drive a connection's output path: apply a pending handler swap,
    /// drain queued output, let the handler produce more.
    pub(crate) fn pump(&mut self, token: usize) {
        if let Some(conn) = self.connections.get_mut(token) {
            conn.endpoint().clear_pump_pending();
            conn.apply_pending_upgrade();
            conn.handler_send_ready();
            self.after_io(token);
        }
    }

    /// A timer scheduled through an endpoint fired for this connection.
    pub(crate) fn timer_fired(&mut self, token: usize, kind: u64) {
        if let Some(conn) = self.connections.get_mut(token) {
            conn.timer_expired(kind);
            self.after_io(token);
        }
    }

    fn handle_event(&mut self, token: usize, readable: bool, writable: bool) {
        let Some(conn) = self.connections.get_mut(token) else {
            return;
        };
        if readable {
            if let Err(e) = conn.on_readable() {
                debug!("token {}: read error: {}", token, e);
                conn.transport_error(&e);
                self.drop_connection(token);
                return;
            }
        }
        if writable {
            conn.socket_writable();
        }
        self.after_io(token);
    }

    /// Common tail after any I/O or task activity on a connection: flush
    /// output, settle interest, finish the connection when it is done.
    fn after_io(&mut self, token: usize) {
        let Some(conn) = self.connections.get_mut(token) else {
            return;
        };
        if let Err(e) = conn.drain_output() {
            debug!("token {}: write error: {}", token, e);
            conn.transport_error(&e);
            self.drop_connection(token);
            return;
        }
        if conn.finished() {
            self.drop_connection(token);
            return;
        }
        if let Err(e) = conn.update_interest(&self.registry, token) {
            warn!("token {}: reregister failed: {}", token, e);
            self.drop_connection(token);
        }
    }

    /// Remove a connection, notifying its handler exactly once.
    pub(crate) fn drop_connection(&mut self, token: usize) {
        if self.connections.contains(token) {
            let mut conn = self.connections.remove(token);
            conn.shutdown(&self.registry);
        }
    }

    /// Request worker shutdown; remaining connections are dropped with
    /// their handlers notified.
    pub(crate) fn stop(&mut self) {
        self.stopping = true;
    }
}

/// Spawn one worker thread; returns its handle.
pub(crate) fn spawn(index: usize) -> io::Result<(WorkerHandle, thread::JoinHandle<()>)> {
    let poll = Poll::new()?;
    let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
    let registry = poll.registry().try_clone()?;
    let handle = WorkerHandle {
        injector: Arc::new(Injector {
            index,
            tasks: Mutex::new(VecDeque::new()),
            waker,
        }),
    };
    let thread_handle = handle.clone();
    let join = thread::Builder::new()
        .name(format!("gumdrop-worker-{}", index))
        .spawn(move || run(poll, registry, thread_handle))?;
    Ok((handle, join))
}

fn run(mut poll: Poll, registry: Registry, handle: WorkerHandle) {
    let mut state = WorkerState {
        registry,
        connections: Slab::new(),
        handle: handle.clone(),
        stopping: false,
    };
    let mut events = Events::with_capacity(256);

    loop {
        // Cross-thread submissions drain at the top of every iteration.
        loop {
            let task = handle.injector.tasks.lock().unwrap().pop_front();
            match task {
                Some(task) => task(&mut state),
                None => break,
            }
        }

        if state.stopping {
            let tokens: Vec<usize> = state.connections.iter().map(|(k, _)| k).collect();
            for token in tokens {
                state.drop_connection(token);
            }
            return;
        }

        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("worker {}: poll failed: {}", handle.index(), e);
            return;
        }

        for event in events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            state.handle_event(
                token.0,
                event.is_readable() || event.is_read_closed(),
                event.is_writable(),
            );
        }
    }
}
