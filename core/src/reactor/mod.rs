/*
 * mod.rs
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

//! Readiness reactor: N workers, each a thread with its own selector and
//! connection table. Listeners assign accepted connections round-robin;
//! a connection stays on its worker for life, which is what lets protocol
//! state go lock-free. Cross-thread work arrives via per-worker task
//! queues that wake the selector.

pub(crate) mod connection;
mod endpoint;
pub mod timer;
pub(crate) mod tls;
mod worker;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

pub use endpoint::{Endpoint, SEND_HARD_LIMIT, SEND_HIGH_WATER};
pub use timer::{TimerHandle, TimerService};
pub use worker::{Task, WorkerHandle, WorkerState};

/// The worker pool. One per server.
pub struct Reactor {
    workers: Vec<WorkerHandle>,
    joins: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
}

impl Reactor {
    /// Spawn `count` workers (0 means one per CPU).
    pub fn new(count: usize) -> io::Result<Reactor> {
        let count = if count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            count
        };
        let mut workers = Vec::with_capacity(count);
        let mut joins = Vec::with_capacity(count);
        for index in 0..count {
            let (handle, join) = worker::spawn(index)?;
            workers.push(handle);
            joins.push(join);
        }
        Ok(Reactor {
            workers,
            joins: Mutex::new(joins),
            next: AtomicUsize::new(0),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, index: usize) -> &WorkerHandle {
        &self.workers[index]
    }

    /// Round-robin assignment: monotonic counter modulo worker count.
    pub fn assign(&self) -> WorkerHandle {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        self.workers[n % self.workers.len()].clone()
    }

    /// Enqueue a task on a specific worker; safe from any thread.
    pub fn submit(&self, worker: usize, task: Task) {
        self.workers[worker].submit(task);
    }

    /// Stop all workers and wait for them. Live connections get their
    /// `disconnected` callbacks.
    pub fn shutdown(&self) {
        for handle in &self.workers {
            handle.submit(Box::new(|state| state.stop()));
        }
        let mut joins = self.joins.lock().unwrap();
        for join in joins.drain(..) {
            let _ = join.join();
        }
    }
}
