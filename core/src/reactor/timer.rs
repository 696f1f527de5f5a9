/*
 * timer.rs
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

//! Timer service: one thread, a deadline-ordered queue, dispatch onto the
//! target worker via its task queue. Cancelled entries are skipped when
//! they fire. Used for keep-alive and parse timeouts, HTTP/2 SETTINGS
//! timeouts and PING intervals, and lock expiry in higher layers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as MemOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::worker::{Task, WorkerHandle};

/// Cancellation handle for a scheduled timer. Dropping the handle does not
/// cancel the timer.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, MemOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(MemOrdering::Relaxed)
    }
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    worker: WorkerHandle,
    task: Task,
}

// Min-heap order by (deadline, seq); seq breaks ties so firing is FIFO
// among equal deadlines.
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    stopped: bool,
}

struct Inner {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
    seq: AtomicU64,
}

/// The timer service. Create once per server with `start`.
pub struct TimerService {
    inner: Arc<Inner>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimerService {
    pub fn start() -> std::io::Result<Arc<TimerService>> {
        let inner = Arc::new(Inner {
            queue: Mutex::new(TimerQueue {
                heap: BinaryHeap::new(),
                stopped: false,
            }),
            condvar: Condvar::new(),
            seq: AtomicU64::new(0),
        });
        let thread_inner = inner.clone();
        let join = thread::Builder::new()
            .name("gumdrop-timer".into())
            .spawn(move || run(thread_inner))?;
        Ok(Arc::new(TimerService {
            inner,
            join: Mutex::new(Some(join)),
        }))
    }

    /// Schedule `task` to run on `worker` after `delay`.
    pub fn schedule(&self, delay: Duration, worker: WorkerHandle, task: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            seq: self.inner.seq.fetch_add(1, MemOrdering::Relaxed),
            cancelled: cancelled.clone(),
            worker,
            task,
        };
        let mut queue = self.inner.queue.lock().unwrap();
        queue.heap.push(entry);
        self.inner.condvar.notify_one();
        TimerHandle { cancelled }
    }

    /// Stop the timer thread. Pending entries are discarded.
    pub fn shutdown(&self) {
        {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.stopped = true;
            queue.heap.clear();
        }
        self.inner.condvar.notify_one();
        if let Some(join) = self.join.lock().unwrap().take() {
            let _ = join.join();
        }
    }
}

fn run(inner: Arc<Inner>) {
    let mut queue = inner.queue.lock().unwrap();
    loop {
        if queue.stopped {
            return;
        }
        let now = Instant::now();
        match queue.heap.peek() {
            None => {
                queue = inner.condvar.wait(queue).unwrap();
            }
            Some(entry) if entry.deadline <= now => {
                let entry = queue.heap.pop().unwrap();
                drop(queue);
                if !entry.cancelled.load(MemOrdering::Relaxed) {
                    entry.worker.submit(entry.task);
                }
                queue = inner.queue.lock().unwrap();
            }
            Some(entry) => {
                let wait = entry.deadline - now;
                let (guard, _) = inner.condvar.wait_timeout(queue, wait).unwrap();
                queue = guard;
            }
        }
    }
}
