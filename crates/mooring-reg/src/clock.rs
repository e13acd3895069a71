// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Clock abstraction and deterministic timer scheduling.
//!
//! The engine never reads wall-clock time directly: it asks an injected
//! [`Clock`] for "now" and parks timers in a [`Scheduler`]. Production uses
//! [`SystemClock`]; tests use [`VirtualClock`] and advance it explicitly,
//! firing due timers in timestamp order without re-entering a timer mid-fire.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic time source measured as an offset from the clock's origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;

    /// Moves a controllable backend forward by `by`.
    ///
    /// Real backends return false and ignore the request.
    fn advance(&self, by: Duration) -> bool {
        let _ = by;
        false
    }
}

/// Real monotonic clock.
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Controllable clock for deterministic tests.
#[derive(Default)]
pub struct VirtualClock {
    now_micros: AtomicU64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.now_micros.load(Ordering::SeqCst))
    }

    fn advance(&self, by: Duration) -> bool {
        self.now_micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
        true
    }
}

/// Opaque handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

struct TimerEntry<T> {
    deadline: Duration,
    seq: u64,
    token: TimerToken,
    event: T,
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for TimerEntry<T> {}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TimerEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Timestamp-ordered timer queue over an injected [`Clock`].
///
/// Cancellation is lazy: cancelled tokens are skipped when they surface.
pub struct Scheduler<T> {
    clock: Arc<dyn Clock>,
    queue: BinaryHeap<Reverse<TimerEntry<T>>>,
    cancelled: HashSet<TimerToken>,
    next_seq: u64,
}

impl<T> Scheduler<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Returns the current time from the injected clock.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Returns the clock backing this scheduler.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Schedules `event` to fire `after` the current time.
    pub fn schedule(&mut self, after: Duration, event: T) -> TimerToken {
        let seq = self.next_seq;
        self.next_seq += 1;
        let token = TimerToken(seq);
        self.queue.push(Reverse(TimerEntry {
            deadline: self.clock.now() + after,
            seq,
            token,
            event,
        }));
        token
    }

    /// Cancels a previously scheduled timer. Unknown or already-fired tokens
    /// are ignored.
    pub fn cancel(&mut self, token: TimerToken) {
        self.cancelled.insert(token);
    }

    /// Earliest pending deadline, skipping cancelled entries.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(Reverse(entry)) = self.queue.peek() {
            if self.cancelled.remove(&entry.token) {
                self.queue.pop();
                continue;
            }
            return Some(entry.deadline);
        }
        None
    }

    /// Pops the next timer due at or before the current time.
    pub fn pop_due(&mut self) -> Option<T> {
        let now = self.clock.now();
        while let Some(Reverse(entry)) = self.queue.peek() {
            if entry.deadline > now {
                return None;
            }
            let Reverse(entry) = self.queue.pop().expect("peeked entry");
            if self.cancelled.remove(&entry.token) {
                continue;
            }
            return Some(entry.event);
        }
        None
    }
}
