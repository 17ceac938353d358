// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer and scheduling management

use dray_core::TimerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Timer entry
#[derive(Debug, Clone)]
struct Timer {
    fires_at: Instant,
}

/// Manages named timers for an actor loop.
///
/// Timers do not fire on their own; the owning loop drains
/// [`Scheduler::fired_timers`] on its tick.
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: HashMap<String, Timer>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or reset) a timer
    pub fn set_timer(&mut self, id: &TimerId, duration: Duration, now: Instant) {
        let fires_at = now + duration;
        self.timers.insert(id.as_str().to_string(), Timer { fires_at });
    }

    /// Cancel a timer
    pub fn cancel_timer(&mut self, id: &TimerId) {
        self.timers.remove(id.as_str());
    }

    /// Whether a timer is currently armed.
    pub fn is_armed(&self, id: &TimerId) -> bool {
        self.timers.contains_key(id.as_str())
    }

    /// Remove and return all timers that have fired
    pub fn fired_timers(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();
        let mut to_remove = Vec::new();

        for (id, timer) in &self.timers {
            if timer.fires_at <= now {
                fired.push(TimerId::new(id));
                to_remove.push(id.clone());
            }
        }

        for id in to_remove {
            self.timers.remove(&id);
        }

        fired
    }

    /// Get the next timer fire time
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.fires_at).min()
    }

    /// Check if there are any pending timers
    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
