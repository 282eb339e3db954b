// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Idle timeout and retry bookkeeping shared by both directions.
//!
//! The timer measures time since the last progress (a byte received or a
//! retry issued), not the length of the session.

use std::time::Instant;

// ============================================================================
// Clock Trait
// ============================================================================

/// Millisecond timer used by the sessions
pub trait Clock {
    /// Milliseconds since the last `reset`
    fn elapsed_ms(&mut self) -> u64;

    fn reset(&mut self);
}

/// Wall clock backed by `Instant`
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed_ms(&mut self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn reset(&mut self) {
        self.start = Instant::now();
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Idle time after which a retry is issued
    pub timeout_ms: u64,
    /// Retries allowed before the session aborts
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            timeout_ms: 1000,
            max_retries: 15,
        }
    }
}

/// Result of checking the idle timer while no byte is available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idle {
    /// Timeout not reached yet
    Waiting,
    /// Timeout reached, caller should retry; timer already reset
    Retry,
    /// Timeout reached with the retry budget spent
    Exhausted,
}

/// Tracks consecutive retries for one session
#[derive(Debug)]
pub struct Watchdog {
    policy: RetryPolicy,
    retries: u32,
}

impl Watchdog {
    pub fn new(policy: RetryPolicy) -> Self {
        Watchdog { policy, retries: 0 }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// A byte arrived: restart the idle timer and the retry count.
    pub fn progress(&mut self, clock: &mut dyn Clock) {
        self.retries = 0;
        clock.reset();
    }

    pub fn check(&mut self, clock: &mut dyn Clock) -> Idle {
        if clock.elapsed_ms() <= self.policy.timeout_ms {
            return Idle::Waiting;
        }
        if self.retries > self.policy.max_retries {
            return Idle::Exhausted;
        }
        self.retries += 1;
        clock.reset();
        Idle::Retry
    }
}

// ============================================================================
// Manual Clock for Testing
// ============================================================================

/// Clock that advances by a fixed step every time it is read
#[cfg(test)]
pub struct ManualClock {
    now: u64,
    step: u64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(step: u64) -> Self {
        ManualClock { now: 0, step }
    }

    /// Every read reports a timeout for the default policy
    pub fn always_late() -> Self {
        Self::new(RetryPolicy::default().timeout_ms + 1)
    }

    /// Time never passes
    pub fn frozen() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn elapsed_ms(&mut self) -> u64 {
        self.now += self.step;
        self.now
    }

    fn reset(&mut self) {
        self.now = 0;
    }
}
