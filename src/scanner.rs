//  Copyright 2024 ctsync-core Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use crate::clock::Timestamp;

/// A single-shot-rearming alarm.
///
/// `TimedScanner` does not drive its own wakeups — per the spec's
/// concurrency model, suspension only happens at event-loop boundaries,
/// never mid-operation, so the host event loop is the one deciding when
/// to call [`TimedScanner::poll`]. All this type does is remember when
/// the alarm is next due and rearm itself relative to that deadline
/// (rather than relative to "now"), so a host that polls late doesn't
/// accumulate drift.
#[derive(Debug, Clone, Copy)]
pub struct TimedScanner {
    interval: Timestamp,
    next_due: Timestamp,
}

impl TimedScanner {
    /// Arms the scanner so the first `poll` that is due fires at
    /// `now + interval`.
    pub fn new(interval: Timestamp, now: Timestamp) -> Self {
        Self {
            interval,
            next_due: now + interval,
        }
    }

    pub fn interval(&self) -> Timestamp {
        self.interval
    }

    /// Returns `true` if the alarm is due at `now`. Does not rearm by
    /// itself — the caller is expected to call [`Self::rearm`] once it
    /// has actually run the callback, matching the spec's "the callback
    /// ... must re-arm the alarm at the end of each invocation."
    pub fn is_due(&self, now: Timestamp) -> bool {
        now >= self.next_due
    }

    /// Re-arm relative to the deadline that just fired, so a late poll
    /// doesn't push subsequent deadlines further out than necessary.
    pub fn rearm(&mut self, now: Timestamp) {
        self.next_due = if now >= self.next_due {
            self.next_due + self.interval
        } else {
            now + self.interval
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_due_before_interval_elapses() {
        let scanner = TimedScanner::new(15, 0);
        assert!(!scanner.is_due(14));
        assert!(scanner.is_due(15));
    }

    #[test]
    fn rearm_advances_by_interval_from_deadline() {
        let mut scanner = TimedScanner::new(15, 0);
        assert!(scanner.is_due(15));
        scanner.rearm(15);
        assert!(!scanner.is_due(29));
        assert!(scanner.is_due(30));
    }

    #[test]
    fn rearm_does_not_accumulate_drift_on_late_poll() {
        let mut scanner = TimedScanner::new(15, 0);
        // Host didn't poll until t=20, five seconds late.
        assert!(scanner.is_due(20));
        scanner.rearm(20);
        // Next deadline is still 30, not 35.
        assert!(!scanner.is_due(29));
        assert!(scanner.is_due(30));
    }
}
