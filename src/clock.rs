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

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since an arbitrary monotonic epoch. Only deltas between two
/// `Timestamp`s are meaningful.
pub type Timestamp = u64;

/// Monotonic integer-second clock, cached once per event-loop tick.
///
/// Every lifetime/lastupdate comparison in the caches goes through a
/// `Clock`, rather than reading wall time directly, so tests can swap in
/// a fully controllable clock instead of racing real time.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// The production clock: wall-clock seconds since the Unix epoch.
///
/// `now()` is expected to be called once per event-loop tick by the host
/// and threaded through as an argument from there; this type exists so a
/// host has something to construct by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs()
    }
}

/// A clock a test can advance by hand.
#[derive(Debug, Default, Clone)]
pub struct FakeClock {
    now: std::cell::Cell<Timestamp>,
}

impl FakeClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: std::cell::Cell::new(start),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.now.set(ts);
    }

    pub fn advance(&self, delta: Timestamp) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::new(10);
        assert_eq!(clock.now(), 10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.set(100);
        assert_eq!(clock.now(), 100);
    }
}
