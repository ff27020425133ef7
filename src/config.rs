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

//! Tunables, in place of the source's `STATE(mode)` / `STATE_SYNC(...)`
//! global state. A host constructs one `Tunables` (and its own filters,
//! dispatcher and kernel handles) once and hands them to each manager at
//! construction, per the design note in `spec.md` §9.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Every magic number named in `spec.md` §6, grouped so a host daemon can
/// load them from its own configuration file. This crate does not parse
/// configuration itself — only the data shape a parser would populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub fast_scan_interval: Timestamp,
    pub slow_scan_interval: Timestamp,
    pub fast_scan_batch: usize,
    pub slow_scan_batch: usize,
    pub promotion_age: Timestamp,
    pub slow_idle_expiry: Timestamp,
    pub resync_staleness_floor: Timestamp,
    pub resync_timeout_headroom: Timestamp,
    pub resync_tolerance_band: i64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            fast_scan_interval: 15,
            slow_scan_interval: 30,
            fast_scan_batch: 3000,
            slow_scan_batch: 3000,
            promotion_age: 300,
            slow_idle_expiry: 21_600,
            resync_staleness_floor: 45,
            resync_timeout_headroom: 90,
            resync_tolerance_band: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let t = Tunables::default();
        assert_eq!(t.fast_scan_interval, 15);
        assert_eq!(t.slow_scan_interval, 30);
        assert_eq!(t.fast_scan_batch, 3000);
        assert_eq!(t.slow_scan_batch, 3000);
        assert_eq!(t.promotion_age, 300);
        assert_eq!(t.slow_idle_expiry, 21_600);
        assert_eq!(t.resync_staleness_floor, 45);
        assert_eq!(t.resync_timeout_headroom, 90);
        assert_eq!(t.resync_tolerance_band, 4);
    }
}
