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

//! Error taxonomy for the cache core.
//!
//! Per the spec, most of the error kinds a conntrack daemon core can hit
//! are *not* exceptional: ownership violations, kernel probe misses, and
//! transport send failures are all part of ordinary control flow and are
//! represented as plain return values, not `Err`. `CacheError` is reserved
//! for the handful of cases a caller genuinely needs to branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// `insert` was called for a key that already has a live entry.
    ///
    /// Per the spec this is a caller-side bug in the usual case; the
    /// documented recovery is the delete-then-retry idiom used by the
    /// `*_new` event handlers (capped at two attempts).
    #[error("key already present in cache store")]
    AlreadyPresent,

    /// Allocation failed (cache full / out of memory). The individual
    /// operation is abandoned; the next resync pass heals it if the
    /// kernel entry persists.
    #[error("cache store allocation failed")]
    CacheFull,
}

pub type Result<T> = std::result::Result<T, CacheError>;
