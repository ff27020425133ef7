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

/// Lifecycle state of a [`CacheObject`].
///
/// `NEW` until the first successful commit/confirm, `ALIVE` thereafter,
/// `DEAD` once logically deleted (pending physical reclamation once all
/// outstanding references drop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    New,
    Alive,
    Dead,
}

/// Who authored a given external-cache entry.
///
/// Internal-cache entries use `Owner::Local`; external-cache entries
/// carry the identifier of the peer that announced them, so the
/// ownership gate in the external ct `del` path can tell a legitimate
/// retraction from a foreign peer trying to retract someone else's
/// entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Local,
    Peer(u64),
}

/// Classifier carried on every kernel event, distinguishing events this
/// daemon caused from events that originated elsewhere.
///
/// `Me`: generated by this daemon's own commit to the kernel table.
/// `NotMe`: generated by the kernel itself or a foreign process.
/// `Inject`: generated by our own direct inject — always ignored outright
/// to prevent echoing our own writes back out as if they were new
/// observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Me,
    NotMe,
    Inject,
}

/// The unit of storage in a [`crate::store::CacheStore`].
///
/// Wraps an opaque, kind-specific payload (a ct or exp descriptor) with
/// the bookkeeping the cache layer needs: lifecycle status, a logical
/// refcount tolerating in-flight references held by kernel probes or
/// callbacks, authorship, and the two clocks the GC/resync/purge passes
/// key off of.
#[derive(Debug, Clone)]
pub struct CacheObject<P> {
    pub payload: P,
    pub status: Status,
    pub owner: Owner,
    pub lifetime: Timestamp,
    pub lastupdate: Timestamp,
    refs: usize,
}

impl<P> CacheObject<P> {
    pub fn new(payload: P, owner: Owner, now: Timestamp) -> Self {
        Self {
            payload,
            status: Status::New,
            owner,
            lifetime: now,
            lastupdate: now,
            refs: 0,
        }
    }

    /// Overwrite the stored payload in place, advancing `lastupdate`.
    /// `lifetime` is left untouched — it marks creation, not mutation.
    pub fn force_update(&mut self, payload: P, now: Timestamp) {
        self.payload = payload;
        self.lastupdate = now;
    }

    pub fn mark_alive(&mut self) {
        if self.status == Status::New {
            self.status = Status::Alive;
        }
    }

    pub fn mark_dead(&mut self) {
        self.status = Status::Dead;
    }

    pub fn is_dead(&self) -> bool {
        self.status == Status::Dead
    }

    /// Number of outstanding logical holders (e.g. an in-flight kernel
    /// probe bound to this object during purge). An object is only
    /// physically freed once this reaches zero *and* `status` is `Dead`.
    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn acquire(&mut self) {
        self.refs += 1;
    }

    /// Release a logical hold. Returns `true` once the object has no
    /// remaining holders and is `Dead` — the free condition — letting the
    /// caller decide whether to physically drop it now or keep it parked
    /// in an auxiliary "still referenced" set a little longer.
    pub fn release(&mut self) -> bool {
        debug_assert!(self.refs > 0, "releasing a handle with no outstanding refs");
        self.refs = self.refs.saturating_sub(1);
        self.refs == 0 && self.is_dead()
    }
}
