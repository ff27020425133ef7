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

use std::fmt::Write as _;

use indexmap::IndexMap;

use crate::attrs::{Attributes, Kernel};
use crate::clock::Timestamp;
use crate::error::{CacheError, Result};
use crate::object::{CacheObject, Owner, Status};

/// A keyed table of [`CacheObject`]s, generic over the opaque payload
/// kind `P`.
///
/// Backed by an [`IndexMap`] rather than a plain hash map: `find` stays
/// O(1) expected, but insertion order is also preserved, which is what
/// lets [`CacheStore::iterate_limit`] resume a bounded scan from a
/// remembered cursor instead of restarting from scratch every tick.
pub struct CacheStore<P: Attributes> {
    name: &'static str,
    map: IndexMap<P::HashKey, CacheObject<P>, ahash::RandomState>,
}

impl<P: Attributes> CacheStore<P> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            map: IndexMap::with_hasher(ahash::RandomState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &P::HashKey) -> bool {
        self.map.contains_key(key)
    }

    /// Insert `payload` under its derived key. Fails with
    /// [`CacheError::AlreadyPresent`] if the key already has an entry —
    /// callers follow the delete-then-retry idiom documented on the
    /// managers when they hit this.
    pub fn insert(&mut self, payload: P, owner: Owner, now: Timestamp) -> Result<&mut CacheObject<P>> {
        let key = payload.hash_key();
        if self.map.contains_key(&key) {
            return Err(CacheError::AlreadyPresent);
        }
        metrics::counter!("ctsync_store_insert_total", "store" => self.name).increment(1);
        let (idx, _) = self.map.insert_full(key, CacheObject::new(payload, owner, now));
        Ok(self.map.get_index_mut(idx).expect("just inserted").1)
    }

    /// Look up the object stored under `key`, if any.
    pub fn find(&self, key: &P::HashKey) -> Option<&CacheObject<P>> {
        self.map.get(key)
    }

    pub fn find_mut(&mut self, key: &P::HashKey) -> Option<&mut CacheObject<P>> {
        self.map.get_mut(key)
    }

    /// Overwrite in place if present, insert if absent. Always succeeds
    /// and always leaves `lastupdate == now`.
    pub fn update_force(&mut self, payload: P, owner: Owner, now: Timestamp) -> &mut CacheObject<P> {
        let key = payload.hash_key();
        if self.map.contains_key(&key) {
            metrics::counter!("ctsync_store_update_total", "store" => self.name).increment(1);
            let obj = self.map.get_mut(&key).expect("just checked");
            obj.force_update(payload, now);
            obj
        } else {
            metrics::counter!("ctsync_store_insert_total", "store" => self.name).increment(1);
            let (idx, _) = self.map.insert_full(key, CacheObject::new(payload, owner, now));
            self.map.get_index_mut(idx).expect("just inserted").1
        }
    }

    /// In-place update of an object already known to be present (the
    /// caller typically just did a `find`). Returns `None` if the key
    /// has since disappeared.
    pub fn update(&mut self, key: &P::HashKey, payload: P, now: Timestamp) -> Option<&mut CacheObject<P>> {
        let obj = self.map.get_mut(key)?;
        obj.force_update(payload, now);
        Some(obj)
    }

    /// Insert a whole, already-constructed object under `key`, preserving
    /// its `lifetime`/`lastupdate`/`owner`/`status` exactly as given.
    /// Used for the fast→slow tier promotion, which must carry the
    /// object's original `lifetime` across stores rather than stamping a
    /// fresh one (the promoted entry didn't just get created).
    pub fn insert_object(&mut self, key: P::HashKey, obj: CacheObject<P>) -> Result<()> {
        if self.map.contains_key(&key) {
            return Err(CacheError::AlreadyPresent);
        }
        metrics::counter!("ctsync_store_insert_total", "store" => self.name).increment(1);
        self.map.insert(key, obj);
        Ok(())
    }

    /// Remove `key` from the index, returning the object. Matches the
    /// spec's "does not free memory, callers then drop their reference":
    /// in this Rust rendition that's simply returning ownership — once
    /// the caller drops the returned value, it is actually freed.
    pub fn delete(&mut self, key: &P::HashKey) -> Option<CacheObject<P>> {
        let removed = self.map.shift_remove(key);
        if removed.is_some() {
            metrics::counter!("ctsync_store_delete_total", "store" => self.name).increment(1);
        }
        removed
    }

    /// Visit up to `limit` entries in stable insertion order, starting at
    /// `cursor`. `f` is given the entry's key and a mutable reference to
    /// its object, and returns `true` if the entry should be removed
    /// from this store.
    ///
    /// Returns `(visited, next_cursor)`. `next_cursor` is `0` once the
    /// scan has reached the end of the store (the caller's next call
    /// starts a fresh pass); otherwise it is where the next call should
    /// resume. Because removal shifts later entries down by one instead
    /// of swapping in the last entry, an entry removed by `f` is never
    /// revisited and no other entry is skipped — the safe-erase property
    /// the spec requires of `iterate_limit`.
    pub fn iterate_limit(
        &mut self,
        cursor: usize,
        limit: usize,
        mut f: impl FnMut(&P::HashKey, &mut CacheObject<P>) -> bool,
    ) -> (usize, usize) {
        let mut idx = if cursor >= self.map.len() { 0 } else { cursor };
        let mut visited = 0usize;

        while visited < limit && idx < self.map.len() {
            let (key, obj) = self.map.get_index_mut(idx).expect("idx < len");
            let key = key.clone();
            let remove = f(&key, obj);
            visited += 1;
            if remove {
                self.map.shift_remove(&key);
            } else {
                idx += 1;
            }
        }

        let next_cursor = if visited == limit && idx < self.map.len() { idx } else { 0 };
        (visited, next_cursor)
    }

    /// Remove and release every entry.
    pub fn flush(&mut self) {
        metrics::counter!("ctsync_store_flush_total", "store" => self.name).increment(1);
        self.map.clear();
    }

    /// Write a textual dump of entries passing `filter` to `sink`.
    pub fn dump<W: std::fmt::Write>(&self, sink: &mut W, filter: impl Fn(&P) -> bool) -> std::fmt::Result
    where
        P: std::fmt::Debug,
    {
        for obj in self.map.values() {
            if filter(&obj.payload) {
                writeln!(sink, "{:?} status={:?} owner={:?}", obj.payload, obj.status, obj.owner)?;
            }
        }
        Ok(())
    }

    /// Basic counts: total entries and entries by status.
    pub fn stats<W: std::fmt::Write>(&self, sink: &mut W) -> std::fmt::Result {
        let (mut new, mut alive, mut dead) = (0, 0, 0);
        for obj in self.map.values() {
            match obj.status {
                Status::New => new += 1,
                Status::Alive => alive += 1,
                Status::Dead => dead += 1,
            }
        }
        writeln!(
            sink,
            "{}: total={} new={} alive={} dead={}",
            self.name,
            self.map.len(),
            new,
            alive,
            dead
        )
    }

    /// Extended diagnostics: per-owner entry counts, in addition to
    /// `stats`'s status breakdown.
    pub fn stats_extended<W: std::fmt::Write>(&self, sink: &mut W) -> std::fmt::Result {
        self.stats(sink)?;
        let mut local = 0usize;
        let mut peers: std::collections::BTreeMap<u64, usize> = std::collections::BTreeMap::new();
        for obj in self.map.values() {
            match obj.owner {
                Owner::Local => local += 1,
                Owner::Peer(id) => *peers.entry(id).or_default() += 1,
            }
        }
        writeln!(sink, "{}: owner.local={}", self.name, local)?;
        for (peer, count) in peers {
            writeln!(sink, "{}: owner.peer[{}]={}", self.name, peer, count)?;
        }
        Ok(())
    }

    /// Push every `Alive` entry to the kernel authoritative table.
    /// Returns `true` iff every push succeeded; per the spec, individual
    /// failures are not retried here — the caller aggregates across
    /// stores with a bitwise OR of these booleans.
    pub fn commit(&self, kernel: &impl Kernel<P>) -> bool {
        let mut ok = true;
        for obj in self.map.values() {
            if obj.status == Status::Alive && !kernel.put(&obj.payload) {
                ok = false;
            }
        }
        ok
    }
}
