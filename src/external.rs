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

//! The peer-learned view of connections observed from the network: a
//! two-tier (`fast`/`slow`) ct store plus a single-tier exp store.

use crate::attrs::{Attributes, Kernel};
use crate::clock::Timestamp;
use crate::config::Tunables;
use crate::object::Owner;
use crate::scanner::TimedScanner;
use crate::store::CacheStore;

/// Maximum number of delete-then-retry attempts before an insertion-style
/// event gives up, per the design note capping the source's goto-driven
/// `retry`/`retry2` loop at two retries (three attempts total).
const MAX_INSERT_ATTEMPTS: usize = 3;

pub struct ExternalCacheManager<Ct: Attributes, Exp: Attributes> {
    fast: CacheStore<Ct>,
    slow: CacheStore<Ct>,
    exp: CacheStore<Exp>,
    fast_scanner: TimedScanner,
    slow_scanner: TimedScanner,
    fast_cursor: usize,
    slow_cursor: usize,
    tunables: Tunables,
}

impl<Ct: Attributes, Exp: Attributes> ExternalCacheManager<Ct, Exp> {
    pub fn new(tunables: Tunables, now: Timestamp) -> Self {
        Self {
            fast: CacheStore::new("external_fast"),
            slow: CacheStore::new("external_slow"),
            exp: CacheStore::new("external_exp"),
            fast_scanner: TimedScanner::new(tunables.fast_scan_interval, now),
            slow_scanner: TimedScanner::new(tunables.slow_scan_interval, now),
            fast_cursor: 0,
            slow_cursor: 0,
            tunables,
        }
    }

    pub fn fast(&self) -> &CacheStore<Ct> {
        &self.fast
    }

    pub fn slow(&self) -> &CacheStore<Ct> {
        &self.slow
    }

    pub fn exp(&self) -> &CacheStore<Exp> {
        &self.exp
    }

    // ---- ct event paths ----------------------------------------------

    /// A peer has announced a new connection.
    pub fn ct_new(&mut self, payload: Ct, peer: u64, now: Timestamp) {
        let key = payload.hash_key();
        for attempt in 0..MAX_INSERT_ATTEMPTS {
            if self.slow.delete(&key).is_some() {
                tracing::debug!(attempt, "ct_new: stale slow-tier entry, retrying into fast");
                continue;
            }
            if self.fast.delete(&key).is_some() {
                tracing::debug!(attempt, "ct_new: idempotent re-announce, retrying");
                continue;
            }
            let _ = self.fast.insert(payload, Owner::Peer(peer), now);
            return;
        }
        tracing::warn!("ct_new: gave up after exhausting retries");
    }

    pub fn ct_upd(&mut self, payload: Ct, peer: u64, now: Timestamp) {
        let key = payload.hash_key();
        if self.slow.contains(&key) {
            self.slow.update(&key, payload, now);
        } else {
            self.fast.update_force(payload, Owner::Peer(peer), now);
        }
    }

    /// Ownership-gated delete: only the peer that authored an entry may
    /// retract it. Deletes from whichever tier the entry was actually
    /// found in (the corrected behavior — see `spec.md` §9's open
    /// question about the first copy of the source deleting from the
    /// wrong store). Returns `true` if the delete was accepted.
    pub fn ct_del(&mut self, payload: Ct, peer: u64) -> bool {
        let key = payload.hash_key();
        if let Some(obj) = self.fast.find(&key) {
            if obj.owner == Owner::Peer(peer) {
                self.fast.delete(&key);
                return true;
            }
            tracing::warn!("ct_del: ownership gate rejected delete from fast tier");
            return false;
        }
        if let Some(obj) = self.slow.find(&key) {
            if obj.owner == Owner::Peer(peer) {
                self.slow.delete(&key);
                return true;
            }
            tracing::warn!("ct_del: ownership gate rejected delete from slow tier");
            return false;
        }
        false
    }

    // ---- exp event paths ----------------------------------------------

    pub fn exp_new(&mut self, payload: Exp, peer: u64, now: Timestamp) {
        let key = payload.hash_key();
        for _ in 0..MAX_INSERT_ATTEMPTS {
            if self.exp.delete(&key).is_some() {
                continue;
            }
            let _ = self.exp.insert(payload, Owner::Peer(peer), now);
            return;
        }
        tracing::warn!("exp_new: gave up after exhausting retries");
    }

    pub fn exp_upd(&mut self, payload: Exp, peer: u64, now: Timestamp) {
        self.exp.update_force(payload, Owner::Peer(peer), now);
    }

    /// Returns `true` iff an entry was actually removed — the consistent
    /// policy `spec.md` §9 asks implementers to pick, since the source
    /// returns 1 unconditionally here.
    pub fn exp_del(&mut self, payload: Exp) -> bool {
        let key = payload.hash_key();
        self.exp.delete(&key).is_some()
    }

    // ---- GC ------------------------------------------------------------

    /// Run the fast-tier GC step if the fast alarm is due. Returns the
    /// number of entries visited, if the scan ran.
    pub fn tick_fast(&mut self, now: Timestamp) -> Option<usize> {
        if !self.fast_scanner.is_due(now) {
            return None;
        }
        let visited = self.gc_fast(now);
        self.fast_scanner.rearm(now);
        Some(visited)
    }

    /// Run the slow-tier GC step if the slow alarm is due.
    pub fn tick_slow(&mut self, now: Timestamp) -> Option<usize> {
        if !self.slow_scanner.is_due(now) {
            return None;
        }
        let visited = self.gc_slow(now);
        self.slow_scanner.rearm(now);
        Some(visited)
    }

    /// The fast-tier GC pass, callable directly (e.g. from tests) without
    /// waiting on the scanner's alarm.
    pub fn gc_fast(&mut self, now: Timestamp) -> usize {
        let batch = self.tunables.fast_scan_batch;
        let promotion_age = self.tunables.promotion_age;
        let mut to_promote = Vec::new();

        let Self { fast, .. } = self;
        let (visited, next_cursor) = fast.iterate_limit(self.fast_cursor, batch, |key, obj| {
            if obj.is_dead() {
                tracing::trace!("fast gc: reclaiming dead entry");
                return true;
            }
            if now.saturating_sub(obj.lifetime) > promotion_age {
                to_promote.push((key.clone(), obj.clone()));
                return true;
            }
            false
        });
        self.fast_cursor = next_cursor;

        for (key, obj) in to_promote {
            tracing::debug!("fast gc: promoting entry to slow tier");
            if self.slow.insert_object(key, obj).is_err() {
                tracing::warn!("fast gc: promotion target already present in slow tier");
            }
        }

        visited
    }

    /// The slow-tier GC pass.
    pub fn gc_slow(&mut self, now: Timestamp) -> usize {
        let batch = self.tunables.slow_scan_batch;
        let idle_expiry = self.tunables.slow_idle_expiry;

        let (visited, next_cursor) = self.slow.iterate_limit(self.slow_cursor, batch, |_key, obj| {
            now.saturating_sub(obj.lastupdate) > idle_expiry
        });
        self.slow_cursor = next_cursor;
        visited
    }

    // ---- diagnostics / operator-control-socket surface ------------------

    pub fn dump_ct<W: std::fmt::Write>(&self, sink: &mut W, filter: impl Fn(&Ct) -> bool) -> std::fmt::Result
    where
        Ct: std::fmt::Debug,
    {
        self.fast.dump(sink, &filter)?;
        self.slow.dump(sink, &filter)
    }

    pub fn dump_exp<W: std::fmt::Write>(&self, sink: &mut W, filter: impl Fn(&Exp) -> bool) -> std::fmt::Result
    where
        Exp: std::fmt::Debug,
    {
        self.exp.dump(sink, filter)
    }

    pub fn commit_ct(&self, kernel: &impl Kernel<Ct>) -> bool {
        self.fast.commit(kernel) && self.slow.commit(kernel)
    }

    pub fn commit_exp(&self, kernel: &impl Kernel<Exp>) -> bool {
        self.exp.commit(kernel)
    }

    pub fn flush_ct(&mut self) {
        self.fast.flush();
        self.slow.flush();
    }

    pub fn flush_exp(&mut self) {
        self.exp.flush();
    }

    /// Fast tier under "New:", slow tier under "Old:", per `spec.md` §4.3.
    pub fn stats_ct<W: std::fmt::Write>(&self, sink: &mut W) -> std::fmt::Result {
        writeln!(sink, "New:")?;
        self.fast.stats(sink)?;
        writeln!(sink, "Old:")?;
        self.slow.stats(sink)
    }

    pub fn stats_exp<W: std::fmt::Write>(&self, sink: &mut W) -> std::fmt::Result {
        self.exp.stats(sink)
    }

    /// Extended diagnostics (per-owner breakdown), fast tier under "New:",
    /// slow tier under "Old:", matching `stats_ct`'s labeling.
    pub fn stats_ext_ct<W: std::fmt::Write>(&self, sink: &mut W) -> std::fmt::Result {
        writeln!(sink, "New:")?;
        self.fast.stats_extended(sink)?;
        writeln!(sink, "Old:")?;
        self.slow.stats_extended(sink)
    }

    pub fn stats_ext_exp<W: std::fmt::Write>(&self, sink: &mut W) -> std::fmt::Result {
        self.exp.stats_extended(sink)
    }
}
