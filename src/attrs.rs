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

//! The boundary between this crate's caches and the opaque connection /
//! expectation payloads the kernel collaborator actually produces.
//!
//! `spec.md` keeps `ct`/`exp` descriptors opaque and reaches into them
//! only through a fixed attribute set (tuple fields, L4 protocol, TCP
//! state, timeout, counters). `Attributes` is that fixed set, rendered as
//! a trait so `store`/`external`/`internal` stay generic over the
//! concrete payload type a host provides.

use std::hash::Hash;

/// A payload type a [`crate::store::CacheStore`] can hold.
pub trait Attributes: Clone {
    /// Stable, kind-specific key derived from the payload. Two payloads
    /// describing the same flow (or expectation) must hash-key equal;
    /// the key is stable for the object's lifetime even as the payload
    /// is force-updated in place.
    type HashKey: Hash + Eq + Clone;

    fn hash_key(&self) -> Self::HashKey;

    /// Strip the attributes kernels older than 2.6.20 choke on when an
    /// entry produced on this host is replayed: the four packet/byte
    /// counters and the use counter. Isolated here, per the design note
    /// in `spec.md` §9, so every inbound-kernel-payload call site reaches
    /// for the same helper instead of repeating the `unset` calls.
    fn normalize(&mut self);

    /// The entry's kernel timeout in seconds, if the attribute is set.
    fn timeout(&self) -> Option<u64>;

    /// Whether this is a TCP flow (only ct payloads; exp payloads always
    /// return `false`).
    fn is_tcp(&self) -> bool {
        false
    }

    /// The TCP state attribute, if set and `is_tcp()`.
    fn tcp_state(&self) -> Option<u8> {
        None
    }

    /// Build the minimal resync payload: tuple plus timeout, and (for
    /// TCP) the TCP state — nothing else. Returns `None` on allocation
    /// failure, mirroring `cache_ct_alloc` returning `NULL` in the
    /// original source; callers fall back to publishing the full
    /// incoming payload in that case.
    fn to_light_resync(&self) -> Option<Self>
    where
        Self: Sized;
}

/// The kernel collaborator, out of scope per `spec.md` §1 beyond this
/// narrow interface: a synchronous liveness probe used by the purge pass,
/// plus attribute access already captured by [`Attributes`].
pub trait Kernel<P: Attributes> {
    /// Synchronously ask the kernel authoritative table whether `payload`
    /// still exists. `spec.md` models this as a side-channel flag the
    /// caller reads after a `get()` call; here it is simply the return
    /// value.
    fn get(&self, payload: &P) -> bool;

    /// Push `payload` into the kernel authoritative table as part of a
    /// `commit`. Returns `true` on success. A failure here is aggregated
    /// by the caller, not retried (`spec.md` §7).
    fn put(&self, payload: &P) -> bool;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// A minimal ct/exp stand-in used throughout the unit and
    /// integration tests: a numeric tuple id, an optional timeout, and a
    /// TCP-state flag.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TestPayload {
        pub id: u64,
        pub timeout: Option<u64>,
        pub tcp: bool,
        pub tcp_state: Option<u8>,
        pub counters_stripped: bool,
    }

    impl TestPayload {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                timeout: None,
                tcp: false,
                tcp_state: None,
                counters_stripped: false,
            }
        }

        pub fn with_timeout(mut self, timeout: u64) -> Self {
            self.timeout = Some(timeout);
            self
        }

        pub fn with_tcp_state(mut self, state: u8) -> Self {
            self.tcp = true;
            self.tcp_state = Some(state);
            self
        }
    }

    impl Attributes for TestPayload {
        type HashKey = u64;

        fn hash_key(&self) -> Self::HashKey {
            self.id
        }

        fn normalize(&mut self) {
            self.counters_stripped = true;
        }

        fn timeout(&self) -> Option<u64> {
            self.timeout
        }

        fn is_tcp(&self) -> bool {
            self.tcp
        }

        fn tcp_state(&self) -> Option<u8> {
            self.tcp_state
        }

        fn to_light_resync(&self) -> Option<Self> {
            Some(Self {
                id: self.id,
                timeout: self.timeout,
                tcp: self.tcp,
                tcp_state: self.tcp_state,
                counters_stripped: self.counters_stripped,
            })
        }
    }

    /// A fake kernel table: a set of ids considered "present".
    #[derive(Debug, Default)]
    pub struct TestKernel {
        pub present: RefCell<HashSet<u64>>,
        pub put_calls: RefCell<Vec<u64>>,
        pub fail_put: RefCell<HashSet<u64>>,
    }

    impl TestKernel {
        pub fn insert(&self, id: u64) {
            self.present.borrow_mut().insert(id);
        }

        pub fn remove(&self, id: u64) {
            self.present.borrow_mut().remove(&id);
        }
    }

    impl Kernel<TestPayload> for TestKernel {
        fn get(&self, payload: &TestPayload) -> bool {
            self.present.borrow().contains(&payload.id)
        }

        fn put(&self, payload: &TestPayload) -> bool {
            self.put_calls.borrow_mut().push(payload.id);
            !self.fail_put.borrow().contains(&payload.id)
        }
    }
}
