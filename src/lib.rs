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

//! Cache-and-synchronization core for a connection-tracking state
//! replicator.
//!
//! This crate holds the in-memory caches and state machines that sit
//! between a kernel connection-tracking table and a peer replication
//! channel: the two-tier fast/slow external cache that mirrors what
//! peers have announced, the internal cache that mirrors the local
//! kernel table and drives outbound synchronization, and the scanning
//! machinery that keeps both bounded in size. The kernel client, the
//! wire transport, configuration parsing, and the operator control
//! socket are left to the embedding daemon and reached only through the
//! traits in [`attrs`] and [`dispatcher`].

pub mod attrs;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod external;
pub mod internal;
pub mod object;
pub mod scanner;
pub mod store;

pub use attrs::{Attributes, Kernel};
pub use clock::{Clock, FakeClock, SystemClock, Timestamp};
pub use config::Tunables;
pub use dispatcher::{Dispatcher, MessageKind, NullDispatcher, PeerGroup};
pub use error::{CacheError, Result};
pub use external::ExternalCacheManager;
pub use internal::InternalCacheManager;
pub use object::{CacheObject, Origin, Owner, Status};
pub use scanner::TimedScanner;
pub use store::CacheStore;
