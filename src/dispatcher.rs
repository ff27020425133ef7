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

//! The narrow contract between the managers and the (out of scope)
//! network transport.

use crate::attrs::Attributes;

/// Identifies the peer group a message goes out to. The transport
/// resolves this to actual sockets; the core only needs to pass it
/// through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerGroup(pub u32);

/// The six wire message kinds the core cares about. Each carries exactly
/// one entity payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    StateCtNew,
    StateCtUpd,
    StateCtDel,
    StateExpNew,
    StateExpUpd,
    StateExpDel,
}

/// Outbound side of the sync dispatcher: best-effort, non-blocking. The
/// transport is responsible for buffering; this crate never retries a
/// failed send (the next resync pass heals any resulting divergence).
pub trait Dispatcher<P: Attributes> {
    fn send(&self, group: PeerGroup, kind: MessageKind, payload: &P);
}

/// A dispatcher that discards everything. Useful for populate-only
/// paths and as a test default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatcher;

impl<P: Attributes> Dispatcher<P> for NullDispatcher {
    fn send(&self, _group: PeerGroup, _kind: MessageKind, _payload: &P) {}
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Default)]
    pub struct RecordingDispatcher<P> {
        pub sent: RefCell<Vec<(PeerGroup, MessageKind, P)>>,
    }

    impl<P: Attributes> Dispatcher<P> for RecordingDispatcher<P> {
        fn send(&self, group: PeerGroup, kind: MessageKind, payload: &P) {
            self.sent.borrow_mut().push((group, kind, payload.clone()));
        }
    }

    impl<P> RecordingDispatcher<P> {
        pub fn count(&self) -> usize {
            self.sent.borrow().len()
        }
    }
}
