use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use super::MessageKey;
use crate::error::{HierSyncError, Result};
use crate::types::Rank;

type Slot = (Rank, MessageKey);

enum Lane {
    /// Payloads that arrived before anyone asked for them.
    Queued(VecDeque<Vec<u8>>),
    /// A receiver is parked on this slot.
    Waiting(oneshot::Sender<Vec<u8>>),
}

#[derive(Default)]
struct State {
    lanes: HashMap<Slot, Lane>,
    /// Peers whose connection is gone. Already-buffered payloads from them
    /// can still be taken.
    disconnected: HashSet<Rank>,
}

/// Per-rank inbox matching incoming payloads with receivers.
///
/// When a payload arrives before `take` has been called for its slot, it is
/// buffered. Lanes are removed once drained, so per-operation tags do not
/// accumulate.
#[derive(Default)]
pub(crate) struct Inbox {
    state: Mutex<State>,
}

impl Inbox {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a payload from `src` to whoever is (or will be) waiting for it.
    pub(crate) fn deliver(&self, src: Rank, key: MessageKey, payload: Vec<u8>) {
        let slot = (src, key);
        let mut state = self.state();
        let lanes = &mut state.lanes;
        let payload = match lanes.remove(&slot) {
            Some(Lane::Waiting(tx)) => match tx.send(payload) {
                Ok(()) => return,
                // Receiver gave up (timeout); keep the payload queued.
                Err(payload) => payload,
            },
            Some(Lane::Queued(mut queue)) => {
                queue.push_back(payload);
                lanes.insert(slot, Lane::Queued(queue));
                return;
            }
            None => payload,
        };
        lanes.insert(slot, Lane::Queued(VecDeque::from([payload])));
    }

    /// Wait for the next payload from `src` under `key`.
    pub(crate) async fn take(&self, src: Rank, key: MessageKey) -> Result<Vec<u8>> {
        let rx = {
            let slot = (src, key);
            let mut state = self.state();
            let State {
                lanes,
                disconnected,
            } = &mut *state;
            match lanes.remove(&slot) {
                Some(Lane::Queued(mut queue)) => {
                    let front = queue.pop_front();
                    if !queue.is_empty() {
                        lanes.insert(slot, Lane::Queued(queue));
                    }
                    if let Some(payload) = front {
                        return Ok(payload);
                    }
                }
                Some(Lane::Waiting(tx)) if !tx.is_closed() => {
                    lanes.insert(slot, Lane::Waiting(tx));
                    return Err(HierSyncError::transport(format!(
                        "concurrent receive from rank {src} on group {} tag {}",
                        key.group, key.tag
                    )));
                }
                Some(Lane::Waiting(_)) | None => {}
            }
            if disconnected.contains(&src) {
                return Err(HierSyncError::transport(format!("rank {src} disconnected")));
            }
            let (tx, rx) = oneshot::channel();
            lanes.insert(slot, Lane::Waiting(tx));
            rx
        };
        let mut parked = Parked {
            inbox: self,
            slot: (src, key),
            armed: true,
        };
        let result = rx.await;
        parked.armed = false;
        result.map_err(|_| {
            HierSyncError::transport(format!("inbox closed while waiting for rank {src}"))
        })
    }

    /// Mark `src` as gone and fail receivers parked on it.
    pub(crate) fn disconnect(&self, src: Rank) {
        let mut state = self.state();
        state.disconnected.insert(src);
        state
            .lanes
            .retain(|(from, _), lane| !(*from == src && matches!(lane, Lane::Waiting(_))));
    }

    /// Fail every parked receiver and drop buffered payloads.
    pub(crate) fn close(&self) {
        self.state().lanes.clear();
    }
}

/// Unparks an abandoned receiver. A `take` cancelled while waiting (timeout
/// or an aborted task) would otherwise leave its lane behind for good.
struct Parked<'a> {
    inbox: &'a Inbox,
    slot: Slot,
    armed: bool,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // While armed, a waiting lane on this slot is ours: a second receiver
        // is rejected rather than parked.
        let mut state = self.inbox.state();
        if matches!(state.lanes.get(&self.slot), Some(Lane::Waiting(_))) {
            state.lanes.remove(&self.slot);
        }
    }
}
