//! TTL-bounded correlation store.
//!
//! Maps request ids to the calls still waiting for a response. Entries that
//! stay unmatched longer than the TTL are evicted lazily, on the next insert or
//! take, and are never delivered.
//!
//! The store belongs to one client session and is shared by its writer loop
//! (which registers calls before sending) and its reader loop (which takes
//! them when responses arrive).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::callback::ResponseHandler;

/// Default time a call may wait for its response.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(60 * 60);

/// Store shared between the writer and reader loops.
pub type SharedStore = Arc<Mutex<CorrelationStore>>;

/// A dispatched request awaiting its correlated response.
pub struct PendingCall {
    pub id: i32,
    pub method: String,
    pub handler: Box<dyn ResponseHandler>,
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

struct Slot {
    deadline: Instant,
    call: PendingCall,
}

/// Map from request id to pending call, plus an expiry index.
pub struct CorrelationStore {
    ttl: Duration,
    entries: HashMap<i32, Slot>,
    expiry: BTreeSet<(Instant, i32)>,
}

impl CorrelationStore {
    /// Create an empty store with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            expiry: BTreeSet::new(),
        }
    }

    /// Create an empty store wrapped for sharing between loops.
    pub fn shared(ttl: Duration) -> SharedStore {
        Arc::new(Mutex::new(Self::new(ttl)))
    }

    /// Register a pending call.
    ///
    /// If the id is already pending, the existing entry is kept and its TTL
    /// restarts; `call` is dropped. Returns `false` in that case.
    pub fn insert(&mut self, call: PendingCall) -> bool {
        self.insert_at(call, Instant::now())
    }

    pub(crate) fn insert_at(&mut self, call: PendingCall, now: Instant) -> bool {
        self.evict_expired(now);
        let deadline = now + self.ttl;

        if let Some(slot) = self.entries.get_mut(&call.id) {
            tracing::warn!(
                id = call.id,
                method = %call.method,
                pending_method = %slot.call.method,
                "Request id collision, keeping the pending call"
            );
            self.expiry.remove(&(slot.deadline, call.id));
            slot.deadline = deadline;
            self.expiry.insert((deadline, call.id));
            return false;
        }

        self.expiry.insert((deadline, call.id));
        self.entries.insert(call.id, Slot { deadline, call });
        true
    }

    /// Remove and return the pending call for `id`.
    ///
    /// A miss (late response, unknown id, expired call) is logged.
    pub fn take(&mut self, id: i32) -> Option<PendingCall> {
        self.take_at(id, Instant::now())
    }

    pub(crate) fn take_at(&mut self, id: i32, now: Instant) -> Option<PendingCall> {
        self.evict_expired(now);
        match self.entries.remove(&id) {
            Some(slot) => {
                self.expiry.remove(&(slot.deadline, id));
                Some(slot.call)
            }
            None => {
                tracing::warn!(id, "No pending call for response id");
                None
            }
        }
    }

    /// Drop every call whose deadline has passed.
    pub(crate) fn evict_expired(&mut self, now: Instant) {
        while let Some(&(deadline, id)) = self.expiry.first() {
            if deadline > now {
                break;
            }
            self.expiry.pop_first();
            if let Some(slot) = self.entries.remove(&id) {
                tracing::debug!(id, method = %slot.call.method, "Pending call expired");
            }
        }
    }

    /// Number of pending calls (including expired ones not yet evicted).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no calls are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
