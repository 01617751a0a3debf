//! Live session directory.
//!
//! Every open connection registers its session here when the agent is
//! created and leaves on close. Readers (sweeper, broadcast, lookups) work on
//! a snapshot taken under the read lock, so concurrent joins and leaves never
//! expose a partially inserted entry.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::errors::GroupError;
use crate::session::Session;

/// Named set of sessions keyed by session id.
pub struct Group {
    name: String,
    members: RwLock<HashMap<u64, Arc<Session>>>,
}

impl Group {
    /// Empty group called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a session. Fails if a session with the same id is present.
    pub fn add(&self, session: Arc<Session>) -> Result<(), GroupError> {
        let mut members = self.members.write();
        let id = session.id();
        if members.contains_key(&id) {
            return Err(GroupError::SessionDuplication(id));
        }
        let _ = members.insert(id, session);
        debug!(group = %self.name, session_id = id, "session joined group");
        Ok(())
    }

    /// Remove a session. Returns whether it was present.
    pub fn leave(&self, session: &Session) -> bool {
        let removed = self.members.write().remove(&session.id()).is_some();
        if removed {
            debug!(group = %self.name, session_id = session.id(), "session left group");
        }
        removed
    }

    /// Session with id `id`, if it is a member.
    pub fn member(&self, id: u64) -> Option<Arc<Session>> {
        self.members.read().get(&id).cloned()
    }

    /// Session ids of all current members.
    pub fn members(&self) -> Vec<u64> {
        self.members.read().keys().copied().collect()
    }

    /// Whether session `id` is a member.
    pub fn contains(&self, id: u64) -> bool {
        self.members.read().contains_key(&id)
    }

    /// Number of members.
    pub fn count(&self) -> usize {
        self.members.read().len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Point-in-time copy of the member list.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.members.read().values().cloned().collect()
    }

    /// Push `payload` on `route` to every member. Returns how many accepted it.
    pub fn broadcast(&self, route: &str, payload: impl Into<Bytes>) -> usize {
        self.multicast(route, payload, |_| true)
    }

    /// Push `payload` on `route` to members matching `filter`.
    ///
    /// Per-member failures (full queue, closed agent) are logged and skipped.
    pub fn multicast<F>(&self, route: &str, payload: impl Into<Bytes>, filter: F) -> usize
    where
        F: Fn(&Session) -> bool,
    {
        let payload = payload.into();
        let mut delivered = 0;
        for session in self.snapshot() {
            if !filter(&session) {
                continue;
            }
            match session.push(route, payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(group = %self.name, session_id = session.id(), route, error = %e, "failed to push to member");
                }
            }
        }
        delivered
    }
}
