//! Application-visible handle for one connection.
//!
//! A [`Session`] is what handlers, the group, and the sweeper hold. It owns
//! identity (session id, bound user id) and idle-tracking state, and forwards
//! every send to its [`NetworkEntity`] through a weak reference. Once the
//! connection's agent is gone, sends fail with [`AgentError::BrokenPipe`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::errors::AgentError;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Low-level connection operations a session delegates to.
///
/// Implemented by [`Agent`](crate::agent::Agent). Every method is
/// non-blocking.
pub trait NetworkEntity: Send + Sync {
    /// Enqueue a server push on `route`.
    fn push(&self, route: &str, payload: Bytes) -> Result<(), AgentError>;
    /// Respond to the most recent inbound request.
    fn response(&self, payload: Bytes) -> Result<(), AgentError>;
    /// Respond to the request with id `mid`.
    fn response_mid(&self, mid: u64, payload: Bytes) -> Result<(), AgentError>;
    /// Enqueue a final message, after which the connection is closed.
    fn kick(&self, payload: Bytes) -> Result<(), AgentError>;
    /// Close the connection.
    fn close(&self) -> Result<(), AgentError>;
    /// Peer address.
    fn remote_addr(&self) -> SocketAddr;
}

/// A client session.
pub struct Session {
    id: u64,
    uid: AtomicU64,
    remote: SocketAddr,
    entity: Weak<dyn NetworkEntity>,
    last_access: Mutex<Instant>,
}

impl Session {
    /// Create a session bound to `entity` with a fresh process-unique id.
    pub fn new(entity: Weak<dyn NetworkEntity>, remote: SocketAddr) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            uid: AtomicU64::new(0),
            remote,
            entity,
            last_access: Mutex::new(Instant::now()),
        }
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bound user id, `0` while unbound.
    pub fn uid(&self) -> u64 {
        self.uid.load(Ordering::Acquire)
    }

    /// Bind a user id to this session.
    pub fn bind(&self, uid: u64) -> Result<(), AgentError> {
        if uid == 0 {
            return Err(AgentError::IllegalUid(uid));
        }
        self.uid.store(uid, Ordering::Release);
        Ok(())
    }

    /// Record handler activity for idle-eviction purposes.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// When the session last saw traffic.
    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    /// Time since the last handler activity, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access())
    }

    /// Peer address of the connection.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn entity(&self) -> Result<Arc<dyn NetworkEntity>, AgentError> {
        self.entity.upgrade().ok_or(AgentError::BrokenPipe)
    }

    /// Send a server push on `route`.
    pub fn push(&self, route: &str, payload: impl Into<Bytes>) -> Result<(), AgentError> {
        self.entity()?.push(route, payload.into())
    }

    /// Serialize `value` as JSON and push it on `route`.
    pub fn push_json<T: Serialize + ?Sized>(&self, route: &str, value: &T) -> Result<(), AgentError> {
        let payload = serde_json::to_vec(value)?;
        self.push(route, payload)
    }

    /// Answer the request currently being handled.
    pub fn response(&self, payload: impl Into<Bytes>) -> Result<(), AgentError> {
        self.entity()?.response(payload.into())
    }

    /// Serialize `value` as JSON and respond to the most recent request.
    pub fn response_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), AgentError> {
        let payload = serde_json::to_vec(value)?;
        self.response(payload)
    }

    /// Answer request `mid` explicitly.
    pub fn response_mid(&self, mid: u64, payload: impl Into<Bytes>) -> Result<(), AgentError> {
        self.entity()?.response_mid(mid, payload.into())
    }

    /// Send a final message, then close the connection.
    pub fn kick(&self, payload: impl Into<Bytes>) -> Result<(), AgentError> {
        self.entity()?.kick(payload.into())
    }

    /// Serialize `value` as JSON and kick the session with it.
    pub fn kick_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), AgentError> {
        let payload = serde_json::to_vec(value)?;
        self.kick(payload)
    }

    /// Close the connection. A session whose agent is gone counts as closed.
    pub fn close(&self) -> Result<(), AgentError> {
        self.entity
            .upgrade()
            .ok_or(AgentError::AlreadyClosed)?
            .close()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("uid", &self.uid())
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}
