//! Per-connection actor.
//!
//! An [`Agent`] owns one connection's state: open/closed status, the bounded
//! outbound queue feeding its writer loop, the id of the last inbound
//! request, and the heartbeat timestamp. All public operations are
//! non-blocking and safe to call from any task or thread.
//!
//! ```text
//!   Open ──close()──▶ Closed
//!     │                 ▲
//!     └─ writer exit ───┘   (heartbeat timeout, write error, kick, shutdown)
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use nimble_core::codec::MessageType;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::group::Group;
use crate::session::{NetworkEntity, Session};
use crate::transport::Transport;

/// Route carried by kick messages.
pub const KICK_ROUTE: &str = "error";

const STATE_OPEN: u8 = 0;
const STATE_CLOSED: u8 = 1;

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Accepting outbound messages.
    Open,
    /// Closed; every send fails with `BrokenPipe`.
    Closed,
}

/// A message waiting in the outbound queue, not yet run through the
/// pipeline or encoded.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    /// Envelope type: push or response.
    pub kind: MessageType,
    /// Route for pushes; empty for responses.
    pub route: String,
    /// Correlation id for responses; zero for pushes.
    pub mid: u64,
    /// Application bytes before the outbound pipeline.
    pub payload: Bytes,
    /// Close the connection once this message has been written.
    pub kick: bool,
}

/// Item in the outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Application message; goes through the outbound pipeline.
    Message(PendingMessage),
    /// Pre-framed control packet written as-is.
    Control(Bytes),
}

/// Shared dependencies handed to every new agent.
#[derive(Clone)]
pub struct AgentEnv {
    /// Group the agent leaves when it closes.
    pub group: Arc<Group>,
    /// Outbound queue capacity.
    pub backlog: usize,
    /// Receives sessions with a bound user id when they close.
    pub closed_sessions: mpsc::UnboundedSender<Arc<Session>>,
}

/// Per-connection actor.
pub struct Agent {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    last_mid: AtomicU64,
    done: CancellationToken,
    send_tx: mpsc::Sender<Outbound>,
    backlog: usize,
    epoch: Instant,
    last_heartbeat_ms: AtomicU64,
    group: Arc<Group>,
    closed_sessions: mpsc::UnboundedSender<Arc<Session>>,
}

impl Agent {
    /// Create an agent for `transport`, register its session in the group,
    /// and return the receiving end of its outbound queue for the writer.
    pub fn new(transport: Arc<dyn Transport>, env: &AgentEnv) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let backlog = env.backlog.max(1);
        let (send_tx, send_rx) = mpsc::channel(backlog);
        let remote = transport.remote_addr();

        let agent = Arc::new_cyclic(|weak: &Weak<Agent>| {
            let entity: Weak<dyn NetworkEntity> = weak.clone();
            Agent {
                session: Arc::new(Session::new(entity, remote)),
                transport,
                state: AtomicU8::new(STATE_OPEN),
                last_mid: AtomicU64::new(0),
                done: CancellationToken::new(),
                send_tx,
                backlog,
                epoch: Instant::now(),
                last_heartbeat_ms: AtomicU64::new(0),
                group: env.group.clone(),
                closed_sessions: env.closed_sessions.clone(),
            }
        });

        if let Err(e) = agent.group.add(agent.session.clone()) {
            warn!(session_id = agent.session.id(), error = %e, "failed to register session");
        }
        (agent, send_rx)
    }

    /// Session bound to this connection.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => AgentState::Open,
            _ => AgentState::Closed,
        }
    }

    /// Whether `close` has already run.
    pub fn is_closed(&self) -> bool {
        self.state() == AgentState::Closed
    }

    /// Token cancelled exactly once, when the agent closes.
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Id of the most recent inbound request.
    pub fn last_mid(&self) -> u64 {
        self.last_mid.load(Ordering::Acquire)
    }

    /// Record the id of the request being handled, used by `response`.
    pub fn set_last_mid(&self, mid: u64) {
        self.last_mid.store(mid, Ordering::Release);
    }

    /// Record inbound liveness.
    pub fn touch_heartbeat(&self) {
        let ms = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_heartbeat_ms.store(ms, Ordering::Release);
    }

    /// When inbound traffic was last seen.
    pub fn last_heartbeat(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_heartbeat_ms.load(Ordering::Acquire))
    }

    /// Messages currently waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.send_tx.max_capacity() - self.send_tx.capacity()
    }

    /// Peer address of the underlying transport.
    pub fn remote_addr(&self) -> SocketAddr {
        self.transport.remote_addr()
    }

    /// Queue a push on `route`. Fails when closed or the backlog is full.
    pub fn push(&self, route: &str, payload: Bytes) -> Result<(), AgentError> {
        debug!(
            session_id = self.session.id(),
            uid = self.session.uid(),
            route,
            bytes = payload.len(),
            "push"
        );
        self.enqueue(Outbound::Message(PendingMessage {
            kind: MessageType::Push,
            route: route.to_owned(),
            mid: 0,
            payload,
            kick: false,
        }))
    }

    /// Enqueue a final push on [`KICK_ROUTE`]; the writer closes the
    /// connection right after writing it.
    pub fn kick(&self, payload: Bytes) -> Result<(), AgentError> {
        debug!(session_id = self.session.id(), uid = self.session.uid(), "kick");
        self.enqueue(Outbound::Message(PendingMessage {
            kind: MessageType::Push,
            route: KICK_ROUTE.to_owned(),
            mid: 0,
            payload,
            kick: true,
        }))
    }

    /// Respond to the most recent inbound request.
    pub fn response(&self, payload: Bytes) -> Result<(), AgentError> {
        self.response_mid(self.last_mid(), payload)
    }

    /// Queue a response correlated to request `mid`, which must be non-zero.
    pub fn response_mid(&self, mid: u64, payload: Bytes) -> Result<(), AgentError> {
        if mid == 0 {
            return Err(AgentError::InvalidCorrelationId);
        }
        debug!(
            session_id = self.session.id(),
            uid = self.session.uid(),
            mid,
            bytes = payload.len(),
            "response"
        );
        self.enqueue(Outbound::Message(PendingMessage {
            kind: MessageType::Response,
            route: String::new(),
            mid,
            payload,
            kick: false,
        }))
    }

    /// Enqueue a pre-framed control packet, bypassing the pipeline.
    pub fn send_control(&self, frame: Bytes) -> Result<(), AgentError> {
        self.enqueue(Outbound::Control(frame))
    }

    fn enqueue(&self, item: Outbound) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::BrokenPipe);
        }
        if self.queued() >= self.backlog {
            return Err(AgentError::BufferExceed);
        }
        self.send_tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => AgentError::BufferExceed,
            TrySendError::Closed(_) => AgentError::BrokenPipe,
        })
    }

    /// Close the connection.
    ///
    /// Always removes the session from the group. Only the first call
    /// cancels [`done`](Self::done), notifies the close listener (bound
    /// sessions only) and closes the transport; later calls return
    /// [`AgentError::AlreadyClosed`].
    pub fn close(&self) -> Result<(), AgentError> {
        let _ = self.group.leave(&self.session);

        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AgentError::AlreadyClosed);
        }

        debug!(
            session_id = self.session.id(),
            uid = self.session.uid(),
            remote = %self.remote_addr(),
            "session closed"
        );
        self.done.cancel();

        if self.session.uid() != 0 && self.closed_sessions.send(self.session.clone()).is_err() {
            debug!(session_id = self.session.id(), "close listener gone");
        }

        self.transport.close().map_err(AgentError::from)
    }
}

impl NetworkEntity for Agent {
    fn push(&self, route: &str, payload: Bytes) -> Result<(), AgentError> {
        Agent::push(self, route, payload)
    }

    fn response(&self, payload: Bytes) -> Result<(), AgentError> {
        Agent::response(self, payload)
    }

    fn response_mid(&self, mid: u64, payload: Bytes) -> Result<(), AgentError> {
        Agent::response_mid(self, mid, payload)
    }

    fn kick(&self, payload: Bytes) -> Result<(), AgentError> {
        Agent::kick(self, payload)
    }

    fn close(&self) -> Result<(), AgentError> {
        Agent::close(self)
    }

    fn remote_addr(&self) -> SocketAddr {
        Agent::remote_addr(self)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("session_id", &self.session.id())
            .field("remote", &self.remote_addr())
            .field("state", &self.state())
            .field("last_mid", &self.last_mid())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}
