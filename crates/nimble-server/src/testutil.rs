//! Shared fixtures for unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};

use crate::agent::AgentEnv;
use crate::errors::{AgentError, TransportError};
use crate::group::Group;
use crate::session::{NetworkEntity, Session};
use crate::transport::{FrameSink, Transport};

pub(crate) fn test_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40_000))
}

/// A session whose entity has already been dropped.
pub(crate) fn detached_session() -> Arc<Session> {
    let entity: Weak<dyn NetworkEntity> = Weak::<RecordingEntity>::new();
    Arc::new(Session::new(entity, test_addr()))
}

/// Entity that records every call instead of touching a socket.
pub(crate) struct RecordingEntity {
    session: Arc<Session>,
    pub pushes: Mutex<Vec<(String, Bytes)>>,
    pub responses: Mutex<Vec<(u64, Bytes)>>,
    pub kicks: Mutex<Vec<Bytes>>,
    pub closes: AtomicUsize,
}

impl RecordingEntity {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let entity: Weak<dyn NetworkEntity> = weak.clone();
            Self {
                session: Arc::new(Session::new(entity, test_addr())),
                pushes: Mutex::new(Vec::new()),
                responses: Mutex::new(Vec::new()),
                kicks: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
            }
        })
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }
}

impl NetworkEntity for RecordingEntity {
    fn push(&self, route: &str, payload: Bytes) -> Result<(), AgentError> {
        self.pushes.lock().push((route.to_owned(), payload));
        Ok(())
    }

    fn response(&self, payload: Bytes) -> Result<(), AgentError> {
        self.response_mid(0, payload)
    }

    fn response_mid(&self, mid: u64, payload: Bytes) -> Result<(), AgentError> {
        self.responses.lock().push((mid, payload));
        Ok(())
    }

    fn kick(&self, payload: Bytes) -> Result<(), AgentError> {
        self.kicks.lock().push(payload);
        Ok(())
    }

    fn close(&self) -> Result<(), AgentError> {
        let _ = self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        test_addr()
    }
}

/// Transport that counts closes.
pub(crate) struct MockTransport {
    pub closes: AtomicUsize,
    fail_close: bool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closes: AtomicUsize::new(0),
            fail_close: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            closes: AtomicUsize::new(0),
            fail_close: true,
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn remote_addr(&self) -> SocketAddr {
        test_addr()
    }

    fn close(&self) -> Result<(), TransportError> {
        let _ = self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(TransportError::Io(std::io::Error::other("close failed")));
        }
        Ok(())
    }
}

/// Sink that records frames, optionally failing or blocking on a gate.
#[derive(Clone)]
pub(crate) struct MockSink {
    pub writes: Arc<Mutex<Vec<Bytes>>>,
    pub attempts: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
    fail: Arc<AtomicBool>,
    stall_shutdown: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            writes: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            gate: None,
            fail: Arc::new(AtomicBool::new(false)),
            stall_shutdown: false,
        }
    }

    /// Each write waits for one permit from `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        let sink = Self::new();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    /// Shutdown never completes, like a peer that stopped reading.
    pub fn stall_shutdown(mut self) -> Self {
        self.stall_shutdown = true;
        self
    }

    pub fn written(&self) -> Vec<Bytes> {
        self.writes.lock().clone()
    }

    pub fn boxed(&self) -> Box<dyn FrameSink> {
        Box::new(self.clone())
    }

    /// Poll until at least `n` frames were written.
    pub async fn wait_for(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.writes.lock().len() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} writes"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl FrameSink for MockSink {
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        self.writes.lock().push(frame);
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.stall_shutdown {
            std::future::pending::<()>().await;
        }
    }
}

/// Agent environment with a fresh group and close-notification channel.
pub(crate) fn agent_env(
    backlog: usize,
) -> (AgentEnv, Arc<Group>, mpsc::UnboundedReceiver<Arc<Session>>) {
    let group = Arc::new(Group::new("test"));
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();
    let env = AgentEnv {
        group: group.clone(),
        backlog,
        closed_sessions: closed_tx,
    };
    (env, group, closed_rx)
}
