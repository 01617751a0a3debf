//! Route handlers and session-closed hooks.
//!
//! The read loop ([`reader`]) decodes inbound packets and hands request and
//! notify payloads to the [`HandlerRegistry`]. Handlers reply through the
//! [`Session`] they receive; nothing they return is written to the wire.

pub mod reader;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::HandlerError;
use crate::metrics::{HANDLER_DURATION_SECONDS, HANDLER_ERRORS_TOTAL, HANDLER_REQUESTS_TOTAL};
use crate::session::Session;

/// Trait implemented by every route handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one inbound request or notification.
    async fn handle(&self, session: Arc<Session>, payload: Bytes) -> Result<(), HandlerError>;
}

type CloseHook = Box<dyn Fn(&Session) + Send + Sync>;

/// Registry mapping routes to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    close_hooks: Vec<CloseHook>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            close_hooks: Vec::new(),
        }
    }

    /// Register a handler for a route, replacing any previous one.
    pub fn register(&mut self, route: &str, handler: impl Handler + 'static) {
        let _ = self.handlers.insert(route.to_owned(), Arc::new(handler));
    }

    /// Run `hook` whenever a session with a bound user id closes.
    pub fn on_session_closed(&mut self, hook: impl Fn(&Session) + Send + Sync + 'static) {
        self.close_hooks.push(Box::new(hook));
    }

    /// All registered routes (sorted).
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a route is registered.
    pub fn has_route(&self, route: &str) -> bool {
        self.handlers.contains_key(route)
    }

    /// Invoke the handler for `route`, bounded by `timeout`.
    ///
    /// Unknown routes, handler errors and timeouts are logged and counted.
    pub async fn dispatch(&self, route: &str, session: Arc<Session>, payload: Bytes, timeout: Duration) {
        counter!(HANDLER_REQUESTS_TOTAL, "route" => route.to_owned()).increment(1);

        let Some(handler) = self.handlers.get(route) else {
            counter!(HANDLER_ERRORS_TOTAL, "route" => route.to_owned(), "error_type" => "route_not_found").increment(1);
            warn!(session_id = session.id(), route, "handler not found");
            return;
        };

        let session_id = session.id();
        let start = std::time::Instant::now();
        match tokio::time::timeout(timeout, handler.handle(session, payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                counter!(HANDLER_ERRORS_TOTAL, "route" => route.to_owned(), "error_type" => err.code()).increment(1);
                warn!(session_id, route, error = %err, "handler failed");
            }
            Err(_elapsed) => {
                counter!(HANDLER_ERRORS_TOTAL, "route" => route.to_owned(), "error_type" => "timeout").increment(1);
                error!(session_id, route, "handler timed out after {timeout:?}");
            }
        }

        histogram!(HANDLER_DURATION_SECONDS, "route" => route.to_owned())
            .record(start.elapsed().as_secs_f64());
    }

    /// Run every session-closed hook for `session`.
    pub fn session_closed(&self, session: &Session) {
        for hook in &self.close_hooks {
            hook(session);
        }
    }

    /// Consume close notifications until `cancel` fires or every sender is gone.
    pub fn spawn_close_listener(
        self: Arc<Self>,
        mut closed: mpsc::UnboundedReceiver<Arc<Session>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let session = tokio::select! {
                    () = cancel.cancelled() => break,
                    session = closed.recv() => session,
                };
                let Some(session) = session else { break };
                debug!(session_id = session.id(), uid = session.uid(), "running session-closed hooks");
                self.session_closed(&session);
            }
        })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
