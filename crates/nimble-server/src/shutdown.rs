//! Server-wide stop signal.
//!
//! One [`CancellationToken`] is shared by the accept loop, the sweeper, the
//! close listener and every writer loop. Writer loops leave through their
//! normal teardown when it fires, so triggering it closes every connection.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the server's stop token.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires once [`trigger`](Self::trigger) is called.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the stop token. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether `trigger` has run.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the stop token and give `tasks` up to `grace` to finish.
    ///
    /// Tasks still running after `grace` are left detached.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, grace: Duration) {
        self.trigger();
        info!(tasks = tasks.len(), grace_ms = grace.as_millis() as u64, "draining background tasks");

        match tokio::time::timeout(grace, futures::future::join_all(tasks)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    warn!(panicked, "background tasks ended abnormally");
                }
            }
            Err(_) => warn!(grace_ms = grace.as_millis() as u64, "background tasks did not stop in time"),
        }
    }
}

/// Wait for a termination signal and return its name.
///
/// On unix this listens for SIGINT, SIGQUIT and SIGTERM; elsewhere only
/// Ctrl-C.
pub async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::quit()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut int), Ok(mut quit), Ok(mut term)) => {
                tokio::select! {
                    _ = int.recv() => "SIGINT",
                    _ = quit.recv() => "SIGQUIT",
                    _ = term.recv() => "SIGTERM",
                }
            }
            _ => {
                warn!("failed to install unix signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                "ctrl-c"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}
