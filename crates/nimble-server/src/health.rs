//! `GET /health` body.

use std::time::Instant;

use serde::Serialize;

/// Liveness snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the server runs.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// `tcp` or `websocket`.
    pub transport: &'static str,
    /// Members of the server's session group.
    pub sessions: usize,
}

/// Build the health body for a server started at `started`.
pub fn health_check(started: Instant, transport: &'static str, sessions: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: started.elapsed().as_secs(),
        transport,
        sessions,
    }
}
