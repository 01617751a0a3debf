//! Idle session eviction.
//!
//! Once per [`SWEEP_INTERVAL`] the sweeper walks a snapshot of the group and
//! kicks every session whose last handler activity is older than the expiry
//! threshold, then removes it from the group so it is kicked only once.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::group::Group;
use crate::metrics::SESSIONS_EVICTED_TOTAL;

/// How often the group is scanned.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Notice sent to an evicted session.
#[derive(Debug, Clone, Serialize)]
pub struct KickNotice {
    /// Application status code.
    pub code: u32,
    /// Human-readable reason.
    pub message: &'static str,
}

/// Notice used for inactivity eviction.
pub const IDLE_KICK: KickNotice = KickNotice {
    code: 9999,
    message: "disconnect",
};

/// Evict every member idle for longer than `expire` at `now`.
///
/// Returns the number of sessions evicted.
pub fn sweep(group: &Group, expire: Duration, now: Instant) -> usize {
    let mut evicted = 0;
    for session in group.snapshot() {
        let idle = session.idle_for(now);
        if idle <= expire {
            continue;
        }
        debug!(session_id = session.id(), uid = session.uid(), idle_secs = idle.as_secs(), "evicting idle session");
        if let Err(e) = session.kick_json(&IDLE_KICK) {
            warn!(session_id = session.id(), error = %e, "failed to kick idle session");
        }
        let _ = group.leave(&session);
        evicted += 1;
    }
    if evicted > 0 {
        counter!(SESSIONS_EVICTED_TOTAL).increment(evicted as u64);
    }
    evicted
}

/// Run [`sweep`] every [`SWEEP_INTERVAL`] until `cancel` fires.
pub fn spawn_sweeper(group: Arc<Group>, expire: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(group = %group.name(), expire_secs = expire.as_secs(), "session sweeper started");
        let mut ticker = time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = sweep(&group, expire, Instant::now());
                }
            }
        }
        debug!(group = %group.name(), "session sweeper stopped");
    })
}
