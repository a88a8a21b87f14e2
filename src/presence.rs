//! Online presence: heartbeat thresholds and the inactivity sweeper.
//!
//! Presence is best effort. Clients heartbeat every
//! [`HEARTBEAT_INTERVAL`]; every [`CLEANUP_INTERVAL`] the sweeper marks
//! offline any human silent for longer than [`MAX_INACTIVITY`]. Bots are
//! never swept.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;
use crate::hub::{self, Hub};
use crate::store::{Store, User};

pub const MAX_INACTIVITY: Duration = Duration::from_secs(5 * 60);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Chat notice for a presence change.
pub fn notice(username: &str, online: bool) -> String {
    if online {
        format!("🟢 {} se conectó", username)
    } else {
        format!("🔴 {} se desconectó", username)
    }
}

/// One sweep: mark idle users offline and announce each one.
pub fn sweep(store: &Store, hub: &Hub, max_idle: Duration) -> Result<Vec<User>> {
    let gone = store.cleanup_inactive(max_idle.as_millis() as i64)?;
    for user in &gone {
        hub.publish_all(hub::presence_event(user, false));
    }
    if !gone.is_empty() {
        info!(count = gone.len(), "marked idle users offline");
    }
    Ok(gone)
}

/// Run [`sweep`] every `every` until the task is aborted.
pub fn spawn_cleanup(store: Arc<Store>, hub: Hub, every: Duration, max_idle: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; skip it so startup does not sweep.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = sweep(&store, &hub, max_idle) {
                warn!(%err, "presence sweep failed");
            }
        }
    })
}
