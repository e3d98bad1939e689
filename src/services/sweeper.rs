//! Background expiry of abandoned upload sessions.

use crate::services::upload_service::{SweepReport, UploadService};
use chrono::Utc;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Run one sweep: expire sessions idle for longer than `ttl`, then drop
/// unindexed chunk blobs and staging files of the same age.
pub async fn sweep_once(service: &UploadService, ttl: Duration) -> SweepReport {
    let cutoff = match chrono::Duration::from_std(ttl) {
        Ok(age) => Utc::now() - age,
        Err(_) => {
            warn!("session ttl {:?} out of range, skipping sweep", ttl);
            return SweepReport::default();
        }
    };

    let mut report = match service.expire_idle_sessions(cutoff).await {
        Ok(report) => report,
        Err(err) => {
            warn!("idle session sweep failed: {}", err);
            SweepReport::default()
        }
    };

    match service.reclaim_orphan_chunks(ttl).await {
        Ok(n) => report.orphans = n,
        Err(err) => warn!("orphan chunk sweep failed: {}", err),
    }

    match service.store.remove_stale_temp_files(ttl).await {
        Ok(0) => {}
        Ok(n) => debug!("removed {} stale temp files", n),
        Err(err) => warn!("stale temp file sweep failed: {}", err),
    }

    report
}

/// Spawn the periodic sweeper. Returns `None` when `ttl` is zero (expiry off).
pub fn spawn(service: UploadService, ttl: Duration, every: Duration) -> Option<JoinHandle<()>> {
    if ttl.is_zero() {
        info!("session expiry disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = sweep_once(&service, ttl).await;
            if report.sessions > 0 || report.orphans > 0 {
                info!(
                    "expired {} idle sessions ({} chunk blobs), {} orphan blobs",
                    report.sessions, report.chunks, report.orphans
                );
            }
        }
    }))
}
