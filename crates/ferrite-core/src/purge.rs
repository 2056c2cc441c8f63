//! Upload purge
//!
//! Abandoned upload sessions keep their partial data under `_uploads`
//! forever unless something reclaims them. The purger walks every
//! repository's upload directories, reads `startedat`, and deletes sessions
//! older than the configured age. It only touches sessions older than any
//! plausible live upload, so it can run alongside traffic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ferrite_storage::{StorageDriver, WalkControl, walk};
use tracing::{debug, info, warn};

use crate::error::DistributionError;
use crate::paths::{PathSpec, path_for};

/// Operator policy for upload purging.
#[derive(Debug, Clone)]
pub struct UploadPurgeConfig {
    pub enabled: bool,
    /// Sessions older than this are purged.
    pub age: Duration,
    /// How often the purge pass runs.
    pub interval: Duration,
    /// Log what would be deleted without deleting it.
    pub dry_run: bool,
}

impl Default for UploadPurgeConfig {
    fn default() -> Self {
        UploadPurgeConfig {
            enabled: true,
            age: Duration::from_secs(7 * 24 * 3600),
            interval: Duration::from_secs(24 * 3600),
            dry_run: false,
        }
    }
}

/// Outcome of one purge pass.
#[derive(Debug, Default)]
pub struct PurgeSummary {
    pub deleted: usize,
    pub errors: usize,
}

/// Delete (or, in dry-run, report) upload sessions started before
/// `now - age`.
pub async fn purge_uploads(
    driver: &Arc<dyn StorageDriver>,
    age: Duration,
    dry_run: bool,
) -> Result<PurgeSummary, DistributionError> {
    let root = path_for(PathSpec::RepositoriesRoot);
    let cutoff = Utc::now()
        - chrono::Duration::from_std(age)
            .map_err(|e| DistributionError::Internal(format!("invalid purge age: {e}")))?;

    // Collect candidate marker files first; deletions happen after the walk
    // so the traversal never mutates what it is iterating.
    let mut markers: Vec<String> = Vec::new();
    match walk(driver.as_ref(), &root, &mut |info| {
        if !info.is_dir && info.path.ends_with("/startedat") && info.path.contains("/_uploads/") {
            markers.push(info.path.clone());
        }
        WalkControl::Continue
    })
    .await
    {
        Ok(()) => {}
        Err(err) if err.is_not_found() => return Ok(PurgeSummary::default()),
        Err(err) => return Err(err.into()),
    }

    let mut summary = PurgeSummary::default();
    for marker in markers {
        let session_root = marker.trim_end_matches("/startedat").to_string();
        let started_at = match read_started_at(driver, &marker).await {
            Ok(started_at) => started_at,
            Err(err) => {
                warn!("unreadable startedat at {marker}: {err}");
                summary.errors += 1;
                continue;
            }
        };
        if started_at >= cutoff {
            continue;
        }

        if dry_run {
            info!("would purge upload {session_root} started {started_at}");
            summary.deleted += 1;
            continue;
        }
        match driver.delete(&session_root).await {
            Ok(()) => {
                debug!("purged upload {session_root} started {started_at}");
                summary.deleted += 1;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!("failed to purge {session_root}: {err}");
                summary.errors += 1;
            }
        }
    }
    Ok(summary)
}

async fn read_started_at(
    driver: &Arc<dyn StorageDriver>,
    path: &str,
) -> Result<DateTime<Utc>, DistributionError> {
    let raw = driver.get_content(path).await?;
    std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| DistributionError::Internal("malformed startedat timestamp".to_string()))
}

/// Run purge passes on a single background ticker. The first tick fires
/// after one full interval.
pub fn spawn_purge_task(
    driver: Arc<dyn StorageDriver>,
    config: UploadPurgeConfig,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.enabled {
        return None;
    }
    info!(
        "starting upload purge task (age: {:?}, interval: {:?}, dry_run: {})",
        config.age, config.interval, config.dry_run
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        // The interval's first tick completes immediately; skip it.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match purge_uploads(&driver, config.age, config.dry_run).await {
                Ok(summary) => {
                    if summary.deleted > 0 || summary.errors > 0 {
                        info!(
                            "upload purge pass: {} deleted, {} errors",
                            summary.deleted, summary.errors
                        );
                    }
                }
                Err(err) => warn!("upload purge pass failed: {err}"),
            }
        }
    }))
}
