//! Retention sweep: deletes expired artifacts and stale dedup entries.
//!
//! Metadata rows are kept forever; only stored artifacts are removed and
//! the records updated to drop their storage references. Failures leave
//! the record untouched so the next sweep retries.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::storage::StorageClient;

use super::error::Result;
use super::store::FaxStore;

const META_LAST_SWEEP: &str = "last_sweep";

/// Retention policy resolved from configuration
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub artifact_days: u32,
    pub dedup_window_hours: u64,
}

/// Sweep statistics
#[derive(Debug, Default)]
pub struct SweepStats {
    pub inbound_artifacts_deleted: usize,
    pub job_artifacts_deleted: usize,
    pub dedup_purged: usize,
    pub errors: usize,
}

/// Run one full sweep: expired inbound artifacts, aged-out job artifacts,
/// stale dedup rows.
pub async fn run_sweep(
    store: &FaxStore,
    storage: &StorageClient,
    policy: RetentionPolicy,
) -> Result<SweepStats> {
    let now = Utc::now();
    let mut stats = SweepStats::default();

    // Inbound records carry an explicit retention_until.
    let expired_inbound = collect_expired_inbound(store)?;
    for record in expired_inbound {
        let mut ok = true;
        for path in [record.pdf_path.as_deref(), record.tiff_path.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = storage.delete(path).await {
                warn!(inbound_id = %record.id, error = %e, "Failed to delete expired artifact");
                ok = false;
            }
        }
        if ok {
            store.update_inbound(&record.id, |r| {
                r.pdf_path = None;
                r.tiff_path = None;
                r.pdf_token = None;
                r.pdf_token_expires_at = None;
            })?;
            stats.inbound_artifacts_deleted += 1;
        } else {
            stats.errors += 1;
        }
    }

    // Outbound jobs age out by creation time under the same policy.
    let cutoff = now - Duration::days(policy.artifact_days as i64);
    let expired_jobs = collect_expired_jobs(store, cutoff)?;
    for job in expired_jobs {
        let mut ok = true;
        for path in [job.pdf_path.as_deref(), job.tiff_path.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = storage.delete(path).await {
                warn!(job_id = %job.id, error = %e, "Failed to delete expired artifact");
                ok = false;
            }
        }
        if ok {
            // Any state is fine to clear paths on; terminal or not, the
            // artifact is past retention.
            store.transition_job(
                &job.id,
                &[
                    crate::api::models::JobStatus::Queued,
                    crate::api::models::JobStatus::InProgress,
                    crate::api::models::JobStatus::Success,
                    crate::api::models::JobStatus::Failed,
                ],
                |j| {
                    j.pdf_path = None;
                    j.tiff_path = None;
                    j.pdf_token = None;
                    j.pdf_token_expires_at = None;
                    j.pdf_url = None;
                },
            )?;
            stats.job_artifacts_deleted += 1;
        } else {
            stats.errors += 1;
        }
    }

    stats.dedup_purged = purge_dedup(store, policy.dedup_window_hours)?;

    store.put_meta(META_LAST_SWEEP, &now.timestamp().to_string())?;
    store.persist()?;
    info!(
        inbound = stats.inbound_artifacts_deleted,
        jobs = stats.job_artifacts_deleted,
        dedup = stats.dedup_purged,
        errors = stats.errors,
        "Retention sweep complete"
    );

    Ok(stats)
}

fn collect_expired_inbound(store: &FaxStore) -> Result<Vec<crate::api::models::InboundFax>> {
    let now = Utc::now();
    let mut expired = Vec::new();
    for item in store.inbound.iter() {
        let (_, value) = item?;
        let record: crate::api::models::InboundFax = serde_json::from_slice(&value)?;
        let has_artifact = record.pdf_path.is_some() || record.tiff_path.is_some();
        if has_artifact && record.retention_until.map(|r| r < now).unwrap_or(false) {
            expired.push(record);
        }
    }
    Ok(expired)
}

fn collect_expired_jobs(
    store: &FaxStore,
    cutoff: chrono::DateTime<Utc>,
) -> Result<Vec<crate::api::models::FaxJob>> {
    let mut expired = Vec::new();
    for item in store.jobs.iter() {
        let (_, value) = item?;
        let job: crate::api::models::FaxJob = serde_json::from_slice(&value)?;
        let has_artifact = job.pdf_path.is_some() || job.tiff_path.is_some();
        if has_artifact && job.created_at < cutoff {
            expired.push(job);
        }
    }
    Ok(expired)
}

/// Drop dedup rows older than the idempotency window. Values are epoch
/// seconds written by `claim_callback`.
fn purge_dedup(store: &FaxStore, window_hours: u64) -> Result<usize> {
    let cutoff = Utc::now().timestamp() - (window_hours as i64) * 3600;
    let mut stale = Vec::new();

    for item in store.dedup.iter() {
        let (key, value) = item?;
        let seen_at: i64 = std::str::from_utf8(&value)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if seen_at < cutoff {
            stale.push(key);
        }
    }

    let purged = stale.len();
    for key in stale {
        store.dedup.remove(key)?;
    }
    Ok(purged)
}
