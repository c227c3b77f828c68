use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::api::models::{
    ApiKeyRecord, FaxJob, InboundFax, InboundRule, InboundStatus, JobStatus, Mailbox,
};

use super::error::{LedgerError, Result};
use super::partitions::{
    encode_api_key_key, encode_dedup_key, encode_inbound_key, encode_job_key,
    encode_mailbox_key, encode_meta_key, encode_rule_key,
};

/// Outcome of a precondition-guarded job update
#[derive(Debug)]
pub enum Transition {
    /// Precondition held; the stored job now reflects the update
    Applied(FaxJob),
    /// Current status was outside the allowed set; nothing was written
    Skipped(FaxJob),
    NotFound,
}

/// Filters for inbound listings
#[derive(Debug, Default, Clone)]
pub struct InboundFilter {
    pub to_number: Option<String>,
    pub status: Option<InboundStatus>,
    pub mailbox: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

/// Fjall-backed persistent store for jobs, inbound faxes, API keys,
/// mailbox routing and callback dedup entries.
///
/// Fjall gives durable single-key writes; multi-step read-modify-write
/// sequences (status transitions, dedup claims, key updates) serialize
/// behind `write_lock` — the service is the single writer of its store.
#[derive(Clone)]
pub struct FaxStore {
    keyspace: Keyspace,
    pub(super) jobs: PartitionHandle,
    pub(super) inbound: PartitionHandle,
    api_keys: PartitionHandle,
    mailboxes: PartitionHandle,
    rules: PartitionHandle,
    pub(super) dedup: PartitionHandle,
    pub(super) metadata: PartitionHandle,
    write_lock: std::sync::Arc<Mutex<()>>,
}

impl FaxStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let inbound = keyspace.open_partition("inbound", PartitionCreateOptions::default())?;
        let api_keys = keyspace.open_partition("api_keys", PartitionCreateOptions::default())?;
        let mailboxes = keyspace.open_partition("mailboxes", PartitionCreateOptions::default())?;
        let rules =
            keyspace.open_partition("inbound_rules", PartitionCreateOptions::default())?;
        let dedup = keyspace.open_partition("dedup", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            jobs,
            inbound,
            api_keys,
            mailboxes,
            rules,
            dedup,
            metadata,
            write_lock: std::sync::Arc::new(Mutex::new(())),
        })
    }

    // ── Jobs ──────────────────────────────────────────────────────────────

    pub fn put_job(&self, job: &FaxJob) -> Result<()> {
        let key = encode_job_key(&job.id);
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(key, value)?;
        debug!(job_id = %job.id, status = ?job.status, "Upserted job");
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<FaxJob>> {
        match self.jobs.get(encode_job_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Apply `update` to a job iff its current status is in `allowed_from`.
    /// Terminal states never appear in `allowed_from`, which makes them
    /// absorbing: late events fall out as [`Transition::Skipped`].
    pub fn transition_job<F>(
        &self,
        id: &str,
        allowed_from: &[JobStatus],
        update: F,
    ) -> Result<Transition>
    where
        F: FnOnce(&mut FaxJob),
    {
        let _guard = self.write_lock.lock().unwrap();

        let mut job = match self.get_job(id)? {
            Some(job) => job,
            None => return Ok(Transition::NotFound),
        };

        if !allowed_from.contains(&job.status) {
            debug!(job_id = %id, status = ?job.status, "Transition skipped");
            return Ok(Transition::Skipped(job));
        }

        update(&mut job);
        job.updated_at = Utc::now();
        self.put_job(&job)?;
        Ok(Transition::Applied(job))
    }

    /// Linear scan lookup for callbacks that do not echo our job id.
    pub fn find_job_by_provider_sid(&self, provider_sid: &str) -> Result<Option<FaxJob>> {
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: FaxJob = serde_json::from_slice(&value)?;
            if job.provider_sid.as_deref() == Some(provider_sid) {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    // ── Inbound ───────────────────────────────────────────────────────────

    pub fn put_inbound(&self, inbound: &InboundFax) -> Result<()> {
        let key = encode_inbound_key(&inbound.id);
        let value = serde_json::to_vec(inbound)?;
        self.inbound.insert(key, value)?;
        debug!(inbound_id = %inbound.id, "Upserted inbound record");
        Ok(())
    }

    pub fn get_inbound(&self, id: &str) -> Result<Option<InboundFax>> {
        match self.inbound.get(encode_inbound_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn update_inbound<F>(&self, id: &str, update: F) -> Result<Option<InboundFax>>
    where
        F: FnOnce(&mut InboundFax),
    {
        let _guard = self.write_lock.lock().unwrap();

        let mut record = match self.get_inbound(id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        update(&mut record);
        record.updated_at = Utc::now();
        self.put_inbound(&record)?;
        Ok(Some(record))
    }

    /// Filtered listing, newest first. Returns the page and the total
    /// number of matches before pagination.
    pub fn list_inbound(&self, filter: &InboundFilter) -> Result<(Vec<InboundFax>, usize)> {
        let mut matches = Vec::new();

        for item in self.inbound.iter() {
            let (_, value) = item?;
            let record: InboundFax = serde_json::from_slice(&value)?;

            if let Some(ref to) = filter.to_number {
                if record.to_number.as_deref() != Some(to.as_str()) {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                if record.status != status {
                    continue;
                }
            }
            if let Some(ref mailbox) = filter.mailbox {
                if record.mailbox_label.as_deref() != Some(mailbox.as_str()) {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if record.received_at < since {
                    continue;
                }
            }
            matches.push(record);
        }

        matches.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        let total = matches.len();

        let limit = if filter.limit == 0 { 50 } else { filter.limit.min(200) };
        let page = matches
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect();

        Ok((page, total))
    }

    // ── API keys ──────────────────────────────────────────────────────────

    /// Insert a new key record; fails on key id collision.
    pub fn create_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();

        let key = encode_api_key_key(&record.key_id);
        if self.api_keys.get(&key)?.is_some() {
            return Err(LedgerError::Duplicate(record.key_id.clone()));
        }
        let value = serde_json::to_vec(record)?;
        self.api_keys.insert(key, value)?;
        Ok(())
    }

    pub fn get_api_key(&self, key_id: &str) -> Result<Option<ApiKeyRecord>> {
        match self.api_keys.get(encode_api_key_key(key_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        let mut records = Vec::new();
        for item in self.api_keys.iter() {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    pub fn update_api_key<F>(&self, key_id: &str, update: F) -> Result<Option<ApiKeyRecord>>
    where
        F: FnOnce(&mut ApiKeyRecord),
    {
        let _guard = self.write_lock.lock().unwrap();

        let mut record = match self.get_api_key(key_id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        update(&mut record);
        let value = serde_json::to_vec(&record)?;
        self.api_keys.insert(encode_api_key_key(key_id), value)?;
        Ok(Some(record))
    }

    /// Best-effort last-used stamp; callers ignore the result.
    pub fn touch_api_key(&self, key_id: &str, now: DateTime<Utc>) {
        if let Err(e) = self.update_api_key(key_id, |record| {
            record.last_used_at = Some(now);
        }) {
            debug!(key_id, error = %e, "Failed to stamp last_used_at");
        }
    }

    // ── Mailboxes & rules ─────────────────────────────────────────────────

    pub fn put_mailbox(&self, mailbox: &Mailbox) -> Result<()> {
        let value = serde_json::to_vec(mailbox)?;
        self.mailboxes.insert(encode_mailbox_key(&mailbox.label), value)?;
        Ok(())
    }

    pub fn get_mailbox(&self, label: &str) -> Result<Option<Mailbox>> {
        match self.mailboxes.get(encode_mailbox_key(label))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn list_mailboxes(&self) -> Result<Vec<Mailbox>> {
        let mut mailboxes = Vec::new();
        for item in self.mailboxes.iter() {
            let (_, value) = item?;
            mailboxes.push(serde_json::from_slice(&value)?);
        }
        Ok(mailboxes)
    }

    /// Replaces any previous rule for the same number.
    pub fn put_inbound_rule(&self, rule: &InboundRule) -> Result<()> {
        let value = serde_json::to_vec(rule)?;
        self.rules.insert(encode_rule_key(&rule.to_number), value)?;
        Ok(())
    }

    pub fn get_inbound_rule(&self, to_number: &str) -> Result<Option<InboundRule>> {
        match self.rules.get(encode_rule_key(to_number))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn list_inbound_rules(&self) -> Result<Vec<InboundRule>> {
        let mut rules = Vec::new();
        for item in self.rules.iter() {
            let (_, value) = item?;
            rules.push(serde_json::from_slice(&value)?);
        }
        Ok(rules)
    }

    // ── Callback dedup ────────────────────────────────────────────────────

    /// Claim a `(provider_sid, event_type)` pair. Returns `true` exactly
    /// once; every later claim for the same pair returns `false`.
    pub fn claim_callback(&self, provider_sid: &str, event_type: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap();

        let key = encode_dedup_key(provider_sid, event_type);
        if self.dedup.get(&key)?.is_some() {
            return Ok(false);
        }
        let seen_at = Utc::now().timestamp().to_string();
        self.dedup.insert(key, seen_at.as_bytes())?;
        Ok(true)
    }

    // ── Bookkeeping ───────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        self.metadata.insert(encode_meta_key(key), value.as_bytes())?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        match self.metadata.get(encode_meta_key(key))? {
            Some(value) => Ok(Some(String::from_utf8_lossy(&value).to_string())),
            None => Ok(None),
        }
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Backend;
    use tempfile::TempDir;

    fn create_test_store() -> (FaxStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FaxStore::open(temp_dir.path().join("ledger")).unwrap();
        (store, temp_dir)
    }

    fn sample_job(id: &str) -> FaxJob {
        FaxJob::new(id.to_string(), "+15551234567".to_string(), Backend::Phaxio)
    }

    #[test]
    fn test_put_and_get_job() {
        let (store, _temp) = create_test_store();
        store.put_job(&sample_job("job_1")).unwrap();

        let job = store.get_job("job_1").unwrap().unwrap();
        assert_eq!(job.to_number, "+15551234567");
        assert_eq!(job.status, JobStatus::Queued);
        assert!(store.get_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_transition_respects_precondition() {
        let (store, _temp) = create_test_store();
        store.put_job(&sample_job("job_1")).unwrap();

        let outcome = store
            .transition_job("job_1", &[JobStatus::Queued], |job| {
                job.status = JobStatus::InProgress;
                job.provider_sid = Some("PRV-1".into());
            })
            .unwrap();
        assert!(matches!(outcome, Transition::Applied(_)));

        // A second queued->in_progress attempt must not apply
        let outcome = store
            .transition_job("job_1", &[JobStatus::Queued], |job| {
                job.provider_sid = Some("PRV-2".into());
            })
            .unwrap();
        assert!(matches!(outcome, Transition::Skipped(_)));

        let job = store.get_job("job_1").unwrap().unwrap();
        assert_eq!(job.provider_sid.as_deref(), Some("PRV-1"));
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let (store, _temp) = create_test_store();
        store.put_job(&sample_job("job_1")).unwrap();

        store
            .transition_job("job_1", &[JobStatus::Queued, JobStatus::InProgress], |job| {
                job.status = JobStatus::Success;
                job.pages = Some(2);
            })
            .unwrap();

        let outcome = store
            .transition_job("job_1", &[JobStatus::Queued, JobStatus::InProgress], |job| {
                job.status = JobStatus::Failed;
            })
            .unwrap();
        assert!(matches!(outcome, Transition::Skipped(_)));

        let job = store.get_job("job_1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.pages, Some(2));
    }

    #[test]
    fn test_transition_missing_job() {
        let (store, _temp) = create_test_store();
        let outcome = store
            .transition_job("nope", &[JobStatus::Queued], |_| {})
            .unwrap();
        assert!(matches!(outcome, Transition::NotFound));
    }

    #[test]
    fn test_claim_callback_once() {
        let (store, _temp) = create_test_store();

        assert!(store.claim_callback("PRV-1", "fax_complete").unwrap());
        assert!(!store.claim_callback("PRV-1", "fax_complete").unwrap());
        // Different event type for the same sid is its own claim
        assert!(store.claim_callback("PRV-1", "inbound").unwrap());
    }

    #[test]
    fn test_find_job_by_provider_sid() {
        let (store, _temp) = create_test_store();
        let mut job = sample_job("job_1");
        job.provider_sid = Some("PRV-42".into());
        store.put_job(&job).unwrap();
        store.put_job(&sample_job("job_2")).unwrap();

        let found = store.find_job_by_provider_sid("PRV-42").unwrap().unwrap();
        assert_eq!(found.id, "job_1");
        assert!(store.find_job_by_provider_sid("PRV-0").unwrap().is_none());
    }

    #[test]
    fn test_api_key_create_rejects_duplicate() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();
        let record = ApiKeyRecord {
            key_id: "abcd1234".into(),
            key_hash: "$pbkdf2$...".into(),
            name: "ci".into(),
            owner: None,
            scopes: vec!["fax:send".into()],
            note: None,
            created_at: now,
            last_used_at: None,
            expires_at: None,
            revoked_at: None,
        };

        store.create_api_key(&record).unwrap();
        let err = store.create_api_key(&record).unwrap_err();
        assert!(matches!(err, LedgerError::Duplicate(_)));
    }

    #[test]
    fn test_inbound_rule_replaces() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();

        store
            .put_inbound_rule(&InboundRule {
                to_number: "+15551230000".into(),
                mailbox_label: "ops".into(),
                created_at: now,
            })
            .unwrap();
        store
            .put_inbound_rule(&InboundRule {
                to_number: "+15551230000".into(),
                mailbox_label: "billing".into(),
                created_at: now,
            })
            .unwrap();

        let rule = store.get_inbound_rule("+15551230000").unwrap().unwrap();
        assert_eq!(rule.mailbox_label, "billing");
        assert_eq!(store.list_inbound_rules().unwrap().len(), 1);
    }

    #[test]
    fn test_list_inbound_filters_and_pages() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();

        for i in 0..5 {
            let record = InboundFax {
                id: format!("inb_{i}"),
                from_number: Some("+15559876543".into()),
                to_number: Some(if i % 2 == 0 {
                    "+15551230000".into()
                } else {
                    "+15551239999".into()
                }),
                status: InboundStatus::Received,
                backend: Backend::Sip,
                provider_sid: Some(format!("uid-{i}")),
                pages: Some(1),
                size_bytes: Some(1000),
                sha256: None,
                error: None,
                pdf_path: Some(format!("inbound/inb_{i}/fax.pdf")),
                tiff_path: None,
                mailbox_label: None,
                pdf_token: None,
                pdf_token_expires_at: None,
                retention_until: None,
                created_at: now,
                received_at: now + chrono::Duration::seconds(i),
                updated_at: now,
            };
            store.put_inbound(&record).unwrap();
        }

        let filter = InboundFilter {
            to_number: Some("+15551230000".into()),
            ..Default::default()
        };
        let (page, total) = store.list_inbound(&filter).unwrap();
        assert_eq!(total, 3);
        // Newest first
        assert_eq!(page[0].id, "inb_4");

        let filter = InboundFilter {
            limit: 2,
            offset: 1,
            ..Default::default()
        };
        let (page, total) = store.list_inbound(&filter).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "inb_3");
    }
}
