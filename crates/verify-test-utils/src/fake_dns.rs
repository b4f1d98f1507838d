//! In-memory authoritative DNS zone store.
//!
//! Visibility changes are driven by the number of `find_record` calls, so
//! read-after-write lag can be simulated without real time passing.
//! `delete_record` follows authoritative semantics: the supplied record must
//! equal the stored one or the call fails with `StaleValue`.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use verify_core::dns::{normalize_name, DnsError, DnsProvider, DnsRecord, RecordId};

type Key = (String, String, String);

fn key(zone_id: &str, name: &str, record_type: &str) -> Key {
    (
        zone_id.to_string(),
        normalize_name(name),
        record_type.to_ascii_uppercase(),
    )
}

/// Fake [`DnsProvider`].
#[derive(Debug, Clone, Default)]
pub struct FakeDns {
    inner: Arc<Mutex<FakeDnsInner>>,
}

#[derive(Debug, Default)]
struct FakeDnsInner {
    records: BTreeMap<Key, DnsRecord>,
    /// Records that appear once `queries` reaches the threshold.
    appearing: Vec<(u32, String, DnsRecord)>,
    /// Records that vanish once `queries` reaches the threshold.
    vanishing: Vec<(u32, Key)>,
    queries: u32,
    find_errors: VecDeque<DnsError>,
    delete_errors: VecDeque<DnsError>,
    /// Replaces the stored record right before the next delete.
    rewrite_before_delete: Option<DnsRecord>,
    deleted: Vec<DnsRecord>,
    delete_calls: u32,
}

impl FakeDnsInner {
    fn advance(&mut self) {
        self.queries += 1;
        let now = self.queries;

        let (due, waiting): (Vec<_>, Vec<_>) =
            self.appearing.drain(..).partition(|(at, _, _)| *at <= now);
        self.appearing = waiting;
        for (_, zone, record) in due {
            self.records
                .insert(key(&zone, &record.name, &record.record_type), record);
        }

        let (due, waiting): (Vec<_>, Vec<_>) =
            self.vanishing.drain(..).partition(|(at, _)| *at <= now);
        self.vanishing = waiting;
        for (_, key) in due {
            self.records.remove(&key);
        }
    }
}

impl FakeDns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_record(self, zone_id: &str, record: DnsRecord) -> Self {
        self.insert(zone_id, record);
        self
    }

    /// Record becomes visible on the `query`-th `find_record` call.
    #[must_use]
    pub fn with_record_after(self, zone_id: &str, record: DnsRecord, query: u32) -> Self {
        self.inner
            .lock()
            .unwrap()
            .appearing
            .push((query, zone_id.to_string(), record));
        self
    }

    /// Existing record disappears on the `query`-th `find_record` call.
    #[must_use]
    pub fn with_record_removed_after(self, zone_id: &str, record: DnsRecord, query: u32) -> Self {
        let key = key(zone_id, &record.name, &record.record_type);
        self.insert(zone_id, record);
        self.inner.lock().unwrap().vanishing.push((query, key));
        self
    }

    /// Errors returned by the next `find_record` calls, in order.
    #[must_use]
    pub fn with_find_errors(self, errors: Vec<DnsError>) -> Self {
        self.inner.lock().unwrap().find_errors.extend(errors);
        self
    }

    /// Errors returned by the next `delete_record` calls, in order.
    #[must_use]
    pub fn with_delete_errors(self, errors: Vec<DnsError>) -> Self {
        self.inner.lock().unwrap().delete_errors.extend(errors);
        self
    }

    /// Simulate another writer changing the record between read and delete.
    #[must_use]
    pub fn with_rewrite_before_delete(self, record: DnsRecord) -> Self {
        self.inner.lock().unwrap().rewrite_before_delete = Some(record);
        self
    }

    pub fn insert(&self, zone_id: &str, record: DnsRecord) {
        self.inner
            .lock()
            .unwrap()
            .records
            .insert(key(zone_id, &record.name, &record.record_type), record);
    }

    pub fn remove(&self, id: &RecordId) -> Option<DnsRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .remove(&key(&id.zone_id, &id.name, &id.record_type))
    }

    pub fn record(&self, id: &RecordId) -> Option<DnsRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .get(&key(&id.zone_id, &id.name, &id.record_type))
            .cloned()
    }

    pub fn query_count(&self) -> u32 {
        self.inner.lock().unwrap().queries
    }

    /// Number of `delete_record` calls, failed ones included.
    pub fn delete_count(&self) -> u32 {
        self.inner.lock().unwrap().delete_calls
    }

    /// Records removed through `delete_record`, in order.
    pub fn deleted(&self) -> Vec<DnsRecord> {
        self.inner.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn find_record(&self, id: &RecordId) -> Result<Option<DnsRecord>, DnsError> {
        let mut inner = self.inner.lock().unwrap();
        inner.advance();
        if let Some(error) = inner.find_errors.pop_front() {
            return Err(error);
        }
        Ok(inner
            .records
            .get(&key(&id.zone_id, &id.name, &id.record_type))
            .cloned())
    }

    async fn delete_record(&self, zone_id: &str, record: &DnsRecord) -> Result<(), DnsError> {
        let mut inner = self.inner.lock().unwrap();
        inner.delete_calls += 1;
        if let Some(error) = inner.delete_errors.pop_front() {
            return Err(error);
        }
        let key = key(zone_id, &record.name, &record.record_type);
        if let Some(rewritten) = inner.rewrite_before_delete.take() {
            inner.records.insert(key.clone(), rewritten);
        }

        match inner.records.get(&key) {
            Some(stored) if stored == record => {
                inner.records.remove(&key);
                inner.deleted.push(record.clone());
                Ok(())
            }
            Some(stored) => Err(DnsError::StaleValue(format!(
                "stored value is {}",
                stored.value_summary()
            ))),
            None => Err(DnsError::StaleValue(format!(
                "{} {} not found",
                record.name, record.record_type
            ))),
        }
    }
}
