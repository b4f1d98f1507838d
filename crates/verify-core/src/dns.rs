//! DNS provider interface.
//!
//! Records are looked up by exact name and type inside one hosted zone.
//! Deletion follows authoritative-DNS semantics: the caller must supply the
//! record's full current value, and a stale value fails instead of silently
//! doing nothing.

use crate::poller::{poll, PollOutcome, PollResult, PollSpec, Transience};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Identity of one record set: zone, fully-qualified name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub zone_id: String,
    pub name: String,
    pub record_type: String,
}

impl RecordId {
    pub fn new(
        zone_id: impl Into<String>,
        name: impl Into<String>,
        record_type: impl Into<String>,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            name: name.into(),
            record_type: record_type.into(),
        }
    }

    /// Exact name+type match, ignoring case and a trailing root dot.
    pub fn matches(&self, name: &str, record_type: &str) -> bool {
        normalize_name(&self.name) == normalize_name(name)
            && self.record_type.eq_ignore_ascii_case(record_type)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (zone {})",
            normalize_name(&self.name),
            self.record_type,
            self.zone_id
        )
    }
}

/// Canonical form used for name comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Alias target of an alias record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasValue {
    pub hosted_zone_id: String,
    pub dns_name: String,
    pub evaluate_target_health: bool,
}

/// A record set as currently stored by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: String,
    pub ttl: Option<i64>,
    pub values: Vec<String>,
    pub alias: Option<AliasValue>,
}

impl DnsRecord {
    /// Plain record with values and a TTL.
    pub fn simple(
        name: impl Into<String>,
        record_type: impl Into<String>,
        ttl: i64,
        values: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            record_type: record_type.into(),
            ttl: Some(ttl),
            values,
            alias: None,
        }
    }

    /// Short rendering of the stored value for logs and failure reasons.
    pub fn value_summary(&self) -> String {
        match &self.alias {
            Some(alias) => format!("ALIAS {}", alias.dns_name),
            None => self.values.join(","),
        }
    }
}

/// DNS provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("DNS provider throttled the request: {0}")]
    Throttled(String),

    #[error("DNS provider unavailable: {0}")]
    Unavailable(String),

    #[error("Hosted zone not found: {0}")]
    ZoneNotFound(String),

    /// Delete rejected because the supplied value no longer matches.
    #[error("Record value is stale: {0}")]
    StaleValue(String),

    #[error("DNS provider rejected request: {0}")]
    Rejected(String),

    /// The provider answered with something that violates its contract.
    #[error("Malformed DNS provider response: {0}")]
    Malformed(String),
}

impl Transience for DnsError {
    fn is_transient(&self) -> bool {
        matches!(self, DnsError::Throttled(_) | DnsError::Unavailable(_))
    }
}

/// Operations the engine needs from the authoritative DNS provider.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Look up the record set with exactly this name and type.
    async fn find_record(&self, id: &RecordId) -> Result<Option<DnsRecord>, DnsError>;

    /// Delete a record set, supplying its full current value.
    async fn delete_record(&self, zone_id: &str, record: &DnsRecord) -> Result<(), DnsError>;
}

/// Delete the record identified by `id` using its current stored value.
///
/// Returns `Ok(false)` when the record is already absent. A record set the
/// provider returns under a different name or type is never deleted. If the
/// record changes between the read and the delete, the value is re-read and
/// the delete retried once.
pub async fn delete_current(provider: &dyn DnsProvider, id: &RecordId) -> Result<bool, DnsError> {
    let mut retried = false;
    loop {
        let record = match provider.find_record(id).await? {
            Some(record) if id.matches(&record.name, &record.record_type) => record,
            _ => return Ok(false),
        };
        match provider.delete_record(&id.zone_id, &record).await {
            Ok(()) => return Ok(true),
            Err(DnsError::StaleValue(reason)) if !retried => {
                debug!(target: "verify.dns", record = %id, reason = %reason, "Stale value on delete, re-reading");
                retried = true;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`delete_current`] repeated through throttling and outages until
/// `spec.timeout`. Fatal provider errors are returned at once.
pub async fn delete_with_retry(
    provider: &dyn DnsProvider,
    id: &RecordId,
    spec: &PollSpec,
) -> Result<PollOutcome<bool>, DnsError> {
    poll(spec, || async {
        match delete_current(provider, id).await {
            Ok(deleted) => Ok(PollResult::Satisfied(deleted)),
            Err(e) => PollResult::from_error(e),
        }
    })
    .await
}
