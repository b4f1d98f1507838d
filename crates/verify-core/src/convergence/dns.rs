//! DNS record convergence.

use super::settle;
use crate::dns::{self, DnsProvider, DnsRecord, RecordId};
use crate::poller::{poll, PollOutcome, PollResult, PollSpec};
use crate::report::CheckFailure;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Waits for records to appear in or vanish from the authoritative store.
#[derive(Clone)]
pub struct DnsConvergence {
    provider: Arc<dyn DnsProvider>,
}

impl DnsConvergence {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Self { provider }
    }

    /// Wait until a record with exactly this name and type exists.
    #[instrument(skip_all, fields(record = %id))]
    pub async fn wait_created(
        &self,
        id: &RecordId,
        spec: &PollSpec,
    ) -> Result<DnsRecord, CheckFailure> {
        let target = format!("DNS {} created", id);
        let spec = spec.retarget(target.clone());

        let outcome = poll(&spec, || async {
            match self.provider.find_record(id).await {
                Ok(Some(record)) if id.matches(&record.name, &record.record_type) => {
                    Ok(PollResult::Satisfied(record))
                }
                Ok(Some(other)) => Ok(PollResult::NotYetSatisfied(format!(
                    "provider returned {} {}",
                    other.name, other.record_type
                ))),
                Ok(None) => Ok(PollResult::NotYetSatisfied("record absent".to_string())),
                Err(e) => PollResult::from_error(e),
            }
        })
        .await
        .map_err(|e| CheckFailure::setup(&target, e.to_string()))?;

        let record = settle(&target, outcome)?;
        info!(
            target: "verify.dns",
            record = %id,
            value = %record.value_summary(),
            "Record visible"
        );
        Ok(record)
    }

    /// Wait until no record with this name and type exists.
    #[instrument(skip_all, fields(record = %id))]
    pub async fn wait_deleted(&self, id: &RecordId, spec: &PollSpec) -> Result<(), CheckFailure> {
        let target = format!("DNS {} deleted", id);
        let spec = spec.retarget(target.clone());

        let outcome = poll(&spec, || async {
            match self.provider.find_record(id).await {
                Ok(Some(record)) if id.matches(&record.name, &record.record_type) => {
                    Ok(PollResult::NotYetSatisfied(format!(
                        "record present ({})",
                        record.value_summary()
                    )))
                }
                Ok(_) => Ok(PollResult::Satisfied(())),
                Err(e) => PollResult::from_error(e),
            }
        })
        .await
        .map_err(|e| CheckFailure::setup(&target, e.to_string()))?;

        settle(&target, outcome)?;
        info!(target: "verify.dns", record = %id, "Record gone");
        Ok(())
    }

    /// Remove a stale record left by an earlier run and confirm it is gone.
    /// Any failure here means the case cannot start from a clean slate.
    /// Throttling and provider outages are retried within `spec`.
    #[instrument(skip_all, fields(record = %id))]
    pub async fn ensure_absent(&self, id: &RecordId, spec: &PollSpec) -> Result<(), CheckFailure> {
        let target = format!("DNS {} clean slate", id);

        let deleted = self
            .delete(id, &spec.retarget(target.clone()))
            .await
            .map_err(|reason| {
                CheckFailure::setup(&target, format!("stale record not removed: {}", reason))
            })?;

        if !deleted {
            return Ok(());
        }

        warn!(target: "verify.dns", record = %id, "Deleted stale record from a previous run");
        self.wait_deleted(id, spec).await.map_err(|failure| {
            CheckFailure::setup(&target, failure.to_string())
        })
    }

    /// Best-effort delete by current value, retried through transient errors
    /// within `spec`. Returns whether a record was removed.
    pub async fn delete_if_present(
        &self,
        id: &RecordId,
        spec: &PollSpec,
    ) -> Result<bool, CheckFailure> {
        let target = format!("DNS {} delete", id);
        self.delete(id, &spec.retarget(target.clone()))
            .await
            .map_err(|reason| CheckFailure::setup(&target, reason))
    }

    async fn delete(&self, id: &RecordId, spec: &PollSpec) -> Result<bool, String> {
        match dns::delete_with_retry(self.provider.as_ref(), id, spec).await {
            Ok(PollOutcome::Converged { value, .. }) => Ok(value),
            Ok(PollOutcome::TimedOut { last, attempts, .. }) => Err(format!(
                "gave up after {} attempts: {}",
                attempts, last
            )),
            Err(e) => Err(e.to_string()),
        }
    }
}
