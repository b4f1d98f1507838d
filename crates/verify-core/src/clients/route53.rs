//! Route 53 implementation of [`DnsProvider`].

use crate::dns::{AliasValue, DnsError, DnsProvider, DnsRecord, RecordId};
use async_trait::async_trait;
use aws_sdk_route53::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_route53::types::{
    AliasTarget, Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_route53::Client;
use tracing::{debug, info};

/// Service error codes worth retrying.
const THROTTLING_CODES: [&str; 3] = ["Throttling", "ThrottlingException", "PriorRequestNotComplete"];

/// DNS provider backed by a Route 53 client.
#[derive(Debug, Clone)]
pub struct Route53Dns {
    client: Client,
}

impl Route53Dns {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client configured from the default AWS credential and region chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

fn classify<E, R>(err: SdkError<E, R>) -> DnsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            DnsError::Unavailable(message)
        }
        SdkError::ServiceError(service) => match service.err().code() {
            Some(code) if THROTTLING_CODES.contains(&code) => DnsError::Throttled(message),
            Some("NoSuchHostedZone") => DnsError::ZoneNotFound(message),
            // Delete with values that no longer match the stored record set.
            Some("InvalidChangeBatch") => DnsError::StaleValue(message),
            Some("ServiceUnavailable") | Some("InternalFailure") => DnsError::Unavailable(message),
            _ => DnsError::Rejected(message),
        },
        _ => DnsError::Rejected(message),
    }
}

fn to_record(set: &ResourceRecordSet) -> DnsRecord {
    DnsRecord {
        name: set.name().to_string(),
        record_type: set.r#type().as_str().to_string(),
        ttl: set.ttl(),
        values: set
            .resource_records()
            .iter()
            .map(|record| record.value().to_string())
            .collect(),
        alias: set.alias_target().map(|alias| AliasValue {
            hosted_zone_id: alias.hosted_zone_id().to_string(),
            dns_name: alias.dns_name().to_string(),
            evaluate_target_health: alias.evaluate_target_health(),
        }),
    }
}

fn to_record_set(record: &DnsRecord) -> Result<ResourceRecordSet, DnsError> {
    let malformed = |e: aws_sdk_route53::error::BuildError| DnsError::Malformed(e.to_string());

    let mut builder = ResourceRecordSet::builder()
        .name(&record.name)
        .r#type(RrType::from(record.record_type.as_str()))
        .set_ttl(record.ttl);

    if let Some(alias) = &record.alias {
        builder = builder.alias_target(
            AliasTarget::builder()
                .hosted_zone_id(&alias.hosted_zone_id)
                .dns_name(&alias.dns_name)
                .evaluate_target_health(alias.evaluate_target_health)
                .build()
                .map_err(malformed)?,
        );
    } else {
        for value in &record.values {
            builder = builder.resource_records(
                ResourceRecord::builder()
                    .value(value)
                    .build()
                    .map_err(malformed)?,
            );
        }
    }

    builder.build().map_err(malformed)
}

#[async_trait]
impl DnsProvider for Route53Dns {
    async fn find_record(&self, id: &RecordId) -> Result<Option<DnsRecord>, DnsError> {
        let output = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(&id.zone_id)
            .start_record_name(&id.name)
            .start_record_type(RrType::from(id.record_type.as_str()))
            .max_items(1)
            .send()
            .await
            .map_err(classify)?;

        // Listing starts at the name; the first set may belong to the next name.
        let found = output
            .resource_record_sets()
            .iter()
            .find(|set| id.matches(set.name(), set.r#type().as_str()))
            .map(to_record);

        debug!(target: "verify.dns", record = %id, found = found.is_some(), "Queried record");
        Ok(found)
    }

    async fn delete_record(&self, zone_id: &str, record: &DnsRecord) -> Result<(), DnsError> {
        let change = Change::builder()
            .action(ChangeAction::Delete)
            .resource_record_set(to_record_set(record)?)
            .build()
            .map_err(|e| DnsError::Malformed(e.to_string()))?;
        let batch = ChangeBatch::builder()
            .changes(change)
            .comment("mesh-verify cleanup")
            .build()
            .map_err(|e| DnsError::Malformed(e.to_string()))?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(classify)?;

        info!(
            target: "verify.dns",
            zone = %zone_id,
            name = %record.name,
            record_type = %record.record_type,
            "Record deleted"
        );
        Ok(())
    }
}
