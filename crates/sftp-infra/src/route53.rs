use async_trait::async_trait;
use aws_sdk_route53::Client;
use aws_sdk_route53::error::DisplayErrorContext;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use tracing::info;

use sftp_core::types::DnsAliasRecord;
use sftp_core::{DnsApi, Error, Result};

/// Route 53 record API using the `aws-sdk-route53` crate.
///
/// Only CNAME records are read or written. The change is submitted without
/// waiting for it to reach `INSYNC`.
pub struct Route53DnsApi {
    client: Client,
}

impl Route53DnsApi {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

/// Route 53 returns fully qualified names with a trailing dot.
fn same_name(returned: &str, wanted: &str) -> bool {
    returned
        .trim_end_matches('.')
        .eq_ignore_ascii_case(wanted.trim_end_matches('.'))
}

fn api_error(op: &str, e: impl std::error::Error) -> Error {
    Error::Dns(format!("{op}: {}", DisplayErrorContext(e)))
}

fn build_error(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Dns(format!("build {what}: {e}"))
}

fn change_batch(record: &DnsAliasRecord) -> Result<ChangeBatch> {
    let value = ResourceRecord::builder()
        .value(&record.target)
        .build()
        .map_err(|e| build_error("resource record", e))?;

    let set = ResourceRecordSet::builder()
        .name(&record.name)
        .r#type(RrType::Cname)
        .ttl(record.ttl)
        .resource_records(value)
        .build()
        .map_err(|e| build_error("record set", e))?;

    let change = Change::builder()
        .action(ChangeAction::Upsert)
        .resource_record_set(set)
        .build()
        .map_err(|e| build_error("change", e))?;

    ChangeBatch::builder()
        .comment(format!(
            "sftp alias update {}",
            chrono::Utc::now().timestamp()
        ))
        .changes(change)
        .build()
        .map_err(|e| build_error("change batch", e))
}

#[async_trait]
impl DnsApi for Route53DnsApi {
    async fn find_record(&self, zone_id: &str, name: &str) -> Result<Option<DnsAliasRecord>> {
        let out = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(zone_id)
            .start_record_name(name)
            .start_record_type(RrType::Cname)
            .send()
            .await
            .map_err(|e| api_error("list record sets", e))?;

        let record = out
            .resource_record_sets()
            .iter()
            .find(|set| same_name(set.name(), name) && *set.r#type() == RrType::Cname)
            .and_then(|set| {
                set.resource_records().first().map(|value| DnsAliasRecord {
                    name: name.to_string(),
                    target: value.value().to_string(),
                    ttl: set.ttl().unwrap_or_default(),
                })
            });

        Ok(record)
    }

    async fn upsert_record(&self, zone_id: &str, record: &DnsAliasRecord) -> Result<()> {
        self.client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(change_batch(record)?)
            .send()
            .await
            .map_err(|e| api_error("change record sets", e))?;

        info!(
            zone_id,
            record = %record.name,
            target = %record.target,
            "route53: alias upserted"
        );
        Ok(())
    }
}
