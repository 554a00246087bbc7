use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use aws_sdk_rds::presigning::PresigningConfig;
use aws_sdk_rds::types::{DbSnapshot, Tag};

use crate::error::CheckError;
use crate::tags::{self, SnapshotStatus};

use super::{RdsAdapter, SnapshotOps, cloud_err};

const AVAILABLE: &str = "available";
const PRESIGN_VALIDITY: Duration = Duration::from_secs(5 * 60);
const SECONDS_PER_DAY: i64 = 86_400;

#[async_trait]
impl SnapshotOps for RdsAdapter {
    async fn list_snapshots(&self, instance_id: &str) -> Result<Vec<DbSnapshot>, CheckError> {
        let mut snapshots = Vec::new();

        let mut pages = self
            .client()
            .describe_db_snapshots()
            .db_instance_identifier(instance_id)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(cloud_err)?;
            let Some(batch) = page.db_snapshots else {
                break;
            };
            snapshots.extend(
                batch
                    .into_iter()
                    .filter(|snapshot| snapshot.status() == Some(AVAILABLE)),
            );
        }

        sort_snapshots(&mut snapshots);
        Ok(snapshots)
    }

    async fn copy_snapshot(
        &self,
        snapshot: &DbSnapshot,
        source_region: &str,
        kms_key_id: &str,
        pre_signed_url: &str,
        target_id: &str,
    ) -> Result<(), CheckError> {
        let Some(arn) = snapshot.db_snapshot_arn() else {
            return Err(CheckError::CloudApi {
                code: None,
                message: "snapshot has no ARN".to_string(),
            });
        };
        let snapshot_id = snapshot.db_snapshot_identifier().unwrap_or_default();

        let mut request = self
            .client()
            .copy_db_snapshot()
            .source_region(source_region)
            .source_db_snapshot_identifier(arn)
            .target_db_snapshot_identifier(target_id)
            .set_tags(Some(copy_tags(snapshot_id)));
        if !kms_key_id.is_empty() {
            request = request.kms_key_id(kms_key_id);
        }
        if !pre_signed_url.is_empty() {
            request = request.pre_signed_url(pre_signed_url);
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(
                    snapshot = snapshot_id,
                    from = source_region,
                    destination = self.region(),
                    "snapshot copied"
                );
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|err| err.is_db_snapshot_already_exists_fault()) =>
            {
                tracing::info!(snapshot = snapshot_id, "snapshot already exists");
                Ok(())
            }
            Err(err) => Err(cloud_err(err)),
        }
    }

    async fn presign_copy_url(
        &self,
        source_region: &str,
        snapshot_arn: &str,
        kms_key_id: &str,
        target_id: &str,
    ) -> Result<String, CheckError> {
        let mut request = self
            .client()
            .copy_db_snapshot()
            .source_region(source_region)
            .source_db_snapshot_identifier(snapshot_arn)
            .target_db_snapshot_identifier(target_id);
        if !kms_key_id.is_empty() {
            request = request.kms_key_id(kms_key_id);
        }

        let config = PresigningConfig::expires_in(PRESIGN_VALIDITY).map_err(|err| CheckError::CloudApi {
            code: None,
            message: format!("could not build presigning config: {err}"),
        })?;

        let presigned = request.presigned(config).await.map_err(cloud_err)?;
        Ok(presigned.uri().to_string())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CheckError> {
        self.client()
            .delete_db_snapshot()
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
            .map_err(cloud_err)?;

        tracing::info!(snapshot = snapshot_id, "snapshot deleted");
        Ok(())
    }
}

fn copy_tags(snapshot_id: &str) -> Vec<Tag> {
    vec![
        Tag::builder()
            .key(tags::CREATED_BY)
            .value(tags::CREATED_BY_VALUE)
            .build(),
        Tag::builder().key(tags::RDS_INSTANCE).value(snapshot_id).build(),
        Tag::builder()
            .key(tags::STATUS)
            .value(SnapshotStatus::Ready.as_str())
            .build(),
        Tag::builder().key(tags::CHECKS_FAILED).value("no").build(),
    ]
}

fn sort_snapshots(snapshots: &mut [DbSnapshot]) {
    snapshots.sort_by_key(|snapshot| {
        let created = snapshot.snapshot_create_time();
        (
            created.map(|t| t.secs()).unwrap_or(i64::MIN),
            created.map(|t| t.subsec_nanos()).unwrap_or(0),
            snapshot.db_snapshot_identifier().unwrap_or_default().to_string(),
        )
    });
}

/// Walks `snapshots` (which must be sorted ascending by create time) and
/// returns the prefix created strictly before `now` minus the retention.
/// Non-`available` entries are skipped without terminating the walk.
pub fn old_snapshots(snapshots: &[DbSnapshot], retention_days: i32, now: SystemTime) -> Vec<DbSnapshot> {
    let now_secs = now
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);
    let cutoff = now_secs - i64::from(retention_days) * SECONDS_PER_DAY;

    let mut old = Vec::new();
    for snapshot in snapshots {
        if snapshot.status() != Some(AVAILABLE) {
            continue;
        }
        let Some(created) = snapshot.snapshot_create_time() else {
            continue;
        };
        if created.secs() >= cutoff {
            break;
        }
        old.push(snapshot.clone());
    }
    old
}

/// The copy target identifier: the last `:`-delimited component of the
/// snapshot's resource name. Automated snapshot ARNs end in
/// `snapshot:rds:<name>`, so this strips the `rds:` prefix as well.
pub fn copy_target_id(resource_name: &str) -> &str {
    resource_name.rsplit(':').next().unwrap_or(resource_name)
}
