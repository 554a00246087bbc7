use std::sync::Arc;
use std::time::SystemTime;

use aws_sdk_rds::types::DbSnapshot;

use crate::adapter::{SnapshotOps, TagOps, copy_target_id, old_snapshots};
use crate::config::Instance;
use crate::error::CheckError;
use crate::metrics::{CheckStatus, Command, MetricsSink};
use crate::tags;

const AUTOMATED: &str = "automated";

/// Copies a target's automated snapshots into the destination region and
/// retires destination copies older than the target's retention.
pub struct CopyStage {
    source: Arc<dyn SnapshotOps>,
    destination: Arc<dyn SnapshotOps>,
    destination_tags: Arc<dyn TagOps>,
    metrics: Arc<dyn MetricsSink>,
    source_region: String,
}

impl CopyStage {
    pub fn new(
        source: Arc<dyn SnapshotOps>,
        destination: Arc<dyn SnapshotOps>,
        destination_tags: Arc<dyn TagOps>,
        metrics: Arc<dyn MetricsSink>,
        source_region: String,
    ) -> CopyStage {
        CopyStage {
            source,
            destination,
            destination_tags,
            metrics,
            source_region,
        }
    }

    /// A copy or delete failure emits a critical check and abandons the
    /// rest of this target; a listing failure aborts the invocation.
    pub async fn run_target(&self, target: &Instance) -> Result<(), CheckError> {
        let snapshots = self.source.list_snapshots(&target.name).await?;

        for snapshot in &snapshots {
            if snapshot.snapshot_type() != Some(AUTOMATED) {
                continue;
            }

            let database = snapshot.db_instance_identifier().unwrap_or_default();
            let id = snapshot.db_snapshot_identifier().unwrap_or_default();

            self.emit(database, id, CheckStatus::Ok).await;

            if let Err(err) = self.copy_one(target, snapshot).await {
                tracing::error!(snapshot = id, error = %err, "could not copy snapshot");
                self.emit(database, id, CheckStatus::Critical).await;
                return Ok(());
            }
        }

        self.retire_old(target).await
    }

    async fn copy_one(&self, target: &Instance, snapshot: &DbSnapshot) -> Result<(), CheckError> {
        let Some(arn) = snapshot.db_snapshot_arn() else {
            return Err(CheckError::CloudApi {
                code: None,
                message: "snapshot has no ARN".to_string(),
            });
        };
        let target_id = copy_target_id(arn);

        let pre_signed_url = if snapshot.encrypted().unwrap_or(false) {
            self.destination
                .presign_copy_url(&self.source_region, arn, target.kms_id(), target_id)
                .await?
        } else {
            String::new()
        };

        self.destination
            .copy_snapshot(snapshot, &self.source_region, target.kms_id(), &pre_signed_url, target_id)
            .await
    }

    async fn retire_old(&self, target: &Instance) -> Result<(), CheckError> {
        let snapshots = self.destination.list_snapshots(&target.name).await?;
        let old = old_snapshots(&snapshots, target.retention_days(), SystemTime::now());

        for snapshot in &old {
            let Some(arn) = snapshot.db_snapshot_arn() else {
                continue;
            };
            match self
                .destination_tags
                .has_tag(arn, tags::CREATED_BY, tags::CREATED_BY_VALUE)
                .await
            {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "could not read snapshot tags");
                    continue;
                }
            }

            let database = snapshot.db_instance_identifier().unwrap_or_default();
            let id = snapshot.db_snapshot_identifier().unwrap_or_default();

            self.emit(database, id, CheckStatus::Ok).await;

            if let Err(err) = self.destination.delete_snapshot(id).await {
                tracing::error!(snapshot = id, error = %err, "could not delete old snapshot");
                self.emit(database, id, CheckStatus::Critical).await;
                return Ok(());
            }
        }

        Ok(())
    }

    async fn emit(&self, database: &str, snapshot: &str, status: CheckStatus) {
        if let Err(err) = self.metrics.post_check(database, snapshot, Command::Copy, status).await {
            tracing::warn!(snapshot, error = %err, "could not post check status");
        }
    }
}
