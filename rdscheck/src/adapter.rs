use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_rds::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_rds::types::{DbInstance, DbSnapshot};
use aws_smithy_types::error::display::DisplayErrorContext;

use crate::error::CheckError;

mod instances;
mod snapshots;
mod subnet_groups;
mod tag_ops;

pub use snapshots::{copy_target_id, old_snapshots};

/// Operations on the snapshots themselves: enumeration, cross-region
/// copy (with presigning for encrypted sources) and deletion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotOps: Send + Sync {
    /// Returns only `available` snapshots of `instance_id`, ascending by
    /// create time, ties broken by identifier.
    async fn list_snapshots(&self, instance_id: &str) -> Result<Vec<DbSnapshot>, CheckError>;

    /// Copies `snapshot` into this adapter's region under `target_id`,
    /// tagging the copy as owned by this system. An existing copy with
    /// the same identifier is treated as success. Empty `kms_key_id` and
    /// `pre_signed_url` are omitted from the request.
    async fn copy_snapshot(
        &self,
        snapshot: &DbSnapshot,
        source_region: &str,
        kms_key_id: &str,
        pre_signed_url: &str,
        target_id: &str,
    ) -> Result<(), CheckError>;

    /// Presigns a copy request for an encrypted snapshot living in
    /// `source_region`. The URL is valid for five minutes.
    async fn presign_copy_url(
        &self,
        source_region: &str,
        snapshot_arn: &str,
        kms_key_id: &str,
        target_id: &str,
    ) -> Result<String, CheckError>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CheckError>;
}

/// Operations on the database instance restored from a snapshot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstanceOps: Send + Sync {
    /// Restores `snapshot` into a fresh single-AZ, non-public instance
    /// named [`restored_instance_id`], attached to the subnet group named
    /// after the snapshot. An existing instance with the same identifier
    /// is treated as success.
    async fn restore_from_snapshot(
        &self,
        snapshot: &DbSnapshot,
        instance_class: &str,
        security_group_ids: &[String],
    ) -> Result<(), CheckError>;

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<DbInstance>, CheckError>;

    /// Returns the instance status string, or an empty string when the
    /// instance does not exist.
    async fn instance_status(&self, instance_id: &str) -> Result<String, CheckError>;

    /// Installs a new master password and blocks until the instance has
    /// been observed in `resetting-master-credentials`, polling every two
    /// seconds up to a bounded number of attempts.
    async fn set_master_password(&self, instance_id: &str, password: &str) -> Result<(), CheckError>;

    /// Deletes the restored instance, skipping the final snapshot and
    /// removing automated backups. A missing instance is treated as
    /// success so replays converge.
    async fn delete_instance(&self, instance_id: &str) -> Result<(), CheckError>;
}

/// Operations on the subnet group backing a restored instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkOps: Send + Sync {
    async fn subnet_group_exists(&self, name: &str) -> Result<bool, CheckError>;

    /// Creates the subnet group; an existing group with the same name is
    /// treated as success.
    async fn create_subnet_group(&self, name: &str, subnet_ids: &[String]) -> Result<(), CheckError>;

    async fn delete_subnet_group(&self, name: &str) -> Result<(), CheckError>;
}

/// Tag reads and writes. Tags are the only mutable state this system
/// keeps, so `set_tag` is the commit point of every transition.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TagOps: Send + Sync {
    /// Returns the tag value, or an empty string when the tag is absent.
    async fn get_tag(&self, arn: &str, key: &str) -> Result<String, CheckError>;

    /// Remove-then-add; the two calls are not atomic, and both must
    /// succeed for success to be reported.
    async fn set_tag(&self, arn: &str, key: &str, value: &str) -> Result<(), CheckError>;

    async fn has_tag(&self, arn: &str, key: &str, value: &str) -> Result<bool, CheckError>;
}

/// Region-bound RDS client implementing all four capability groups.
#[derive(Clone)]
pub struct RdsAdapter {
    client: Arc<aws_sdk_rds::Client>,
    region: String,
}

impl RdsAdapter {
    pub fn new(client: Arc<aws_sdk_rds::Client>, region: impl Into<String>) -> RdsAdapter {
        RdsAdapter {
            client,
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub(crate) fn client(&self) -> &aws_sdk_rds::Client {
        &self.client
    }
}

/// Name of the instance restored from `snapshot`.
pub fn restored_instance_id(snapshot: &DbSnapshot) -> String {
    format!(
        "{}-{}",
        snapshot.db_instance_identifier().unwrap_or_default(),
        snapshot.db_snapshot_identifier().unwrap_or_default()
    )
}

pub(crate) fn cloud_err<E>(err: SdkError<E>) -> CheckError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    CheckError::CloudApi {
        code: err.code().map(str::to_string),
        message: DisplayErrorContext(&err).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restored_instance_id_joins_instance_and_snapshot() {
        let snapshot = DbSnapshot::builder()
            .db_instance_identifier("mydb")
            .db_snapshot_identifier("rds:mydb-2024-01-01-00-01")
            .build();
        assert_eq!(restored_instance_id(&snapshot), "mydb-rds:mydb-2024-01-01-00-01");
    }
}
