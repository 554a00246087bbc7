use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_rds::types::{DbInstance, DbSnapshot, Tag};

use crate::error::CheckError;
use crate::tags;

use super::{InstanceOps, RdsAdapter, cloud_err, restored_instance_id};

const PASSWORD_RESET_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PASSWORD_RESET_MAX_ATTEMPTS: u32 = 150;
const RESETTING_CREDENTIALS: &str = "resetting-master-credentials";

#[async_trait]
impl InstanceOps for RdsAdapter {
    async fn restore_from_snapshot(
        &self,
        snapshot: &DbSnapshot,
        instance_class: &str,
        security_group_ids: &[String],
    ) -> Result<(), CheckError> {
        let Some(snapshot_id) = snapshot.db_snapshot_identifier() else {
            return Err(CheckError::CloudApi {
                code: None,
                message: "snapshot has no identifier".to_string(),
            });
        };
        let instance_id = restored_instance_id(snapshot);

        let mut request = self
            .client()
            .restore_db_instance_from_db_snapshot()
            .auto_minor_version_upgrade(false)
            .db_instance_class(instance_class)
            .db_instance_identifier(&instance_id)
            .db_snapshot_identifier(snapshot_id)
            .db_subnet_group_name(snapshot_id)
            .deletion_protection(false)
            .multi_az(false)
            .publicly_accessible(false)
            .set_vpc_security_group_ids(Some(security_group_ids.to_vec()))
            .set_tags(Some(restore_tags(snapshot_id)));
        if let Some(engine) = snapshot.engine() {
            request = request.engine(engine);
        }
        if let Some(port) = snapshot.port() {
            request = request.port(port);
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(rds_instance = %instance_id, snapshot = snapshot_id, "instance restored from snapshot");
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|err| err.is_db_instance_already_exists_fault()) =>
            {
                tracing::info!(rds_instance = %instance_id, "instance already exists");
                Ok(())
            }
            Err(err) => Err(cloud_err(err)),
        }
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<DbInstance>, CheckError> {
        match self
            .client()
            .describe_db_instances()
            .db_instance_identifier(instance_id)
            .send()
            .await
        {
            Ok(output) => Ok(output.db_instances.and_then(|instances| instances.into_iter().next())),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|err| err.is_db_instance_not_found_fault()) =>
            {
                Ok(None)
            }
            Err(err) => Err(cloud_err(err)),
        }
    }

    async fn instance_status(&self, instance_id: &str) -> Result<String, CheckError> {
        let instance = self.describe_instance(instance_id).await?;
        Ok(instance
            .and_then(|instance| instance.db_instance_status)
            .unwrap_or_default())
    }

    async fn set_master_password(&self, instance_id: &str, password: &str) -> Result<(), CheckError> {
        self.client()
            .modify_db_instance()
            .db_instance_identifier(instance_id)
            .master_user_password(password)
            .send()
            .await
            .map_err(cloud_err)?;

        for _ in 0..PASSWORD_RESET_MAX_ATTEMPTS {
            tokio::time::sleep(PASSWORD_RESET_POLL_INTERVAL).await;
            let Some(instance) = self.describe_instance(instance_id).await? else {
                continue;
            };
            if instance.db_instance_status() == Some(RESETTING_CREDENTIALS) {
                return Ok(());
            }
        }

        Err(CheckError::timeout(format!(
            "instance {instance_id} never reported {RESETTING_CREDENTIALS}"
        )))
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), CheckError> {
        match self
            .client()
            .delete_db_instance()
            .db_instance_identifier(instance_id)
            .skip_final_snapshot(true)
            .delete_automated_backups(true)
            .send()
            .await
        {
            Ok(_) => {
                tracing::info!(rds_instance = instance_id, "instance deleted");
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|err| err.is_db_instance_not_found_fault()) =>
            {
                Ok(())
            }
            Err(err) => Err(cloud_err(err)),
        }
    }
}

fn restore_tags(snapshot_id: &str) -> Vec<Tag> {
    vec![
        Tag::builder()
            .key(tags::CREATED_BY)
            .value(tags::CREATED_BY_VALUE)
            .build(),
        Tag::builder().key(tags::SNAPSHOT).value(snapshot_id).build(),
        Tag::builder().key(tags::STATUS).value("testing").build(),
    ]
}
