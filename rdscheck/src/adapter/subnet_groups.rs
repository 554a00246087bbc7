use async_trait::async_trait;
use aws_sdk_rds::types::Tag;

use crate::error::CheckError;
use crate::tags;

use super::{NetworkOps, RdsAdapter, cloud_err};

#[async_trait]
impl NetworkOps for RdsAdapter {
    async fn subnet_group_exists(&self, name: &str) -> Result<bool, CheckError> {
        match self
            .client()
            .describe_db_subnet_groups()
            .db_subnet_group_name(name)
            .send()
            .await
        {
            Ok(output) => Ok(output
                .db_subnet_groups()
                .iter()
                .any(|group| group.db_subnet_group_name() == Some(name))),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|err| err.is_db_subnet_group_not_found_fault()) =>
            {
                Ok(false)
            }
            Err(err) => Err(cloud_err(err)),
        }
    }

    async fn create_subnet_group(&self, name: &str, subnet_ids: &[String]) -> Result<(), CheckError> {
        let request = self
            .client()
            .create_db_subnet_group()
            .db_subnet_group_name(name)
            .db_subnet_group_description(name)
            .set_subnet_ids(Some(subnet_ids.to_vec()))
            .set_tags(Some(vec![
                Tag::builder()
                    .key(tags::CREATED_BY)
                    .value(tags::CREATED_BY_VALUE)
                    .build(),
                Tag::builder().key(tags::SNAPSHOT).value(name).build(),
            ]));

        match request.send().await {
            Ok(_) => {
                tracing::info!(subnet_group = name, "subnet group created");
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|err| err.is_db_subnet_group_already_exists_fault()) =>
            {
                Ok(())
            }
            Err(err) => Err(cloud_err(err)),
        }
    }

    async fn delete_subnet_group(&self, name: &str) -> Result<(), CheckError> {
        self.client()
            .delete_db_subnet_group()
            .db_subnet_group_name(name)
            .send()
            .await
            .map_err(cloud_err)?;

        tracing::info!(subnet_group = name, "subnet group deleted");
        Ok(())
    }
}
