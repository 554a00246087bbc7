use async_trait::async_trait;
use aws_sdk_rds::types::Tag;

use crate::error::CheckError;
use crate::tags::Tags;

use super::{RdsAdapter, TagOps, cloud_err};

#[async_trait]
impl TagOps for RdsAdapter {
    async fn get_tag(&self, arn: &str, key: &str) -> Result<String, CheckError> {
        let output = self
            .client()
            .list_tags_for_resource()
            .resource_name(arn)
            .send()
            .await
            .map_err(cloud_err)?;

        let tags = Tags::from(output.tag_list);
        Ok(tags.get(key).unwrap_or_default().to_string())
    }

    async fn set_tag(&self, arn: &str, key: &str, value: &str) -> Result<(), CheckError> {
        self.client()
            .remove_tags_from_resource()
            .resource_name(arn)
            .tag_keys(key)
            .send()
            .await
            .map_err(cloud_err)?;

        self.client()
            .add_tags_to_resource()
            .resource_name(arn)
            .tags(Tag::builder().key(key).value(value).build())
            .send()
            .await
            .map_err(cloud_err)?;

        Ok(())
    }

    async fn has_tag(&self, arn: &str, key: &str, value: &str) -> Result<bool, CheckError> {
        Ok(self.get_tag(arn, key).await? == value)
    }
}
