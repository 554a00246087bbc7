use async_trait::async_trait;

use crate::error::CheckError;

/// Fetches the raw configuration document from object storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, CheckError>;
}

pub struct S3ConfigStore {
    client: aws_sdk_s3::Client,
}

impl S3ConfigStore {
    pub fn new(client: aws_sdk_s3::Client) -> S3ConfigStore {
        S3ConfigStore { client }
    }
}

#[async_trait]
impl ConfigStore for S3ConfigStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, CheckError> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| CheckError::Config(format!("could not fetch s3://{bucket}/{key}: {err}")))?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|err| CheckError::Config(format!("could not read s3://{bucket}/{key}: {err}")))?;

        Ok(body.into_bytes().to_vec())
    }
}
