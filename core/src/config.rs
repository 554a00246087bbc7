use crate::util::{env_int, env_list, env_string};

pub const DEFAULT_SOURCE_REGION: &str = "us-west-2";

/// Process-wide configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub s3_bucket: String,
    pub s3_key: String,
    pub source_region: String,
    pub security_group_ids: Vec<String>,
    pub subnet_ids: Vec<String>,
    pub default_retention: i32,
    pub datadog_api_key: String,
    pub datadog_app_key: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Settings> {
        let settings = Settings {
            s3_bucket: env_string("S3_BUCKET", ""),
            s3_key: env_string("S3_KEY", ""),
            source_region: env_string("AWS_REGION_SOURCE", DEFAULT_SOURCE_REGION),
            security_group_ids: env_list("AWS_SG_IDS"),
            subnet_ids: env_list("AWS_SUBNETS_IDS"),
            default_retention: env_int("SNAPSHOT_RETENTION", 1)?,
            datadog_api_key: env_string("DD_API_KEY", ""),
            datadog_app_key: env_string("DD_APP_KEY", ""),
        };

        tracing::debug!(
            source_region = %settings.source_region,
            s3_bucket = %settings.s3_bucket,
            s3_key = %settings.s3_key,
            "loaded settings from environment"
        );

        Ok(settings)
    }
}
