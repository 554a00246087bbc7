use async_trait::async_trait;
use serde::Serialize;

use crate::error::CheckError;

pub const CHECK_NAME: &str = "rdscheck.status";

const DATADOG_ENDPOINT: &str = "https://api.datadoghq.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl CheckStatus {
    pub fn code(self) -> u8 {
        match self {
            CheckStatus::Ok => 0,
            CheckStatus::Warning => 1,
            CheckStatus::Critical => 2,
            CheckStatus::Unknown => 3,
        }
    }
}

/// Which entry point emitted the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Copy,
    Check,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Copy => "copy",
            Command::Check => "check",
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct CheckRun {
    pub check: String,
    pub timestamp: u64,
    pub status: u8,
    pub tags: Vec<String>,
}

pub fn check_run(database: &str, snapshot: &str, command: Command, status: CheckStatus) -> CheckRun {
    CheckRun {
        check: CHECK_NAME.to_string(),
        timestamp: rdscheck_core::util::unix_timestamp(),
        status: status.code(),
        tags: vec![
            format!("database:{database}"),
            format!("snapshot:{snapshot}"),
            format!("command:{}", command.as_str()),
        ],
    }
}

/// Reports one event per check to an external metrics service. Sink
/// failures never change lifecycle state; callers log and move on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn post_check(
        &self,
        database: &str,
        snapshot: &str,
        command: Command,
        status: CheckStatus,
    ) -> Result<(), CheckError>;
}

pub struct DatadogSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    application_key: String,
}

impl DatadogSink {
    pub fn new(api_key: &str, application_key: &str) -> DatadogSink {
        DatadogSink {
            client: reqwest::Client::new(),
            endpoint: DATADOG_ENDPOINT.to_string(),
            api_key: api_key.to_string(),
            application_key: application_key.to_string(),
        }
    }
}

#[async_trait]
impl MetricsSink for DatadogSink {
    async fn post_check(
        &self,
        database: &str,
        snapshot: &str,
        command: Command,
        status: CheckStatus,
    ) -> Result<(), CheckError> {
        let run = check_run(database, snapshot, command, status);

        let response = self
            .client
            .post(format!("{}/api/v1/check_run", self.endpoint))
            .header("DD-API-KEY", &self.api_key)
            .header("DD-APPLICATION-KEY", &self.application_key)
            .json(&run)
            .send()
            .await
            .map_err(|err| CheckError::CloudApi {
                code: None,
                message: format!("could not post check run: {err}"),
            })?;

        if !response.status().is_success() {
            return Err(CheckError::CloudApi {
                code: Some(response.status().as_str().to_string()),
                message: format!("check run for snapshot {snapshot} rejected"),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_check_run_api() {
        assert_eq!(CheckStatus::Ok.code(), 0);
        assert_eq!(CheckStatus::Warning.code(), 1);
        assert_eq!(CheckStatus::Critical.code(), 2);
        assert_eq!(CheckStatus::Unknown.code(), 3);
    }

    #[test]
    fn check_run_carries_database_snapshot_and_command_tags() {
        let run = check_run("mydb", "rds:mydb-2024-01-01-00-01", Command::Copy, CheckStatus::Critical);

        assert_eq!(run.check, CHECK_NAME);
        assert_eq!(run.status, 2);
        assert_eq!(
            run.tags,
            vec![
                "database:mydb".to_string(),
                "snapshot:rds:mydb-2024-01-01-00-01".to_string(),
                "command:copy".to_string(),
            ]
        );
        assert!(run.timestamp > 0);
    }

    #[test]
    fn check_run_serializes_to_expected_shape() {
        let run = check_run("mydb", "snap", Command::Check, CheckStatus::Ok);
        let value = serde_json::to_value(&run).unwrap();

        assert_eq!(value["check"], "rdscheck.status");
        assert_eq!(value["status"], 0);
        assert_eq!(value["tags"][2], "command:check");
    }
}
