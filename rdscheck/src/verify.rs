use async_trait::async_trait;
use aws_sdk_rds::types::DbInstance;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use sqlx::postgres::{PgColumn, PgConnectOptions, PgRow, PgSslMode};
use sqlx::{Column, Connection, PgConnection, Row, TypeInfo};

use crate::config::Query;
use crate::error::CheckError;

const POSTGRES: &str = "postgres";

/// Connection parameters for a restored instance, assembled from the
/// instance description and the target's credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectSpec {
    pub engine: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl ConnectSpec {
    pub fn from_instance(instance: &DbInstance, password: &str, database: &str) -> Result<ConnectSpec, CheckError> {
        let endpoint = instance
            .endpoint()
            .ok_or_else(|| CheckError::Database("instance has no endpoint".to_string()))?;
        let host = endpoint
            .address()
            .ok_or_else(|| CheckError::Database("instance endpoint has no address".to_string()))?;
        let port = endpoint
            .port()
            .ok_or_else(|| CheckError::Database("instance endpoint has no port".to_string()))?;
        let port = u16::try_from(port)
            .map_err(|_| CheckError::Database(format!("instance endpoint port {port} out of range")))?;
        let username = instance
            .master_username()
            .ok_or_else(|| CheckError::Database("instance has no master username".to_string()))?;

        Ok(ConnectSpec {
            engine: instance.engine().unwrap_or_default().to_string(),
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            database: database.to_string(),
        })
    }
}

/// Runs the configured verification queries against a restored instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SqlRunner: Send + Sync {
    /// Executes each query in order and matches its pattern against the
    /// textual form of every cell of every returned row. The first query
    /// with no matching cell short-circuits with
    /// [`CheckError::Mismatch`].
    async fn run_checks(&self, spec: &ConnectSpec, queries: &[Query]) -> Result<(), CheckError>;
}

#[derive(Debug, Default)]
pub struct PgRunner;

#[async_trait]
impl SqlRunner for PgRunner {
    async fn run_checks(&self, spec: &ConnectSpec, queries: &[Query]) -> Result<(), CheckError> {
        if spec.engine != POSTGRES {
            return Err(CheckError::Database(format!(
                "unsupported engine {:?}, only postgres is supported",
                spec.engine
            )));
        }

        let patterns = queries
            .iter()
            .map(|query| {
                Regex::new(&query.regex).map_err(|source| CheckError::Pattern {
                    pattern: query.regex.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let options = PgConnectOptions::new()
            .host(&spec.host)
            .port(spec.port)
            .username(&spec.username)
            .password(&spec.password)
            .database(&spec.database)
            .ssl_mode(PgSslMode::Disable);

        let mut conn = PgConnection::connect_with(&options).await.map_err(|err| {
            CheckError::Database(format!("could not connect to {}:{}: {err}", spec.host, spec.port))
        })?;

        for (query, pattern) in queries.iter().zip(&patterns) {
            let rows = sqlx::query(&query.query)
                .fetch_all(&mut conn)
                .await
                .map_err(|err| CheckError::Database(format!("query {:?} failed: {err}", query.query)))?;

            let rows: Vec<_> = rows.iter().map(row_cells).collect();
            if !rows_match(&rows, pattern) {
                return Err(CheckError::Mismatch {
                    query: query.query.clone(),
                    pattern: query.regex.clone(),
                });
            }

            tracing::info!(query = %query.query, regex = %query.regex, "query matched");
        }

        let _ = conn.close().await;
        Ok(())
    }
}

/// True when any cell of any row matches, in column-discovery order.
pub(crate) fn rows_match(rows: &[Vec<(String, String)>], pattern: &Regex) -> bool {
    rows.iter()
        .flat_map(|row| row.iter())
        .any(|(_, text)| pattern.is_match(text))
}

fn row_cells(row: &PgRow) -> Vec<(String, String)> {
    let mut cells = Vec::new();
    for (index, column) in row.columns().iter().enumerate() {
        match cell_text(row, index, column) {
            Some(text) => cells.push((column.name().to_string(), text)),
            None => tracing::debug!(
                column = column.name(),
                r#type = column.type_info().name(),
                "skipping cell with unsupported type"
            ),
        }
    }
    cells
}

fn cell_text(row: &PgRow, index: usize, column: &PgColumn) -> Option<String> {
    match column.type_info().name() {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row.try_get::<Option<String>, _>(index).ok().flatten(),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.to_string()),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.to_string()),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.to_string()),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.to_string()),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.to_string()),
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.to_string()),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.to_string()),
        _ => row.try_get::<Option<String>, _>(index).ok().flatten(),
    }
}
