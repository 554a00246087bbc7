use std::sync::Arc;

use aws_sdk_rds::types::DbSnapshot;

use crate::adapter::{InstanceOps, NetworkOps, SnapshotOps, TagOps, restored_instance_id};
use crate::config::Instance;
use crate::error::CheckError;
use crate::metrics::{CheckStatus, Command, MetricsSink};
use crate::tags::{self, SnapshotStatus};
use crate::verify::{ConnectSpec, SqlRunner};

const AVAILABLE: &str = "available";

/// Drives each owned snapshot through its lifecycle, one transition per
/// snapshot per invocation. All state lives in the `Status` tag, so
/// re-entry after a crash resumes where the last committed transition
/// left off.
pub struct Checker {
    snapshots: Arc<dyn SnapshotOps>,
    instances: Arc<dyn InstanceOps>,
    tags: Arc<dyn TagOps>,
    network: Arc<dyn NetworkOps>,
    metrics: Arc<dyn MetricsSink>,
    sql: Arc<dyn SqlRunner>,
    security_group_ids: Vec<String>,
    subnet_ids: Vec<String>,
}

impl Checker {
    pub fn new(
        snapshots: Arc<dyn SnapshotOps>,
        instances: Arc<dyn InstanceOps>,
        tags: Arc<dyn TagOps>,
        network: Arc<dyn NetworkOps>,
        metrics: Arc<dyn MetricsSink>,
        sql: Arc<dyn SqlRunner>,
        security_group_ids: Vec<String>,
        subnet_ids: Vec<String>,
    ) -> Checker {
        Checker {
            snapshots,
            instances,
            tags,
            network,
            metrics,
            sql,
            security_group_ids,
            subnet_ids,
        }
    }

    /// Applies one transition to every owned snapshot of `target`.
    /// Per-snapshot failures are logged and do not stop the traversal;
    /// a listing failure aborts the target.
    pub async fn run_target(&self, target: &Instance) -> Result<(), CheckError> {
        let snapshots = self.snapshots.list_snapshots(&target.name).await?;

        for snapshot in &snapshots {
            let Some(arn) = snapshot.db_snapshot_arn() else {
                continue;
            };

            match self.tags.has_tag(arn, tags::CREATED_BY, tags::CREATED_BY_VALUE).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::warn!(
                        snapshot = snapshot.db_snapshot_identifier().unwrap_or_default(),
                        error = %err,
                        "could not read snapshot tags"
                    );
                    continue;
                }
            }

            if let Err(err) = self.step(target, snapshot).await {
                tracing::error!(
                    rds_instance = snapshot.db_instance_identifier().unwrap_or_default(),
                    snapshot = snapshot.db_snapshot_identifier().unwrap_or_default(),
                    error = %err,
                    "snapshot check failed"
                );
            }
        }

        Ok(())
    }

    /// Applies at most one lifecycle transition to `snapshot`. A missing
    /// or unknown `Status` tag is a no-op, which also covers the window
    /// where a crashed `set_tag` removed the tag without re-adding it.
    pub async fn step(&self, target: &Instance, snapshot: &DbSnapshot) -> Result<(), CheckError> {
        let Some(arn) = snapshot.db_snapshot_arn() else {
            return Ok(());
        };

        let status = self.tags.get_tag(arn, tags::STATUS).await?;
        let Some(status) = SnapshotStatus::parse(&status) else {
            return Ok(());
        };

        match status {
            SnapshotStatus::Ready => self.on_ready(snapshot, arn).await,
            SnapshotStatus::Restore => self.on_restore(target, snapshot, arn).await,
            SnapshotStatus::Modify => self.on_modify(target, snapshot, arn).await,
            SnapshotStatus::Verify => self.on_verify(target, snapshot, arn).await,
            SnapshotStatus::Alarm => self.on_alarm(snapshot, arn).await,
            SnapshotStatus::Clean => self.on_clean(snapshot, arn).await,
            SnapshotStatus::Tested => self.on_tested(snapshot).await,
        }
    }

    async fn on_ready(&self, snapshot: &DbSnapshot, arn: &str) -> Result<(), CheckError> {
        self.emit(snapshot, CheckStatus::Ok).await;

        let Some(name) = snapshot.db_snapshot_identifier() else {
            return Ok(());
        };

        if let Err(err) = self.network.create_subnet_group(name, &self.subnet_ids).await {
            self.to_alarm(arn).await;
            return Err(err);
        }

        self.set_status(arn, SnapshotStatus::Restore).await
    }

    async fn on_restore(&self, target: &Instance, snapshot: &DbSnapshot, arn: &str) -> Result<(), CheckError> {
        if let Err(err) = self
            .instances
            .restore_from_snapshot(snapshot, &target.instance_type, &self.security_group_ids)
            .await
        {
            self.to_alarm(arn).await;
            return Err(err);
        }

        self.set_status(arn, SnapshotStatus::Modify).await
    }

    async fn on_modify(&self, target: &Instance, snapshot: &DbSnapshot, arn: &str) -> Result<(), CheckError> {
        let instance_id = restored_instance_id(snapshot);

        let status = match self.instances.instance_status(&instance_id).await {
            Ok(status) => status,
            Err(err) => {
                self.to_alarm(arn).await;
                return Err(err);
            }
        };
        if status != AVAILABLE {
            return Ok(());
        }

        match self.instances.describe_instance(&instance_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.to_alarm(arn).await;
                return Err(CheckError::CloudApi {
                    code: Some("NotFound".to_string()),
                    message: format!("restored instance {instance_id} not found"),
                });
            }
            Err(err) => {
                self.to_alarm(arn).await;
                return Err(err);
            }
        }

        if let Err(err) = self.instances.set_master_password(&instance_id, &target.password).await {
            self.to_alarm(arn).await;
            return Err(err);
        }

        self.set_status(arn, SnapshotStatus::Verify).await
    }

    async fn on_verify(&self, target: &Instance, snapshot: &DbSnapshot, arn: &str) -> Result<(), CheckError> {
        let instance_id = restored_instance_id(snapshot);

        let status = match self.instances.instance_status(&instance_id).await {
            Ok(status) => status,
            Err(err) => {
                self.to_alarm(arn).await;
                return Err(err);
            }
        };
        if status != AVAILABLE {
            return Ok(());
        }

        let info = match self.instances.describe_instance(&instance_id).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                self.to_alarm(arn).await;
                return Err(CheckError::CloudApi {
                    code: Some("NotFound".to_string()),
                    message: format!("restored instance {instance_id} not found"),
                });
            }
            Err(err) => {
                self.to_alarm(arn).await;
                return Err(err);
            }
        };

        if let Some(db_name) = info.db_name()
            && !target.database.is_empty()
            && db_name != target.database
        {
            tracing::warn!(
                rds_instance = %instance_id,
                db_name,
                expected = %target.database,
                "database name does not match target, skipping verification"
            );
            return Ok(());
        }

        let spec = match ConnectSpec::from_instance(&info, &target.password, &target.database) {
            Ok(spec) => spec,
            Err(err) => {
                self.to_alarm(arn).await;
                return Err(err);
            }
        };

        match self.sql.run_checks(&spec, &target.queries).await {
            Ok(()) => self.set_status(arn, SnapshotStatus::Clean).await,
            Err(err) => {
                if let CheckError::Mismatch { query, pattern } = &err {
                    tracing::error!(
                        rds_instance = %instance_id,
                        query = %query,
                        regex = %pattern,
                        "query match failed"
                    );
                }
                self.to_alarm(arn).await;
                Err(err)
            }
        }
    }

    async fn on_alarm(&self, snapshot: &DbSnapshot, arn: &str) -> Result<(), CheckError> {
        self.emit(snapshot, CheckStatus::Critical).await;

        self.tags.set_tag(arn, tags::CHECKS_FAILED, "yes").await?;

        // Draining through clean guarantees a failed snapshot still
        // releases its restored instance and subnet group.
        self.set_status(arn, SnapshotStatus::Clean).await
    }

    async fn on_clean(&self, snapshot: &DbSnapshot, arn: &str) -> Result<(), CheckError> {
        let instance_id = restored_instance_id(snapshot);
        self.instances.delete_instance(&instance_id).await?;
        self.set_status(arn, SnapshotStatus::Tested).await
    }

    async fn on_tested(&self, snapshot: &DbSnapshot) -> Result<(), CheckError> {
        let instance_id = restored_instance_id(snapshot);
        if !self.instances.instance_status(&instance_id).await?.is_empty() {
            return Ok(());
        }

        let Some(name) = snapshot.db_snapshot_identifier() else {
            return Ok(());
        };
        if !self.network.subnet_group_exists(name).await? {
            return Ok(());
        }

        self.network.delete_subnet_group(name).await
    }

    async fn emit(&self, snapshot: &DbSnapshot, status: CheckStatus) {
        let database = snapshot.db_instance_identifier().unwrap_or_default();
        let id = snapshot.db_snapshot_identifier().unwrap_or_default();
        if let Err(err) = self.metrics.post_check(database, id, Command::Check, status).await {
            tracing::warn!(snapshot = id, error = %err, "could not post check status");
        }
    }

    async fn set_status(&self, arn: &str, status: SnapshotStatus) -> Result<(), CheckError> {
        self.tags.set_tag(arn, tags::STATUS, status.as_str()).await
    }

    async fn to_alarm(&self, arn: &str) {
        if let Err(err) = self.set_status(arn, SnapshotStatus::Alarm).await {
            tracing::error!(error = %err, "could not set alarm status");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use aws_sdk_rds::types::{DbInstance, Endpoint};

    use crate::adapter::{MockInstanceOps, MockNetworkOps, MockSnapshotOps, MockTagOps};
    use crate::config::Query;
    use crate::metrics::MockMetricsSink;
    use crate::verify::MockSqlRunner;

    use super::*;

    const ARN: &str = "arn:aws:rds:us-west-2:123456789012:snapshot:test";

    fn snapshot() -> DbSnapshot {
        DbSnapshot::builder()
            .db_snapshot_identifier("test")
            .db_instance_identifier("test")
            .db_snapshot_arn(ARN)
            .status("available")
            .build()
    }

    fn target() -> Instance {
        Instance {
            name: "test".to_string(),
            database: "test".to_string(),
            instance_type: "db.t2.micro".to_string(),
            password: "thisisatest".to_string(),
            retention: Some(1),
            destination: Some("us-west-2".to_string()),
            kms_id: None,
            queries: vec![Query {
                query: "SELECT tablename FROM pg_catalog.pg_tables;".to_string(),
                regex: "^pg_statistic$".to_string(),
            }],
        }
    }

    fn restored_instance() -> DbInstance {
        DbInstance::builder()
            .db_instance_arn("arn:aws:rds:us-west-2:123456789012:db:test-test")
            .db_instance_status("available")
            .db_name("test")
            .master_username("master")
            .engine("postgres")
            .endpoint(Endpoint::builder().address("test.rds.amazonaws.com").port(5432).build())
            .build()
    }

    struct Mocks {
        snapshots: MockSnapshotOps,
        instances: MockInstanceOps,
        tags: MockTagOps,
        network: MockNetworkOps,
        metrics: MockMetricsSink,
        sql: MockSqlRunner,
    }

    impl Mocks {
        fn new() -> Mocks {
            Mocks {
                snapshots: MockSnapshotOps::new(),
                instances: MockInstanceOps::new(),
                tags: MockTagOps::new(),
                network: MockNetworkOps::new(),
                metrics: MockMetricsSink::new(),
                sql: MockSqlRunner::new(),
            }
        }

        fn expect_status(&mut self, status: &str) {
            let status = status.to_string();
            self.tags
                .expect_get_tag()
                .withf(|_, key| key == tags::STATUS)
                .returning(move |_, _| Ok(status.clone()));
        }

        fn expect_status_write(&mut self, expected: SnapshotStatus) {
            self.tags
                .expect_set_tag()
                .withf(move |_, key, value| key == tags::STATUS && value == expected.as_str())
                .times(1)
                .returning(|_, _, _| Ok(()));
        }

        fn checker(self) -> Checker {
            Checker::new(
                Arc::new(self.snapshots),
                Arc::new(self.instances),
                Arc::new(self.tags),
                Arc::new(self.network),
                Arc::new(self.metrics),
                Arc::new(self.sql),
                vec!["sg-1".to_string()],
                vec!["subnet-1".to_string(), "subnet-2".to_string()],
            )
        }
    }

    #[tokio::test]
    async fn ready_creates_subnet_group_and_advances() {
        let mut mocks = Mocks::new();
        mocks.expect_status("ready");
        mocks
            .metrics
            .expect_post_check()
            .withf(|_, _, command, status| *command == Command::Check && *status == CheckStatus::Ok)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        mocks
            .network
            .expect_create_subnet_group()
            .withf(|name, subnet_ids| name == "test" && subnet_ids.len() == 2)
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.expect_status_write(SnapshotStatus::Restore);

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn ready_subnet_group_failure_raises_alarm() {
        let mut mocks = Mocks::new();
        mocks.expect_status("ready");
        mocks.metrics.expect_post_check().returning(|_, _, _, _| Ok(()));
        mocks.network.expect_create_subnet_group().returning(|_, _| {
            Err(CheckError::CloudApi {
                code: None,
                message: "boom".to_string(),
            })
        });
        mocks.expect_status_write(SnapshotStatus::Alarm);

        let result = mocks.checker().step(&target(), &snapshot()).await;
        assert!(matches!(result, Err(CheckError::CloudApi { .. })));
    }

    #[tokio::test]
    async fn restore_launches_instance_and_advances() {
        let mut mocks = Mocks::new();
        mocks.expect_status("restore");
        mocks
            .instances
            .expect_restore_from_snapshot()
            .withf(|_, instance_class, security_group_ids| {
                instance_class == "db.t2.micro" && security_group_ids == ["sg-1".to_string()]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks.expect_status_write(SnapshotStatus::Modify);

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn modify_waits_until_instance_is_available() {
        let mut mocks = Mocks::new();
        mocks.expect_status("modify");
        mocks
            .instances
            .expect_instance_status()
            .withf(|instance_id| instance_id == "test-test")
            .returning(|_| Ok("modifying".to_string()));

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn modify_resets_password_and_advances() {
        let mut mocks = Mocks::new();
        mocks.expect_status("modify");
        mocks
            .instances
            .expect_instance_status()
            .returning(|_| Ok(AVAILABLE.to_string()));
        mocks
            .instances
            .expect_describe_instance()
            .returning(|_| Ok(Some(restored_instance())));
        mocks
            .instances
            .expect_set_master_password()
            .withf(|instance_id, password| instance_id == "test-test" && password == "thisisatest")
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.expect_status_write(SnapshotStatus::Verify);

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn modify_password_failure_raises_alarm() {
        let mut mocks = Mocks::new();
        mocks.expect_status("modify");
        mocks
            .instances
            .expect_instance_status()
            .returning(|_| Ok(AVAILABLE.to_string()));
        mocks
            .instances
            .expect_describe_instance()
            .returning(|_| Ok(Some(restored_instance())));
        mocks
            .instances
            .expect_set_master_password()
            .returning(|_, _| Err(CheckError::timeout("never reset")));
        mocks.expect_status_write(SnapshotStatus::Alarm);

        let result = mocks.checker().step(&target(), &snapshot()).await;
        assert!(matches!(result, Err(CheckError::CloudApi { .. })));
    }

    #[tokio::test]
    async fn verify_match_schedules_clean() {
        let mut mocks = Mocks::new();
        mocks.expect_status("verify");
        mocks
            .instances
            .expect_instance_status()
            .returning(|_| Ok(AVAILABLE.to_string()));
        mocks
            .instances
            .expect_describe_instance()
            .returning(|_| Ok(Some(restored_instance())));
        mocks
            .sql
            .expect_run_checks()
            .withf(|spec, queries| spec.database == "test" && queries.len() == 1)
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.expect_status_write(SnapshotStatus::Clean);

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn verify_mismatch_raises_alarm() {
        let mut mocks = Mocks::new();
        mocks.expect_status("verify");
        mocks
            .instances
            .expect_instance_status()
            .returning(|_| Ok(AVAILABLE.to_string()));
        mocks
            .instances
            .expect_describe_instance()
            .returning(|_| Ok(Some(restored_instance())));
        mocks.sql.expect_run_checks().returning(|_, queries| {
            Err(CheckError::Mismatch {
                query: queries[0].query.clone(),
                pattern: queries[0].regex.clone(),
            })
        });
        mocks.expect_status_write(SnapshotStatus::Alarm);

        let result = mocks.checker().step(&target(), &snapshot()).await;
        assert!(matches!(result, Err(CheckError::Mismatch { .. })));
    }

    #[tokio::test]
    async fn verify_skips_when_database_name_differs() {
        let mut mocks = Mocks::new();
        mocks.expect_status("verify");
        mocks
            .instances
            .expect_instance_status()
            .returning(|_| Ok(AVAILABLE.to_string()));
        mocks.instances.expect_describe_instance().returning(|_| {
            Ok(Some(
                DbInstance::builder()
                    .db_instance_status("available")
                    .db_name("unexpected")
                    .build(),
            ))
        });

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn alarm_marks_failure_and_schedules_clean() {
        let mut mocks = Mocks::new();
        mocks.expect_status("alarm");
        mocks
            .metrics
            .expect_post_check()
            .withf(|_, _, command, status| *command == Command::Check && *status == CheckStatus::Critical)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        mocks
            .tags
            .expect_set_tag()
            .withf(|_, key, value| key == tags::CHECKS_FAILED && value == "yes")
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks.expect_status_write(SnapshotStatus::Clean);

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn clean_deletes_instance_and_advances() {
        let mut mocks = Mocks::new();
        mocks.expect_status("clean");
        mocks
            .instances
            .expect_delete_instance()
            .withf(|instance_id| instance_id == "test-test")
            .times(1)
            .returning(|_| Ok(()));
        mocks.expect_status_write(SnapshotStatus::Tested);

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn clean_delete_failure_keeps_state_for_retry() {
        let mut mocks = Mocks::new();
        mocks.expect_status("clean");
        mocks.instances.expect_delete_instance().returning(|_| {
            Err(CheckError::CloudApi {
                code: None,
                message: "still deleting".to_string(),
            })
        });

        let result = mocks.checker().step(&target(), &snapshot()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tested_waits_for_instance_to_disappear() {
        let mut mocks = Mocks::new();
        mocks.expect_status("tested");
        mocks
            .instances
            .expect_instance_status()
            .returning(|_| Ok("deleting".to_string()));

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn tested_collects_subnet_group_once_instance_is_gone() {
        let mut mocks = Mocks::new();
        mocks.expect_status("tested");
        mocks.instances.expect_instance_status().returning(|_| Ok(String::new()));
        mocks
            .network
            .expect_subnet_group_exists()
            .withf(|name| name == "test")
            .returning(|_| Ok(true));
        mocks
            .network
            .expect_delete_subnet_group()
            .withf(|name| name == "test")
            .times(1)
            .returning(|_| Ok(()));

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn tested_is_noop_without_subnet_group() {
        let mut mocks = Mocks::new();
        mocks.expect_status("tested");
        mocks.instances.expect_instance_status().returning(|_| Ok(String::new()));
        mocks.network.expect_subnet_group_exists().returning(|_| Ok(false));

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_status_tag_is_a_noop() {
        let mut mocks = Mocks::new();
        mocks.expect_status("");

        mocks.checker().step(&target(), &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn run_target_advances_every_ready_snapshot_one_step() {
        let mut mocks = Mocks::new();

        let older = DbSnapshot::builder()
            .db_snapshot_identifier("old")
            .db_instance_identifier("test")
            .db_snapshot_arn("arn:aws:rds:us-west-2:123456789012:snapshot:old")
            .status("available")
            .build();
        let newer = snapshot();
        mocks
            .snapshots
            .expect_list_snapshots()
            .withf(|instance_id| instance_id == "test")
            .returning(move |_| Ok(vec![older.clone(), newer.clone()]));
        mocks.tags.expect_has_tag().returning(|_, _, _| Ok(true));
        mocks.expect_status("ready");
        mocks
            .metrics
            .expect_post_check()
            .times(2)
            .returning(|_, _, _, _| Ok(()));
        mocks
            .network
            .expect_create_subnet_group()
            .times(2)
            .returning(|_, _| Ok(()));
        mocks
            .tags
            .expect_set_tag()
            .withf(|_, key, value| key == tags::STATUS && value == "restore")
            .times(2)
            .returning(|_, _, _| Ok(()));

        mocks.checker().run_target(&target()).await.unwrap();
    }

    #[tokio::test]
    async fn run_target_ignores_foreign_snapshots() {
        let mut mocks = Mocks::new();
        let snap = snapshot();
        mocks
            .snapshots
            .expect_list_snapshots()
            .returning(move |_| Ok(vec![snap.clone()]));
        mocks.tags.expect_has_tag().returning(|_, _, _| Ok(false));

        mocks.checker().run_target(&target()).await.unwrap();
    }

    #[tokio::test]
    async fn alarm_converges_to_tested_in_three_ticks() {
        let mut mocks = Mocks::new();

        let state = Arc::new(Mutex::new("alarm".to_string()));
        {
            let state = state.clone();
            mocks
                .tags
                .expect_get_tag()
                .returning(move |_, _| Ok(state.lock().unwrap().clone()));
        }
        {
            let state = state.clone();
            mocks.tags.expect_set_tag().returning(move |_, key, value| {
                if key == tags::STATUS {
                    *state.lock().unwrap() = value.to_string();
                }
                Ok(())
            });
        }
        mocks.metrics.expect_post_check().returning(|_, _, _, _| Ok(()));
        mocks.instances.expect_delete_instance().returning(|_| Ok(()));
        mocks.instances.expect_instance_status().returning(|_| Ok(String::new()));
        mocks.network.expect_subnet_group_exists().returning(|_| Ok(true));
        mocks.network.expect_delete_subnet_group().times(1).returning(|_| Ok(()));

        let checker = mocks.checker();
        let target = target();
        let snap = snapshot();

        checker.step(&target, &snap).await.unwrap();
        assert_eq!(*state.lock().unwrap(), "clean");

        checker.step(&target, &snap).await.unwrap();
        assert_eq!(*state.lock().unwrap(), "tested");

        checker.step(&target, &snap).await.unwrap();
        assert_eq!(*state.lock().unwrap(), "tested");
    }
}
