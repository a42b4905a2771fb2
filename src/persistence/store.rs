//! SQLite-based persistence store
//!
//! Records are stored as JSON payloads next to the columns used for lookup.

use super::{
    in_stages, is_stage_descendant, select_executions, stage_fqns_for, Cursor, ExecutionRecordStore,
    NodeExecutionStore, StoreSnapshot,
};
use crate::core::{
    ExecutionSummary, Node, NodeExecution, PlanExecutionMetadata, Projection, RetryStageInfo,
    StepCategory,
};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::debug;

/// SQLite execution record store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at the given path. `:memory:` opens a
    /// private in-memory database.
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
        } else {
            let options = SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true);
            SqlitePoolOptions::new().connect_with(options).await
        }
        .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Open the store at `path`, creating parent directories as needed
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let db_path = path
            .to_str()
            .with_context(|| format!("Database path is not valid UTF-8: {}", path.display()))?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node_executions (
                uuid TEXT PRIMARY KEY,
                plan_execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                stage_fqn TEXT NOT NULL DEFAULT '',
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plan_nodes (
                uuid TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS retry_stage_infos (
                plan_execution_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS execution_summaries (
                plan_execution_id TEXT PRIMARY KEY,
                root_execution_id TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plan_execution_metadata (
                plan_execution_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pipelines (
                identifier TEXT PRIMARY KEY,
                yaml TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_node_executions_plan ON node_executions(plan_execution_id);
            CREATE INDEX IF NOT EXISTS idx_summaries_root ON execution_summaries(root_execution_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write every record of a snapshot, replacing existing rows
    pub async fn import(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for execution in &snapshot.node_executions {
            sqlx::query(
                "INSERT OR REPLACE INTO node_executions (uuid, plan_execution_id, node_id, stage_fqn, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&execution.uuid)
            .bind(&execution.plan_execution_id)
            .bind(&execution.node_id)
            .bind(&execution.stage_fqn)
            .bind(serde_json::to_string(execution)?)
            .execute(&mut *tx)
            .await
            .context("Failed to save node execution")?;
        }

        for node in &snapshot.plan_nodes {
            sqlx::query("INSERT OR REPLACE INTO plan_nodes (uuid, payload) VALUES (?1, ?2)")
                .bind(&node.uuid)
                .bind(serde_json::to_string(node)?)
                .execute(&mut *tx)
                .await
                .context("Failed to save plan node")?;
        }

        for (plan_execution_id, infos) in &snapshot.retry_stage_infos {
            sqlx::query(
                "INSERT OR REPLACE INTO retry_stage_infos (plan_execution_id, payload) VALUES (?1, ?2)",
            )
            .bind(plan_execution_id)
            .bind(serde_json::to_string(infos)?)
            .execute(&mut *tx)
            .await
            .context("Failed to save retry stage infos")?;
        }

        for summary in &snapshot.execution_summaries {
            sqlx::query(
                "INSERT OR REPLACE INTO execution_summaries (plan_execution_id, root_execution_id, payload) VALUES (?1, ?2, ?3)",
            )
            .bind(&summary.plan_execution_id)
            .bind(summary.lineage_id())
            .bind(serde_json::to_string(summary)?)
            .execute(&mut *tx)
            .await
            .context("Failed to save execution summary")?;
        }

        for metadata in &snapshot.plan_execution_metadata {
            sqlx::query(
                "INSERT OR REPLACE INTO plan_execution_metadata (plan_execution_id, payload) VALUES (?1, ?2)",
            )
            .bind(&metadata.plan_execution_id)
            .bind(serde_json::to_string(metadata)?)
            .execute(&mut *tx)
            .await
            .context("Failed to save plan execution metadata")?;
        }

        for (identifier, yaml) in &snapshot.pipelines {
            sqlx::query("INSERT OR REPLACE INTO pipelines (identifier, yaml) VALUES (?1, ?2)")
                .bind(identifier)
                .bind(yaml)
                .execute(&mut *tx)
                .await
                .context("Failed to save pipeline")?;
        }

        tx.commit().await?;
        debug!(
            "Imported {} node execution(s) and {} summary(ies)",
            snapshot.node_executions.len(),
            snapshot.execution_summaries.len()
        );
        Ok(())
    }

    /// Node executions of one plan execution matching `keep`, as a cursor
    /// that holds its pool connection until released
    async fn stream_executions(
        &self,
        plan_execution_id: &str,
        keep: impl Fn(&NodeExecution) -> bool + Send,
    ) -> Result<Cursor<NodeExecution>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query("SELECT payload FROM node_executions WHERE plan_execution_id = ?1")
            .bind(plan_execution_id)
            .fetch_all(&mut *conn)
            .await
            .context("Failed to query node executions")?;

        let executions = rows
            .iter()
            .map(|row| decode::<NodeExecution>(row.get("payload")))
            .collect::<Result<Vec<_>>>()?;
        let selected = select_executions(executions.iter(), plan_execution_id, keep);

        Ok(Cursor::with_release(selected, move || drop(conn)))
    }

    async fn fetch_payload<T: DeserializeOwned>(&self, sql: &str, key: &str) -> Result<Option<T>> {
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load record")?;

        match row {
            Some(row) => Ok(Some(decode(row.get("payload"))?)),
            None => Ok(None),
        }
    }
}

fn decode<T: DeserializeOwned>(payload: String) -> Result<T> {
    serde_json::from_str(&payload).context("Corrupt record payload")
}

#[async_trait::async_trait]
impl NodeExecutionStore for SqliteStore {
    async fn stream_by_stage_fqns(
        &self,
        plan_execution_id: &str,
        stage_fqns: &[String],
        projection: Projection,
    ) -> Result<Cursor<NodeExecution>> {
        let cursor = self
            .stream_executions(plan_execution_id, |execution| in_stages(execution, stage_fqns))
            .await?;
        Ok(match projection {
            Projection::Full => cursor,
            Projection::Identity => {
                let projected = cursor.map(|execution| projection.apply(&execution)).collect();
                Cursor::new(projected)
            }
        })
    }

    async fn stream_strategy_executions(
        &self,
        plan_execution_id: &str,
        stage_fqns: &[String],
    ) -> Result<Cursor<NodeExecution>> {
        self.stream_executions(plan_execution_id, |execution| {
            execution.category() == StepCategory::Strategy && in_stages(execution, stage_fqns)
        })
        .await
    }

    async fn stream_stage_descendants(
        &self,
        plan_execution_id: &str,
        stage_fqns: Option<&[String]>,
    ) -> Result<Cursor<NodeExecution>> {
        self.stream_executions(plan_execution_id, |execution| {
            is_stage_descendant(execution, stage_fqns)
        })
        .await
    }

    async fn fetch_node(&self, node_id: &str) -> Result<Option<Node>> {
        self.fetch_payload("SELECT payload FROM plan_nodes WHERE uuid = ?1", node_id)
            .await
    }

    async fn fetch_stage_fqns(
        &self,
        plan_execution_id: &str,
        stage_identifiers: &[String],
    ) -> Result<Vec<String>> {
        let stages: Vec<NodeExecution> = self
            .stream_executions(plan_execution_id, |execution| {
                execution.category() == StepCategory::Stage
            })
            .await?
            .collect();
        Ok(stage_fqns_for(&stages, stage_identifiers))
    }

    async fn fetch_retry_stage_infos(&self, plan_execution_id: &str) -> Result<Vec<RetryStageInfo>> {
        Ok(self
            .fetch_payload(
                "SELECT payload FROM retry_stage_infos WHERE plan_execution_id = ?1",
                plan_execution_id,
            )
            .await?
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ExecutionRecordStore for SqliteStore {
    async fn execution_summary(&self, plan_execution_id: &str) -> Result<Option<ExecutionSummary>> {
        self.fetch_payload(
            "SELECT payload FROM execution_summaries WHERE plan_execution_id = ?1",
            plan_execution_id,
        )
        .await
    }

    async fn plan_execution_metadata(
        &self,
        plan_execution_id: &str,
    ) -> Result<Option<PlanExecutionMetadata>> {
        self.fetch_payload(
            "SELECT payload FROM plan_execution_metadata WHERE plan_execution_id = ?1",
            plan_execution_id,
        )
        .await
    }

    async fn save_plan_execution_metadata(&self, metadata: &PlanExecutionMetadata) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO plan_execution_metadata (plan_execution_id, payload) VALUES (?1, ?2)",
        )
        .bind(&metadata.plan_execution_id)
        .bind(serde_json::to_string(metadata)?)
        .execute(&self.pool)
        .await
        .context("Failed to save plan execution metadata")?;

        Ok(())
    }

    async fn save_execution_summary(&self, summary: &ExecutionSummary) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO execution_summaries (plan_execution_id, root_execution_id, payload) VALUES (?1, ?2, ?3)",
        )
        .bind(&summary.plan_execution_id)
        .bind(summary.lineage_id())
        .bind(serde_json::to_string(summary)?)
        .execute(&self.pool)
        .await
        .context("Failed to save execution summary")?;

        Ok(())
    }

    async fn pipeline_yaml(&self, pipeline_identifier: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT yaml FROM pipelines WHERE identifier = ?1")
            .bind(pipeline_identifier)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load pipeline")?;

        Ok(row.map(|row| row.get("yaml")))
    }

    async fn summaries_by_root(&self, root_execution_id: &str) -> Result<Cursor<ExecutionSummary>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query("SELECT payload FROM execution_summaries WHERE root_execution_id = ?1")
            .bind(root_execution_id)
            .fetch_all(&mut *conn)
            .await
            .context("Failed to list executions")?;

        let mut summaries = rows
            .iter()
            .map(|row| decode::<ExecutionSummary>(row.get("payload")))
            .collect::<Result<Vec<_>>>()?;
        summaries.sort_by(|a, b| b.start_ts.cmp(&a.start_ts));

        Ok(Cursor::with_release(summaries, move || drop(conn)))
    }
}
