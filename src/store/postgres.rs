//! PostgreSQL snapshot store.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Schema
//!
//! ```text
//! graphs          (id, created_at, head_version)
//! graph_versions  (graph_id, version, author_session, created_at, quality_json, content_hash)
//! graph_nodes     (graph_id, version, node_id, payload_json)
//! graph_edges     (graph_id, version, edge_id, payload_json)
//! ```
//!
//! Node and edge rows reference their version header with `ON DELETE
//! CASCADE`, so pruning a header removes its rows. Saves lock the graph row
//! (`SELECT ... FOR UPDATE`) to allocate the next version, which serializes
//! writers per graph and leaves other graphs untouched. Reads run in
//! `REPEATABLE READ` transactions and never wait on writers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Row;

use crate::types::{now_utc, Edge, GraphId, GraphVersion, Node, QualityReport, SessionId};
use super::{prepare_snapshot, SnapshotStore, StoreError};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS graphs (
        id TEXT PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL,
        head_version BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS graph_versions (
        graph_id TEXT NOT NULL REFERENCES graphs(id) ON DELETE CASCADE,
        version BIGINT NOT NULL,
        author_session TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        quality_json TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        PRIMARY KEY (graph_id, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS graph_nodes (
        graph_id TEXT NOT NULL,
        version BIGINT NOT NULL,
        node_id TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        PRIMARY KEY (graph_id, version, node_id),
        FOREIGN KEY (graph_id, version)
            REFERENCES graph_versions(graph_id, version) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS graph_edges (
        graph_id TEXT NOT NULL,
        version BIGINT NOT NULL,
        edge_id TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        PRIMARY KEY (graph_id, version, edge_id),
        FOREIGN KEY (graph_id, version)
            REFERENCES graph_versions(graph_id, version) ON DELETE CASCADE
    )
    "#,
];

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/graphs".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// `LIMIT` parameter for a history query. `None` binds NULL, meaning no limit.
fn sql_limit(limit: Option<usize>) -> Option<i64> {
    limit.and_then(|l| i64::try_from(l).ok())
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// PostgreSQL snapshot store.
pub struct PostgresSnapshotStore {
    pool: PgPool,
    closed: AtomicBool,
}

impl PostgresSnapshotStore {
    /// Connect with the given configuration and create the schema if needed.
    pub async fn connect(config: PostgresConfig) -> Result<Self, StoreError> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Self::with_pool(pool).await
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::connect(PostgresConfig::from_env()).await
    }

    /// Wrap an existing pool and create the schema if needed.
    pub async fn with_pool(pool: PgPool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        tracing::info!("Snapshot schema ready");

        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
        })
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!("Access to closed PostgreSQL snapshot store");
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn begin_read(&self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Read one version inside an open transaction and verify its fingerprint.
    async fn fetch_version(
        conn: &mut PgConnection,
        graph_id: &GraphId,
        version: u64,
    ) -> Result<Option<GraphVersion>, StoreError> {
        let header = sqlx::query(
            r#"
            SELECT author_session, created_at, quality_json, content_hash
            FROM graph_versions
            WHERE graph_id = $1 AND version = $2
            "#,
        )
        .bind(graph_id.as_str())
        .bind(version as i64)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let author_session: Option<String> = header.try_get("author_session")?;
        let created_at: DateTime<Utc> = header.try_get("created_at")?;
        let quality_json: String = header.try_get("quality_json")?;
        let content_hash: String = header.try_get("content_hash")?;

        let node_rows = sqlx::query(
            r#"
            SELECT payload_json FROM graph_nodes
            WHERE graph_id = $1 AND version = $2
            ORDER BY node_id COLLATE "C"
            "#,
        )
        .bind(graph_id.as_str())
        .bind(version as i64)
        .fetch_all(&mut *conn)
        .await?;

        let edge_rows = sqlx::query(
            r#"
            SELECT payload_json FROM graph_edges
            WHERE graph_id = $1 AND version = $2
            ORDER BY edge_id COLLATE "C"
            "#,
        )
        .bind(graph_id.as_str())
        .bind(version as i64)
        .fetch_all(&mut *conn)
        .await?;

        let nodes = node_rows
            .iter()
            .map(|row| -> Result<Node, StoreError> {
                let payload: String = row.try_get("payload_json")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let edges = edge_rows
            .iter()
            .map(|row| -> Result<Edge, StoreError> {
                let payload: String = row.try_get("payload_json")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let snapshot = GraphVersion {
            graph_id: graph_id.clone(),
            version,
            nodes,
            edges,
            created_at,
            author_session: author_session.map(SessionId::from),
            quality: serde_json::from_str(&quality_json)?,
            content_hash,
        };

        if !snapshot.verify_content_hash() {
            tracing::error!(
                graph_id = %graph_id,
                version,
                "Snapshot content hash mismatch"
            );
            return Err(StoreError::Corrupt {
                graph_id: graph_id.clone(),
                version,
                reason: "content hash mismatch".to_string(),
            });
        }

        tracing::trace!(graph_id = %graph_id, version, "Content hash verified");
        Ok(Some(snapshot))
    }

    async fn commit(
        &self,
        graph_id: &GraphId,
        expected_latest: Option<u64>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        author_session: Option<SessionId>,
        quality: QualityReport,
    ) -> Result<GraphVersion, StoreError> {
        self.ensure_open()?;
        let (nodes, edges) = prepare_snapshot(graph_id, nodes, edges)?;
        let created_at = now_utc();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO graphs (id, created_at, head_version) VALUES ($1, $2, 0) ON CONFLICT (id) DO NOTHING",
        )
        .bind(graph_id.as_str())
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        let head: i64 = sqlx::query_scalar("SELECT head_version FROM graphs WHERE id = $1 FOR UPDATE")
            .bind(graph_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let head = head as u64;

        if let Some(expected) = expected_latest {
            if head != expected {
                // Dropping the transaction rolls it back.
                return Err(StoreError::VersionConflict {
                    graph_id: graph_id.clone(),
                    expected,
                    actual: head,
                });
            }
        }

        let version = GraphVersion::new(
            graph_id.clone(),
            head + 1,
            nodes,
            edges,
            created_at,
            author_session,
            quality,
        )?;
        let version_no = version.version as i64;

        sqlx::query(
            r#"
            INSERT INTO graph_versions
                (graph_id, version, author_session, created_at, quality_json, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(graph_id.as_str())
        .bind(version_no)
        .bind(version.author_session.as_ref().map(|s| s.as_str().to_string()))
        .bind(version.created_at)
        .bind(serde_json::to_string(&version.quality)?)
        .bind(&version.content_hash)
        .execute(&mut *tx)
        .await?;

        if !version.nodes.is_empty() {
            let ids: Vec<String> = version.nodes.iter().map(|n| n.id.clone()).collect();
            let payloads = version
                .nodes
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()?;
            sqlx::query(
                r#"
                INSERT INTO graph_nodes (graph_id, version, node_id, payload_json)
                SELECT $1, $2, t.id, t.payload FROM UNNEST($3::text[], $4::text[]) AS t(id, payload)
                "#,
            )
            .bind(graph_id.as_str())
            .bind(version_no)
            .bind(&ids)
            .bind(&payloads)
            .execute(&mut *tx)
            .await?;
        }

        if !version.edges.is_empty() {
            let ids: Vec<String> = version.edges.iter().map(|e| e.id.clone()).collect();
            let payloads = version
                .edges
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()?;
            sqlx::query(
                r#"
                INSERT INTO graph_edges (graph_id, version, edge_id, payload_json)
                SELECT $1, $2, t.id, t.payload FROM UNNEST($3::text[], $4::text[]) AS t(id, payload)
                "#,
            )
            .bind(graph_id.as_str())
            .bind(version_no)
            .bind(&ids)
            .bind(&payloads)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE graphs SET head_version = $2 WHERE id = $1")
            .bind(graph_id.as_str())
            .bind(version_no)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            graph_id = %graph_id,
            version = version.version,
            nodes = version.nodes.len(),
            edges = version.edges.len(),
            "Saved graph version"
        );

        Ok(version)
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn register_graph(&self, graph_id: &GraphId) -> Result<(), StoreError> {
        self.ensure_open()?;
        sqlx::query(
            "INSERT INTO graphs (id, created_at, head_version) VALUES ($1, $2, 0) ON CONFLICT (id) DO NOTHING",
        )
        .bind(graph_id.as_str())
        .bind(now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest(&self, graph_id: &GraphId) -> Result<Option<GraphVersion>, StoreError> {
        self.ensure_open()?;
        let mut tx = self.begin_read().await?;

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM graph_versions WHERE graph_id = $1")
                .bind(graph_id.as_str())
                .fetch_one(&mut *tx)
                .await?;

        let result = match latest {
            Some(version) => Self::fetch_version(&mut tx, graph_id, version as u64).await?,
            None => None,
        };
        tx.commit().await?;
        Ok(result)
    }

    async fn load(&self, graph_id: &GraphId, version: u64) -> Result<GraphVersion, StoreError> {
        self.ensure_open()?;
        let mut tx = self.begin_read().await?;
        let result = Self::fetch_version(&mut tx, graph_id, version).await?;
        tx.commit().await?;

        result.ok_or_else(|| StoreError::NotFound {
            graph_id: graph_id.clone(),
            version,
        })
    }

    async fn save(
        &self,
        graph_id: &GraphId,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        author_session: Option<SessionId>,
        quality: QualityReport,
    ) -> Result<GraphVersion, StoreError> {
        self.commit(graph_id, None, nodes, edges, author_session, quality).await
    }

    async fn save_if_latest(
        &self,
        graph_id: &GraphId,
        expected_latest: u64,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        author_session: Option<SessionId>,
        quality: QualityReport,
    ) -> Result<GraphVersion, StoreError> {
        self.commit(graph_id, Some(expected_latest), nodes, edges, author_session, quality)
            .await
    }

    async fn history(
        &self,
        graph_id: &GraphId,
        limit: Option<usize>,
    ) -> Result<Vec<GraphVersion>, StoreError> {
        self.ensure_open()?;
        let mut tx = self.begin_read().await?;

        let versions: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT version FROM graph_versions
            WHERE graph_id = $1
            ORDER BY version DESC
            LIMIT $2
            "#,
        )
        .bind(graph_id.as_str())
        .bind(sql_limit(limit))
        .fetch_all(&mut *tx)
        .await?;

        let mut result = Vec::with_capacity(versions.len());
        for version in versions {
            if let Some(snapshot) = Self::fetch_version(&mut tx, graph_id, version as u64).await? {
                result.push(snapshot);
            }
        }
        tx.commit().await?;
        Ok(result)
    }

    async fn prune(&self, graph_id: &GraphId, keep_last: usize) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let removed = sqlx::query(
            r#"
            DELETE FROM graph_versions
            WHERE graph_id = $1 AND version IN (
                SELECT version FROM graph_versions
                WHERE graph_id = $1
                ORDER BY version DESC
                OFFSET $2
            )
            "#,
        )
        .bind(graph_id.as_str())
        .bind(keep_last as i64)
        .execute(&self.pool)
        .await?
        .rows_affected() as usize;

        tracing::debug!(
            graph_id = %graph_id,
            keep_last,
            removed,
            "Pruned graph history"
        );
        Ok(removed)
    }

    async fn graph_ids(&self) -> Result<Vec<GraphId>, StoreError> {
        self.ensure_open()?;
        let ids: Vec<String> = sqlx::query_scalar(r#"SELECT id FROM graphs ORDER BY id COLLATE "C""#)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(GraphId::from).collect())
    }

    async fn version_count(&self, graph_id: &GraphId) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM graph_versions WHERE graph_id = $1")
            .bind(graph_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pool.close().await;
            tracing::info!("PostgreSQL snapshot store closed");
        }
    }
}
