//! SQLite-based build store

use crate::persistence::{BuildRecord, BuildStatus, BuildStore, PipelineInfo, StageSnapshot, Version};
use crate::core::StageConfig;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS pipelines (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        next_version_major INTEGER NOT NULL DEFAULT 0,
        next_version_minor INTEGER NOT NULL DEFAULT 0,
        next_version_patch INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS builds (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pipeline_id TEXT NOT NULL,
        version_major INTEGER NOT NULL,
        version_minor INTEGER NOT NULL,
        version_patch INTEGER NOT NULL,
        status INTEGER NOT NULL,
        started TEXT,
        finished TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS build_stages (
        build_id INTEGER NOT NULL,
        phase TEXT NOT NULL,
        position INTEGER NOT NULL,
        stage_name TEXT NOT NULL,
        properties TEXT NOT NULL,
        PRIMARY KEY (build_id, phase, position)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_builds_pipeline ON builds(pipeline_id)",
    "CREATE INDEX IF NOT EXISTS idx_build_stages_name ON build_stages(stage_name)",
];

const PHASE_INITIAL: &str = "initial";
const PHASE_FINAL: &str = "final";

const BUILD_COLUMNS: &str = r#"
    builds.id, builds.pipeline_id, COALESCE(pipelines.name, builds.pipeline_id) AS pipeline_name,
    builds.version_major, builds.version_minor, builds.version_patch,
    builds.status, builds.started, builds.finished
"#;

/// SQLite build store
pub struct SqliteBuildStore {
    pool: SqlitePool,
}

impl SqliteBuildStore {
    /// Open (creating if needed) a database file
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to initialize schema")?;
        }
        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn version_component(row: &SqliteRow, column: &str) -> Result<u32> {
        let value: i64 = row.try_get(column)?;
        u32::try_from(value).with_context(|| format!("Invalid {} value {}", column, value))
    }

    fn build_from_row(row: &SqliteRow) -> Result<BuildRecord> {
        let code: i64 = row.try_get("status")?;
        Ok(BuildRecord {
            id: row.try_get("id")?,
            pipeline_id: row.try_get("pipeline_id")?,
            pipeline_name: row.try_get("pipeline_name")?,
            version: Version::new(
                Self::version_component(row, "version_major")?,
                Self::version_component(row, "version_minor")?,
                Self::version_component(row, "version_patch")?,
            ),
            status: BuildStatus::from_code(code).ok_or_else(|| anyhow!("Unknown build status {}", code))?,
            started: row
                .try_get::<Option<NaiveDateTime>, _>("started")?
                .map(Self::from_naive),
            finished: row
                .try_get::<Option<NaiveDateTime>, _>("finished")?
                .map(Self::from_naive),
        })
    }

    fn snapshot_from_row(row: &SqliteRow) -> Result<StageSnapshot> {
        let properties: String = row.try_get("properties")?;
        let position: i64 = row.try_get("position")?;
        Ok(StageSnapshot {
            position: usize::try_from(position)?,
            name: row.try_get("stage_name")?,
            config: serde_json::from_str(&properties).context("Invalid stored stage properties")?,
        })
    }

    async fn insert_stages(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        build_id: i64,
        phase: &str,
        stages: &[StageSnapshot],
    ) -> Result<()> {
        for stage in stages {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO build_stages (build_id, phase, position, stage_name, properties)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(build_id)
            .bind(phase)
            .bind(stage.position as i64)
            .bind(&stage.name)
            .bind(serde_json::to_string(&stage.config)?)
            .execute(&mut **tx)
            .await
            .context("Failed to save stage config")?;
        }
        Ok(())
    }

    /// Stages recorded for a build in the given phase
    pub async fn stages(&self, build_id: i64, initial: bool) -> Result<Vec<StageSnapshot>> {
        let phase = if initial { PHASE_INITIAL } else { PHASE_FINAL };
        let rows = sqlx::query(
            r#"
            SELECT position, stage_name, properties
            FROM build_stages
            WHERE build_id = ?1 AND phase = ?2
            ORDER BY position ASC
            "#,
        )
        .bind(build_id)
        .bind(phase)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load stages")?;

        rows.iter().map(Self::snapshot_from_row).collect()
    }
}

#[async_trait::async_trait]
impl BuildStore for SqliteBuildStore {
    async fn register_pipeline(&self, info: &PipelineInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, next_version_major, next_version_minor, next_version_patch)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                next_version_major = excluded.next_version_major,
                next_version_minor = excluded.next_version_minor,
                next_version_patch = excluded.next_version_patch
            "#,
        )
        .bind(&info.id)
        .bind(&info.name)
        .bind(info.next_version.major as i64)
        .bind(info.next_version.minor as i64)
        .bind(info.next_version.patch as i64)
        .execute(&self.pool)
        .await
        .context("Failed to register pipeline")?;

        Ok(())
    }

    async fn create(
        &self,
        pipeline_id: &str,
        status: BuildStatus,
        stages: &[StageSnapshot],
    ) -> Result<BuildRecord> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO pipelines (id, name) VALUES (?1, ?1)")
            .bind(pipeline_id)
            .execute(&mut *tx)
            .await
            .context("Failed to register pipeline")?;

        let row = sqlx::query(
            r#"
            SELECT next_version_major AS version_major,
                   next_version_minor AS version_minor,
                   next_version_patch AS version_patch
            FROM pipelines WHERE id = ?1
            "#,
        )
        .bind(pipeline_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read next version")?;

        let version = Version::new(
            Self::version_component(&row, "version_major")?,
            Self::version_component(&row, "version_minor")?,
            Self::version_component(&row, "version_patch")?,
        );

        let next = version
            .next_patch()
            .ok_or_else(|| anyhow!("Pipeline {} cannot issue a version after {}", pipeline_id, version))?;

        sqlx::query("UPDATE pipelines SET next_version_patch = ?2 WHERE id = ?1")
            .bind(pipeline_id)
            .bind(next.patch as i64)
            .execute(&mut *tx)
            .await
            .context("Failed to bump version")?;

        let now = Self::to_naive(Utc::now());
        let started = (status == BuildStatus::Building).then_some(now);
        let finished = status.is_terminal().then_some(now);

        let result = sqlx::query(
            r#"
            INSERT INTO builds (pipeline_id, version_major, version_minor, version_patch, status, started, finished)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(pipeline_id)
        .bind(version.major as i64)
        .bind(version.minor as i64)
        .bind(version.patch as i64)
        .bind(status.code())
        .bind(started)
        .bind(finished)
        .execute(&mut *tx)
        .await
        .context("Failed to create build")?;

        let build_id = result.last_insert_rowid();
        Self::insert_stages(&mut tx, build_id, PHASE_INITIAL, stages).await?;
        tx.commit().await?;

        self.get(build_id)
            .await?
            .ok_or_else(|| anyhow!("Build {} vanished after creation", build_id))
    }

    async fn set_status(&self, build_id: i64, status: BuildStatus) -> Result<()> {
        let now = Self::to_naive(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE builds SET
                status = ?2,
                started = CASE WHEN ?3 THEN ?5 ELSE started END,
                finished = CASE WHEN ?4 THEN ?5 ELSE finished END
            WHERE id = ?1
            "#,
        )
        .bind(build_id)
        .bind(status.code())
        .bind(status == BuildStatus::Building)
        .bind(status.is_terminal())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to update build status")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Build {} not found", build_id);
        }
        Ok(())
    }

    async fn save_stage_config(&self, build_id: i64, stages: &[StageSnapshot]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM builds WHERE id = ?1")
            .bind(build_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to look up build")?;
        if exists.is_none() {
            anyhow::bail!("Build {} not found", build_id);
        }

        Self::insert_stages(&mut tx, build_id, PHASE_FINAL, stages).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn successful_stage(
        &self,
        pipeline_id: &str,
        stage_name: &str,
        properties: &StageConfig,
    ) -> Result<Option<StageSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT build_stages.position, build_stages.stage_name, build_stages.properties
            FROM build_stages
            JOIN builds ON build_stages.build_id = builds.id
            WHERE builds.pipeline_id = ?1
              AND builds.status = ?2
              AND build_stages.stage_name = ?3
              AND build_stages.phase = ?4
            ORDER BY builds.id DESC
            "#,
        )
        .bind(pipeline_id)
        .bind(BuildStatus::Success.code())
        .bind(stage_name)
        .bind(PHASE_FINAL)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query successful stages")?;

        for row in &rows {
            let snapshot = Self::snapshot_from_row(row)?;
            if snapshot.matches(properties) {
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }

    async fn get(&self, build_id: i64) -> Result<Option<BuildRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM builds LEFT JOIN pipelines ON builds.pipeline_id = pipelines.id WHERE builds.id = ?1",
            BUILD_COLUMNS
        ))
        .bind(build_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load build")?;

        row.as_ref().map(Self::build_from_row).transpose()
    }

    async fn latest(&self, pipeline_id: &str) -> Result<Option<BuildRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM builds LEFT JOIN pipelines ON builds.pipeline_id = pipelines.id \
             WHERE builds.pipeline_id = ?1 ORDER BY builds.id DESC LIMIT 1",
            BUILD_COLUMNS
        ))
        .bind(pipeline_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest build")?;

        row.as_ref().map(Self::build_from_row).transpose()
    }

    async fn list(&self, pipeline_id: &str) -> Result<Vec<BuildRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM builds LEFT JOIN pipelines ON builds.pipeline_id = pipelines.id \
             WHERE builds.pipeline_id = ?1 ORDER BY builds.id DESC",
            BUILD_COLUMNS
        ))
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list builds")?;

        rows.iter().map(Self::build_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name,
                   next_version_major AS version_major,
                   next_version_minor AS version_minor,
                   next_version_patch AS version_patch
            FROM pipelines
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        rows.iter()
            .map(|row| -> Result<PipelineInfo> {
                Ok(PipelineInfo {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    next_version: Version::new(
                        Self::version_component(row, "version_major")?,
                        Self::version_component(row, "version_minor")?,
                        Self::version_component(row, "version_patch")?,
                    ),
                })
            })
            .collect()
    }
}
