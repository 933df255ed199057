//! SQLite implementation of the FixLearningRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::parse_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Complexity, FixLearning, FixStrategy, LearningQualifiers};
use crate::domain::ports::FixLearningRepository;

const SELECT_COLUMNS: &str = "failure_pattern, fix_strategy, times_tried, times_succeeded, error_regex, file_pattern, complexity, last_used_at";

#[derive(Clone)]
pub struct SqliteFixLearningRepository {
    pool: SqlitePool,
}

impl SqliteFixLearningRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Count one outcome for (pattern, strategy) on `conn` and return the new row.
///
/// Single statement: SQLite applies the increment under its write lock. Runs
/// inside the caller's transaction when `conn` belongs to one.
pub(super) async fn upsert_learning(
    conn: &mut SqliteConnection,
    failure_pattern: &str,
    strategy: FixStrategy,
    success: bool,
    qualifiers: &LearningQualifiers,
) -> DomainResult<FixLearning> {
    let now = Utc::now().to_rfc3339();

    let row: FixLearningRow = sqlx::query_as(&format!(
        r#"INSERT INTO fix_learnings (failure_pattern, fix_strategy, times_tried, times_succeeded,
               error_regex, file_pattern, complexity, created_at, last_used_at)
           VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(failure_pattern, fix_strategy) DO UPDATE SET
               times_tried = times_tried + 1,
               times_succeeded = times_succeeded + excluded.times_succeeded,
               error_regex = COALESCE(excluded.error_regex, error_regex),
               file_pattern = COALESCE(excluded.file_pattern, file_pattern),
               complexity = COALESCE(excluded.complexity, complexity),
               last_used_at = excluded.last_used_at
           RETURNING {SELECT_COLUMNS}"#
    ))
    .bind(failure_pattern)
    .bind(strategy.as_str())
    .bind(i64::from(success))
    .bind(qualifiers.error_regex.as_deref())
    .bind(qualifiers.file_pattern.as_deref())
    .bind(qualifiers.complexity.map(|c| c.as_str()))
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

#[async_trait]
impl FixLearningRepository for SqliteFixLearningRepository {
    async fn record(
        &self,
        failure_pattern: &str,
        strategy: FixStrategy,
        success: bool,
        qualifiers: &LearningQualifiers,
    ) -> DomainResult<FixLearning> {
        let mut conn = self.pool.acquire().await?;
        upsert_learning(&mut conn, failure_pattern, strategy, success, qualifiers).await
    }

    async fn get(&self, failure_pattern: &str, strategy: FixStrategy) -> DomainResult<Option<FixLearning>> {
        let row: Option<FixLearningRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM fix_learnings WHERE failure_pattern = ? AND fix_strategy = ?"
        ))
        .bind(failure_pattern)
        .bind(strategy.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_for_pattern(&self, failure_pattern: &str) -> DomainResult<Vec<FixLearning>> {
        let rows: Vec<FixLearningRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM fix_learnings WHERE failure_pattern = ? ORDER BY fix_strategy"
        ))
        .bind(failure_pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_all(&self) -> DomainResult<Vec<FixLearning>> {
        let rows: Vec<FixLearningRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM fix_learnings ORDER BY failure_pattern, fix_strategy"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct FixLearningRow {
    failure_pattern: String,
    fix_strategy: String,
    times_tried: i64,
    times_succeeded: i64,
    error_regex: Option<String>,
    file_pattern: Option<String>,
    complexity: Option<String>,
    last_used_at: String,
}

impl TryFrom<FixLearningRow> for FixLearning {
    type Error = DomainError;

    fn try_from(row: FixLearningRow) -> Result<Self, Self::Error> {
        let fix_strategy = FixStrategy::from_str(&row.fix_strategy).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid strategy: {}", row.fix_strategy))
        })?;

        Ok(FixLearning {
            failure_pattern: row.failure_pattern,
            fix_strategy,
            times_tried: row.times_tried as u32,
            times_succeeded: row.times_succeeded as u32,
            qualifiers: LearningQualifiers {
                error_regex: row.error_regex,
                file_pattern: row.file_pattern,
                complexity: row.complexity.as_deref().and_then(Complexity::from_str),
            },
            last_used_at: parse_datetime(&row.last_used_at)?,
        })
    }
}
