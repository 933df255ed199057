//! SQLite implementation of the RunRecordRepository.
//!
//! Bundles, reports and diagnoses are stored as their canonical JSON with a
//! few indexed columns alongside. All writes are plain `INSERT`s: the
//! (run id, attempt) primary key turns a second write into an error.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::fix_learning_repository::upsert_learning;
use super::{map_write_error, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    EvidenceBundle, FixAttempt, FixLearning, FixStrategy, LearningQualifiers, RedFlag,
    RedFlagCategory, RootCauseAnalysis, Severity, VerificationReport,
};
use crate::domain::ports::RunRecordRepository;

#[derive(Clone)]
pub struct SqliteRunRecordRepository {
    pool: SqlitePool,
}

impl SqliteRunRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        run_id: Uuid,
        attempt: Option<u32>,
    ) -> DomainResult<Option<T>> {
        let mut q = sqlx::query_as::<_, (String,)>(query).bind(run_id.to_string());
        if let Some(attempt) = attempt {
            q = q.bind(i64::from(attempt));
        }
        let row = q.fetch_optional(&self.pool).await?;
        row.map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .transpose()
    }
}

#[async_trait]
impl RunRecordRepository for SqliteRunRecordRepository {
    async fn save_bundle(&self, bundle: &EvidenceBundle) -> DomainResult<()> {
        let bundle_json = serde_json::to_string(bundle)?;

        sqlx::query(
            r#"INSERT INTO evidence_bundles (run_id, attempt, id, execution_kind, passed, artifact_count, bundle_json, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(bundle.run_id().to_string())
        .bind(i64::from(bundle.attempt()))
        .bind(bundle.id().to_string())
        .bind(bundle.execution_kind().as_str())
        .bind(bundle.outcome().passed)
        .bind(bundle.artifacts().len() as i64)
        .bind(&bundle_json)
        .bind(bundle.created_at().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_write_error(e, "evidence_bundle", || {
                format!("{}#{}", bundle.run_id(), bundle.attempt())
            })
        })?;

        Ok(())
    }

    async fn get_bundle(&self, run_id: Uuid, attempt: u32) -> DomainResult<Option<EvidenceBundle>> {
        self.fetch_json(
            "SELECT bundle_json FROM evidence_bundles WHERE run_id = ? AND attempt = ?",
            run_id,
            Some(attempt),
        )
        .await
    }

    async fn latest_bundle(&self, run_id: Uuid) -> DomainResult<Option<EvidenceBundle>> {
        self.fetch_json(
            "SELECT bundle_json FROM evidence_bundles WHERE run_id = ? ORDER BY attempt DESC LIMIT 1",
            run_id,
            None,
        )
        .await
    }

    async fn save_red_flags(&self, run_id: Uuid, attempt: u32, flags: &[RedFlag]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        let marker = sqlx::query(
            r#"INSERT INTO red_flag_checks (run_id, attempt, flag_count, checked_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(run_id, attempt) DO NOTHING"#,
        )
        .bind(run_id.to_string())
        .bind(i64::from(attempt))
        .bind(flags.len() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if marker.rows_affected() == 0 {
            tracing::debug!(%run_id, attempt, "red flags already stored for attempt");
            tx.rollback().await?;
            return Ok(());
        }

        for flag in flags {
            let refs_json = serde_json::to_string(&flag.artifact_refs)?;
            sqlx::query(
                r#"INSERT INTO red_flags (id, run_id, attempt, severity, category, description, artifact_refs, detected_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(flag.id.to_string())
            .bind(flag.run_id.to_string())
            .bind(i64::from(flag.attempt))
            .bind(flag.severity.as_str())
            .bind(flag.category.as_str())
            .bind(&flag.description)
            .bind(&refs_json)
            .bind(flag.detected_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_red_flags(&self, run_id: Uuid, attempt: u32) -> DomainResult<Option<Vec<RedFlag>>> {
        let checked: Option<(i64,)> = sqlx::query_as(
            "SELECT flag_count FROM red_flag_checks WHERE run_id = ? AND attempt = ?",
        )
        .bind(run_id.to_string())
        .bind(i64::from(attempt))
        .fetch_optional(&self.pool)
        .await?;

        if checked.is_none() {
            return Ok(None);
        }

        let rows: Vec<RedFlagRow> = sqlx::query_as(
            r#"SELECT id, run_id, attempt, severity, category, description, artifact_refs, detected_at
               FROM red_flags WHERE run_id = ? AND attempt = ? ORDER BY detected_at, id"#,
        )
        .bind(run_id.to_string())
        .bind(i64::from(attempt))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(RedFlag::try_from)
            .collect::<DomainResult<Vec<_>>>()
            .map(Some)
    }

    async fn save_report(&self, report: &VerificationReport) -> DomainResult<()> {
        let report_json = serde_json::to_string(report)?;

        sqlx::query(
            r#"INSERT INTO verification_reports (run_id, attempt, id, reviewer_id, confidence, recommendation, report_json, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(report.run_id.to_string())
        .bind(i64::from(report.attempt))
        .bind(report.id.to_string())
        .bind(&report.reviewer_id)
        .bind(i64::from(report.confidence))
        .bind(report.recommendation.as_str())
        .bind(&report_json)
        .bind(report.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_write_error(e, "verification_report", || {
                format!("{}#{}", report.run_id, report.attempt)
            })
        })?;

        Ok(())
    }

    async fn get_report(&self, run_id: Uuid, attempt: u32) -> DomainResult<Option<VerificationReport>> {
        self.fetch_json(
            "SELECT report_json FROM verification_reports WHERE run_id = ? AND attempt = ?",
            run_id,
            Some(attempt),
        )
        .await
    }

    async fn latest_report(&self, run_id: Uuid) -> DomainResult<Option<VerificationReport>> {
        self.fetch_json(
            "SELECT report_json FROM verification_reports WHERE run_id = ? ORDER BY attempt DESC LIMIT 1",
            run_id,
            None,
        )
        .await
    }

    async fn save_root_cause(&self, analysis: &RootCauseAnalysis) -> DomainResult<()> {
        let analysis_json = serde_json::to_string(analysis)?;

        sqlx::query(
            r#"INSERT INTO root_cause_analyses (run_id, attempt, id, category, complexity, failure_pattern, recommended_strategy, analysis_json, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(analysis.run_id.to_string())
        .bind(i64::from(analysis.attempt))
        .bind(analysis.id.to_string())
        .bind(analysis.category.as_str())
        .bind(analysis.complexity.as_str())
        .bind(&analysis.failure_pattern)
        .bind(analysis.recommended_strategy.map(|s| s.as_str()))
        .bind(&analysis_json)
        .bind(analysis.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_write_error(e, "root_cause_analysis", || {
                format!("{}#{}", analysis.run_id, analysis.attempt)
            })
        })?;

        Ok(())
    }

    async fn get_root_cause(
        &self,
        run_id: Uuid,
        attempt: u32,
    ) -> DomainResult<Option<RootCauseAnalysis>> {
        self.fetch_json(
            "SELECT analysis_json FROM root_cause_analyses WHERE run_id = ? AND attempt = ?",
            run_id,
            Some(attempt),
        )
        .await
    }

    async fn latest_root_cause(&self, run_id: Uuid) -> DomainResult<Option<RootCauseAnalysis>> {
        self.fetch_json(
            "SELECT analysis_json FROM root_cause_analyses WHERE run_id = ? ORDER BY attempt DESC LIMIT 1",
            run_id,
            None,
        )
        .await
    }

    async fn append_fix_attempt(&self, attempt: &FixAttempt) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_fix_attempt(&mut conn, attempt).await
    }

    async fn close_fix_attempt(
        &self,
        attempt: &FixAttempt,
        qualifiers: &LearningQualifiers,
    ) -> DomainResult<FixLearning> {
        let mut tx = self.pool.begin().await?;
        insert_fix_attempt(&mut tx, attempt).await?;
        let learning = upsert_learning(
            &mut tx,
            &attempt.failure_pattern,
            attempt.strategy,
            attempt.success,
            qualifiers,
        )
        .await?;
        tx.commit().await?;
        Ok(learning)
    }

    async fn list_fix_attempts(&self, run_id: Uuid) -> DomainResult<Vec<FixAttempt>> {
        let rows: Vec<FixAttemptRow> = sqlx::query_as(
            r#"SELECT run_id, attempt_number, tier_index, tier_name, model, strategy, failure_pattern,
                   success, cost_units, error_message, started_at, completed_at
               FROM fix_attempts WHERE run_id = ? ORDER BY attempt_number"#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FixAttempt::try_from).collect()
    }
}

async fn insert_fix_attempt(conn: &mut SqliteConnection, attempt: &FixAttempt) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO fix_attempts (run_id, attempt_number, tier_index, tier_name, model, strategy,
               failure_pattern, success, cost_units, error_message, started_at, completed_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(attempt.run_id.to_string())
    .bind(i64::from(attempt.attempt_number))
    .bind(attempt.tier_index as i64)
    .bind(&attempt.tier_name)
    .bind(&attempt.model)
    .bind(attempt.strategy.as_str())
    .bind(&attempt.failure_pattern)
    .bind(attempt.success)
    .bind(attempt.cost_units)
    .bind(attempt.error_message.as_deref())
    .bind(attempt.started_at.to_rfc3339())
    .bind(attempt.completed_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        map_write_error(e, "fix_attempt", || {
            format!("{}#{}", attempt.run_id, attempt.attempt_number)
        })
    })?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct RedFlagRow {
    id: String,
    run_id: String,
    attempt: i64,
    severity: String,
    category: String,
    description: String,
    artifact_refs: String,
    detected_at: String,
}

impl TryFrom<RedFlagRow> for RedFlag {
    type Error = DomainError;

    fn try_from(row: RedFlagRow) -> Result<Self, Self::Error> {
        let severity = Severity::from_str(&row.severity).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid severity: {}", row.severity))
        })?;
        let category: RedFlagCategory =
            serde_json::from_value(serde_json::Value::String(row.category))?;

        Ok(RedFlag {
            id: parse_uuid(&row.id)?,
            run_id: parse_uuid(&row.run_id)?,
            attempt: row.attempt as u32,
            severity,
            category,
            description: row.description,
            artifact_refs: serde_json::from_str(&row.artifact_refs)?,
            detected_at: parse_datetime(&row.detected_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FixAttemptRow {
    run_id: String,
    attempt_number: i64,
    tier_index: i64,
    tier_name: String,
    model: String,
    strategy: String,
    failure_pattern: String,
    success: bool,
    cost_units: f64,
    error_message: Option<String>,
    started_at: String,
    completed_at: String,
}

impl TryFrom<FixAttemptRow> for FixAttempt {
    type Error = DomainError;

    fn try_from(row: FixAttemptRow) -> Result<Self, Self::Error> {
        let strategy = FixStrategy::from_str(&row.strategy).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid strategy: {}", row.strategy))
        })?;

        Ok(FixAttempt {
            run_id: parse_uuid(&row.run_id)?,
            attempt_number: row.attempt_number as u32,
            tier_index: row.tier_index as usize,
            tier_name: row.tier_name,
            model: row.model,
            strategy,
            failure_pattern: row.failure_pattern,
            success: row.success,
            cost_units: row.cost_units,
            error_message: row.error_message,
            started_at: parse_datetime(&row.started_at)?,
            completed_at: parse_datetime(&row.completed_at)?,
        })
    }
}
