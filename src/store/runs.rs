//! Scan run ledger: run records, fix attempts, and token usage (SQLite).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row as _, SqlitePool};

/// Whether a scan may apply changes or only report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Autonomous,
    Watcher,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Autonomous => "autonomous",
            RunMode::Watcher => "watcher",
        }
    }
}

/// Run lifecycle status. Transitions only move forward from `Running` to
/// one of the terminal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Ok,
    IssuesFound,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::IssuesFound => "issues_found",
            RunStatus::Failed => "failed",
        }
    }
}

/// Terminal result of a run, written exactly once by `complete_run`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub pod_count: i64,
    pub error_count: i64,
    pub fix_count: i64,
    pub report: Option<String>,
    pub log: Option<String>,
}

impl RunOutcome {
    /// Outcome for a run that blew up before producing a report.
    pub fn failed(report: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            pod_count: 0,
            error_count: 0,
            fix_count: 0,
            report: Some(report.into()),
            log: None,
        }
    }
}

/// A fix attempt recorded against a run.
#[derive(Debug, Clone)]
pub struct FixRecord<'a> {
    pub target: &'a str,
    pub resource: &'a str,
    pub error_type: &'a str,
    pub error_message: Option<&'a str>,
    pub fix_applied: Option<&'a str>,
    pub status: &'a str,
}

/// A persisted run row, read back for dashboards and tests.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: i64,
    pub target: String,
    pub mode: String,
    pub status: String,
    pub pod_count: i64,
    pub error_count: i64,
    pub fix_count: i64,
    pub report: Option<String>,
    pub ended: bool,
}

#[derive(Debug, Clone)]
pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Direct pool access for reporting queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a run record in the `running` state and return its id.
    pub async fn create_run(&self, target: &str, mode: RunMode) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO runs (target, mode, status) VALUES (?, ?, 'running')",
        )
        .bind(target)
        .bind(mode.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Move a run to its terminal state, setting the end time. A run that
    /// has already left `running` is never touched again.
    pub async fn complete_run(&self, run_id: i64, outcome: &RunOutcome) -> Result<()> {
        let result = sqlx::query(
            "UPDATE runs SET \
                 ended_at = CURRENT_TIMESTAMP, \
                 status = ?, \
                 pod_count = ?, \
                 error_count = ?, \
                 fix_count = ?, \
                 report = ?, \
                 log = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(outcome.status.as_str())
        .bind(outcome.pod_count)
        .bind(outcome.error_count)
        .bind(outcome.fix_count)
        .bind(outcome.report.as_deref())
        .bind(outcome.log.as_deref())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(run_id, "run completion skipped (already terminal or missing)");
        }
        Ok(())
    }

    /// Record a fix attempt. Independent append — zero or many per run.
    pub async fn record_fix(&self, run_id: i64, fix: &FixRecord<'_>) -> Result<()> {
        sqlx::query(
            "INSERT INTO fixes (run_id, target, resource, error_type, error_message, fix_applied, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(fix.target)
        .bind(fix.resource)
        .bind(fix.error_type)
        .bind(fix.error_message)
        .bind(fix.fix_applied)
        .bind(fix.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record token usage. A `run_id` of 0 marks usage from interactive
    /// conversations not tied to a scheduled run; it is retained for cost
    /// accounting all the same.
    pub async fn record_token_usage(
        &self,
        run_id: i64,
        target: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        cost: f64,
    ) -> Result<()> {
        let total_tokens = input_tokens + output_tokens;
        sqlx::query(
            "INSERT INTO token_usage (run_id, target, model, input_tokens, output_tokens, total_tokens, cost) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(target)
        .bind(model)
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(total_tokens)
        .bind(cost)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a single run row.
    pub async fn get_run(&self, run_id: i64) -> Result<Option<RunRow>> {
        let row = sqlx::query(
            "SELECT id, target, mode, status, pod_count, error_count, fix_count, report, \
                    ended_at IS NOT NULL AS ended \
             FROM runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        let run = row
            .map(|row| -> Result<RunRow, sqlx::Error> {
                Ok(RunRow {
                    id: row.try_get("id")?,
                    target: row.try_get("target")?,
                    mode: row.try_get("mode")?,
                    status: row.try_get("status")?,
                    pod_count: row.try_get("pod_count")?,
                    error_count: row.try_get("error_count")?,
                    fix_count: row.try_get("fix_count")?,
                    report: row.try_get("report").ok(),
                    ended: row.try_get("ended")?,
                })
            })
            .transpose()?;
        Ok(run)
    }
}
