use crate::db_types::{Assistant, Call, NewCall};
use crate::error::AppError;
use crate::types::{ActiveCall, CallReport};
use crate::utils::from_unix_seconds;

use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use tracing::{debug, info};
use uuid::Uuid;

const CALL_COLUMNS: &str = "c.id, c.assistant_id, c.student_name, c.student_number, \
     c.listen_url, c.control_url, c.started_at, c.ended_at, c.duration_sec, c.recording_url, \
     c.summary, c.transcript, c.ended_reason, c.viewed, \
     COALESCE(a.cfg->>'name', a.cfg->>'firstMessage') AS assistant_name";

/// Durable mirror of assistants and calls in the managed Postgres database.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Postgres>,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        info!("connected to database");
        Ok(Self { pool })
    }

    /// A store whose connections are only opened on first use.
    #[cfg(test)]
    pub fn lazy(
        database_url: &str,
        acquire_timeout: std::time::Duration,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Insert or refresh an assistant keyed on its provider id.
    pub async fn upsert_assistant(
        &self,
        vapi_id: &str,
        cfg: &Value,
        teacher_id: Option<Uuid>,
        description: Option<&str>,
    ) -> Result<Assistant, AppError> {
        let row = sqlx::query_as::<_, Assistant>(
            "INSERT INTO assistants (vapi_id, cfg, teacher_id, description) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (vapi_id) DO UPDATE SET \
               cfg = EXCLUDED.cfg, \
               teacher_id = COALESCE(EXCLUDED.teacher_id, assistants.teacher_id), \
               description = COALESCE(EXCLUDED.description, assistants.description) \
             RETURNING *",
        )
        .bind(vapi_id)
        .bind(Json(cfg))
        .bind(teacher_id)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        debug!(vapi_id, "upserted assistant");
        Ok(row)
    }

    pub async fn list_assistants(&self) -> Result<Vec<Assistant>, AppError> {
        let rows = sqlx::query_as::<_, Assistant>(
            "SELECT * FROM assistants WHERE deleted_at IS NULL ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_teacher_assistants(
        &self,
        teacher_id: Uuid,
    ) -> Result<Vec<Assistant>, AppError> {
        let rows = sqlx::query_as::<_, Assistant>(
            "SELECT * FROM assistants \
             WHERE teacher_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC",
        )
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Assistants belonging to the teacher who handed out `student_key`.
    pub async fn list_assistants_by_key(
        &self,
        student_key: &str,
    ) -> Result<Vec<Assistant>, AppError> {
        let rows = sqlx::query_as::<_, Assistant>(
            "SELECT a.* FROM assistants a \
             JOIN teachers t ON t.id = a.teacher_id \
             WHERE t.student_key = $1 AND a.deleted_at IS NULL \
             ORDER BY a.created_at DESC",
        )
        .bind(student_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Soft-delete an assistant owned by `teacher_id`. Returns whether a row was affected.
    pub async fn soft_delete_assistant(
        &self,
        vapi_id: &str,
        teacher_id: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE assistants SET deleted_at = now() \
             WHERE vapi_id = $1 AND teacher_id = $2 AND deleted_at IS NULL",
        )
        .bind(vapi_id)
        .bind(teacher_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn assistant_owned_by(
        &self,
        vapi_id: &str,
        teacher_id: Uuid,
    ) -> Result<bool, AppError> {
        let owned: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM assistants \
             WHERE vapi_id = $1 AND teacher_id = $2 AND deleted_at IS NULL)",
        )
        .bind(vapi_id)
        .bind(teacher_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(owned)
    }

    pub async fn insert_call(&self, call: NewCall<'_>) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO calls \
             (id, assistant_id, student_name, student_number, listen_url, control_url, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(call.id)
        .bind(call.assistant_id)
        .bind(call.student_name)
        .bind(call.student_number)
        .bind(call.listen_url)
        .bind(call.control_url)
        .bind(call.started_at)
        .execute(&self.pool)
        .await?;
        debug!(call_id = call.id, "inserted call");
        Ok(())
    }

    /// Record the end-of-call report on the call row.
    pub async fn finish_call(
        &self,
        call_id: &str,
        report: &CallReport,
        tracked: Option<&ActiveCall>,
    ) -> Result<(), AppError> {
        let ended_at = tracked
            .and_then(|c| c.end_time)
            .or(Some(report.timestamp))
            .and_then(from_unix_seconds);
        sqlx::query(
            "UPDATE calls SET \
               recording_url = $2, summary = $3, transcript = $4, ended_reason = $5, \
               duration_sec = COALESCE($6, duration_sec), \
               ended_at = COALESCE(ended_at, $7) \
             WHERE id = $1",
        )
        .bind(call_id)
        .bind(report.recording_url.as_deref())
        .bind(report.summary.as_deref())
        .bind(report.transcript.as_deref())
        .bind(report.ended_reason.as_deref())
        .bind(report.duration)
        .bind(ended_at)
        .execute(&self.pool)
        .await?;
        debug!(call_id, "stored call report");
        Ok(())
    }

    /// Calls placed against any of the teacher's assistants, newest first.
    pub async fn list_teacher_calls(&self, teacher_id: Uuid) -> Result<Vec<Call>, AppError> {
        let rows = sqlx::query_as::<_, Call>(&format!(
            "SELECT {CALL_COLUMNS} FROM calls c \
             JOIN assistants a ON a.vapi_id = c.assistant_id \
             WHERE a.teacher_id = $1 \
             ORDER BY c.started_at DESC"
        ))
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Set the `viewed` flag on a call the teacher owns. Returns whether a row was affected.
    pub async fn mark_call_viewed(
        &self,
        call_id: &str,
        teacher_id: Uuid,
        viewed: bool,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE calls c SET viewed = $3 \
             FROM assistants a \
             WHERE c.id = $1 AND a.vapi_id = c.assistant_id AND a.teacher_id = $2",
        )
        .bind(call_id)
        .bind(teacher_id)
        .bind(viewed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
