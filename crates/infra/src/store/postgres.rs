//! Postgres-backed request store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `DuplicateCorrelationId` or `AlreadyExists` on insert, `Concurrency` otherwise |
//! | Database (serialization failure) | `40001` | `Concurrency` |
//! | Database (other) | any other | `Storage` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Storage` |
//!
//! Every mutation runs in one transaction: the version check (`SELECT ... FOR
//! UPDATE`), the request row, all stage rows and the new events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use edugen_core::{CorrelationId, ExpectedVersion, RequestId, StudentId};
use edugen_tracker::{ContentRequest, RequestEvent, RequestStage};

use super::{RequestStore, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_content_requests.sql");

#[derive(Debug, Clone)]
pub struct PostgresRequestStore {
    pool: Arc<PgPool>,
}

impl PostgresRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        debug!("request schema ensured");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl RequestStore for PostgresRequestStore {
    #[instrument(skip(self, request, events), fields(request_id = %request.id), err)]
    async fn insert(
        &self,
        request: &ContentRequest,
        events: &[RequestEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO content_requests (
                id, correlation_id, student_id, topic, grade_level, status,
                current_stage, progress_percentage, created_at, updated_at,
                started_at, completed_at, failed_at, video_url, script_text,
                thumbnail_url, error_message, error_stage, error_details,
                retry_count, total_duration_seconds, request_metadata, version
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, 1
            )
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.correlation_id.as_str())
        .bind(request.student_id.as_str())
        .bind(&request.topic)
        .bind(request.grade_level)
        .bind(request.status.as_str())
        .bind(request.current_stage.map(|s| s.as_str()))
        .bind(request.progress_percentage as i16)
        .bind(request.created_at)
        .bind(request.updated_at)
        .bind(request.started_at)
        .bind(request.completed_at)
        .bind(request.failed_at)
        .bind(&request.video_url)
        .bind(&request.script_text)
        .bind(&request.thumbnail_url)
        .bind(&request.error_message)
        .bind(&request.error_stage)
        .bind(&request.error_details)
        .bind(request.retry_count as i32)
        .bind(request.total_duration_seconds)
        .bind(JsonValue::Object(request.request_metadata.clone()))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if !is_unique_violation(&e) {
                map_sqlx_error("insert_request", e)
            } else if violated_constraint(&e) == Some(CORRELATION_ID_CONSTRAINT) {
                StoreError::DuplicateCorrelationId(request.correlation_id.clone())
            } else {
                StoreError::AlreadyExists(request.id)
            }
        })?;

        for stage in &request.stages {
            sqlx::query(
                r#"
                INSERT INTO request_stages (
                    request_id, stage_name, stage_order, status, started_at,
                    completed_at, duration_seconds, retry_count, max_retries,
                    output_data, error_message, error_details
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(request.id.as_uuid())
            .bind(stage.stage_name.as_str())
            .bind(stage.stage_order)
            .bind(stage.status.as_str())
            .bind(stage.started_at)
            .bind(stage.completed_at)
            .bind(stage.duration_seconds)
            .bind(stage.retry_count as i32)
            .bind(stage.max_retries as i32)
            .bind(&stage.output_data)
            .bind(&stage.error_message)
            .bind(&stage.error_details)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_stage", e))?;
        }

        insert_events(&mut tx, events).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(request_id = %id), err)]
    async fn get(&self, id: RequestId) -> Result<Option<ContentRequest>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, correlation_id, student_id, topic, grade_level, status,
                current_stage, progress_percentage, created_at, updated_at,
                started_at, completed_at, failed_at, video_url, script_text,
                thumbnail_url, error_message, error_stage, error_details,
                retry_count, total_duration_seconds, request_metadata, version
            FROM content_requests
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_request", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let request_row = RequestRow::from_row(&row)
            .map_err(|e| StoreError::Storage(format!("failed to decode request row: {e}")))?;

        let stage_rows = sqlx::query(
            r#"
            SELECT
                stage_name, stage_order, status, started_at, completed_at,
                duration_seconds, retry_count, max_retries, output_data,
                error_message, error_details
            FROM request_stages
            WHERE request_id = $1
            ORDER BY stage_order ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stages", e))?;

        let mut stages = Vec::with_capacity(stage_rows.len());
        for row in stage_rows {
            let stage = StageRow::from_row(&row)
                .map_err(|e| StoreError::Storage(format!("failed to decode stage row: {e}")))?;
            stages.push(stage.try_into_stage()?);
        }

        request_row.try_into_request(stages).map(Some)
    }

    #[instrument(
        skip(self, request, events),
        fields(request_id = %request.id, expected = ?expected, event_count = events.len()),
        err
    )]
    async fn save(
        &self,
        request: &ContentRequest,
        expected: ExpectedVersion,
        events: &[RequestEvent],
    ) -> Result<u64, StoreError> {
        let mut tx = self.begin().await?;

        let current: Option<i64> =
            sqlx::query("SELECT version FROM content_requests WHERE id = $1 FOR UPDATE")
                .bind(request.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_request", e))?
                .map(|row| row.try_get::<i64, _>("version"))
                .transpose()
                .map_err(|e| map_sqlx_error("read_version", e))?;

        let Some(current) = current else {
            return Err(StoreError::NotFound(request.id));
        };
        let current = current as u64;
        if !expected.matches(current) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }
        let next = current + 1;

        sqlx::query(
            r#"
            UPDATE content_requests SET
                status = $2,
                current_stage = $3,
                progress_percentage = $4,
                updated_at = $5,
                started_at = $6,
                completed_at = $7,
                failed_at = $8,
                video_url = $9,
                script_text = $10,
                thumbnail_url = $11,
                error_message = $12,
                error_stage = $13,
                error_details = $14,
                retry_count = $15,
                total_duration_seconds = $16,
                request_metadata = $17,
                version = $18
            WHERE id = $1
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.status.as_str())
        .bind(request.current_stage.map(|s| s.as_str()))
        .bind(request.progress_percentage as i16)
        .bind(request.updated_at)
        .bind(request.started_at)
        .bind(request.completed_at)
        .bind(request.failed_at)
        .bind(&request.video_url)
        .bind(&request.script_text)
        .bind(&request.thumbnail_url)
        .bind(&request.error_message)
        .bind(&request.error_stage)
        .bind(&request.error_details)
        .bind(request.retry_count as i32)
        .bind(request.total_duration_seconds)
        .bind(JsonValue::Object(request.request_metadata.clone()))
        .bind(next as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_request", e))?;

        for stage in &request.stages {
            sqlx::query(
                r#"
                UPDATE request_stages SET
                    status = $3,
                    started_at = $4,
                    completed_at = $5,
                    duration_seconds = $6,
                    retry_count = $7,
                    max_retries = $8,
                    output_data = $9,
                    error_message = $10,
                    error_details = $11
                WHERE request_id = $1 AND stage_name = $2
                "#,
            )
            .bind(request.id.as_uuid())
            .bind(stage.stage_name.as_str())
            .bind(stage.status.as_str())
            .bind(stage.started_at)
            .bind(stage.completed_at)
            .bind(stage.duration_seconds)
            .bind(stage.retry_count as i32)
            .bind(stage.max_retries as i32)
            .bind(&stage.output_data)
            .bind(&stage.error_message)
            .bind(&stage.error_details)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_stage", e))?;
        }

        insert_events(&mut tx, events).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(next)
    }

    #[instrument(skip(self, event), fields(request_id = %event.request_id, event_type = %event.event_type), err)]
    async fn append_event(&self, event: &RequestEvent) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        insert_events(&mut tx, std::slice::from_ref(event)).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(request_id = %id), err)]
    async fn events(&self, id: RequestId) -> Result<Vec<RequestEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_id, event_type, stage_name, severity, message, event_data, created_at
            FROM request_events
            WHERE request_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_events", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event = EventRow::from_row(&row)
                .map_err(|e| StoreError::Storage(format!("failed to decode event row: {e}")))?;
            events.push(event.try_into_event()?);
        }
        Ok(events)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

async fn insert_events(
    tx: &mut Transaction<'_, Postgres>,
    events: &[RequestEvent],
) -> Result<(), StoreError> {
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO request_events (
                id, request_id, event_type, stage_name, severity, message, event_data, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.request_id.as_uuid())
        .bind(&event.event_type)
        .bind(event.stage_name.map(|s| s.as_str()))
        .bind(event.severity.as_str())
        .bind(&event.message)
        .bind(&event.event_data)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_event", e))?;
    }
    Ok(())
}

fn decode<T, E: std::fmt::Display>(what: &str, value: Result<T, E>) -> Result<T, StoreError> {
    value.map_err(|e| StoreError::Storage(format!("invalid {what} in storage: {e}")))
}

#[derive(Debug)]
struct RequestRow {
    id: uuid::Uuid,
    correlation_id: String,
    student_id: String,
    topic: String,
    grade_level: Option<i32>,
    status: String,
    current_stage: Option<String>,
    progress_percentage: i16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    video_url: Option<String>,
    script_text: Option<String>,
    thumbnail_url: Option<String>,
    error_message: Option<String>,
    error_stage: Option<String>,
    error_details: Option<JsonValue>,
    retry_count: i32,
    total_duration_seconds: Option<f64>,
    request_metadata: JsonValue,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for RequestRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(RequestRow {
            id: row.try_get("id")?,
            correlation_id: row.try_get("correlation_id")?,
            student_id: row.try_get("student_id")?,
            topic: row.try_get("topic")?,
            grade_level: row.try_get("grade_level")?,
            status: row.try_get("status")?,
            current_stage: row.try_get("current_stage")?,
            progress_percentage: row.try_get("progress_percentage")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            failed_at: row.try_get("failed_at")?,
            video_url: row.try_get("video_url")?,
            script_text: row.try_get("script_text")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            error_message: row.try_get("error_message")?,
            error_stage: row.try_get("error_stage")?,
            error_details: row.try_get("error_details")?,
            retry_count: row.try_get("retry_count")?,
            total_duration_seconds: row.try_get("total_duration_seconds")?,
            request_metadata: row.try_get("request_metadata")?,
            version: row.try_get("version")?,
        })
    }
}

impl RequestRow {
    fn try_into_request(self, stages: Vec<RequestStage>) -> Result<ContentRequest, StoreError> {
        let request_metadata = match self.request_metadata {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };

        Ok(ContentRequest {
            id: RequestId::from_uuid(self.id),
            correlation_id: CorrelationId::from(self.correlation_id),
            student_id: StudentId::new(self.student_id),
            topic: self.topic,
            grade_level: self.grade_level,
            status: decode("status", self.status.parse())?,
            current_stage: self
                .current_stage
                .map(|s| decode("current_stage", s.parse()))
                .transpose()?,
            progress_percentage: self.progress_percentage.clamp(0, 100) as u8,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            video_url: self.video_url,
            script_text: self.script_text,
            thumbnail_url: self.thumbnail_url,
            error_message: self.error_message,
            error_stage: self.error_stage,
            error_details: self.error_details,
            retry_count: self.retry_count.max(0) as u32,
            total_duration_seconds: self.total_duration_seconds,
            request_metadata,
            stages,
            version: self.version.max(0) as u64,
        })
    }
}

#[derive(Debug)]
struct StageRow {
    stage_name: String,
    stage_order: i32,
    status: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_seconds: Option<f64>,
    retry_count: i32,
    max_retries: i32,
    output_data: Option<JsonValue>,
    error_message: Option<String>,
    error_details: Option<JsonValue>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StageRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StageRow {
            stage_name: row.try_get("stage_name")?,
            stage_order: row.try_get("stage_order")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_seconds: row.try_get("duration_seconds")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            output_data: row.try_get("output_data")?,
            error_message: row.try_get("error_message")?,
            error_details: row.try_get("error_details")?,
        })
    }
}

impl StageRow {
    fn try_into_stage(self) -> Result<RequestStage, StoreError> {
        Ok(RequestStage {
            stage_name: decode("stage_name", self.stage_name.parse())?,
            stage_order: self.stage_order,
            status: decode("stage status", self.status.parse())?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_seconds: self.duration_seconds,
            retry_count: self.retry_count.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            output_data: self.output_data,
            error_message: self.error_message,
            error_details: self.error_details,
        })
    }
}

#[derive(Debug)]
struct EventRow {
    id: uuid::Uuid,
    request_id: uuid::Uuid,
    event_type: String,
    stage_name: Option<String>,
    severity: String,
    message: String,
    event_data: JsonValue,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            event_type: row.try_get("event_type")?,
            stage_name: row.try_get("stage_name")?,
            severity: row.try_get("severity")?,
            message: row.try_get("message")?,
            event_data: row.try_get("event_data")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl EventRow {
    fn try_into_event(self) -> Result<RequestEvent, StoreError> {
        Ok(RequestEvent {
            id: self.id,
            request_id: RequestId::from_uuid(self.request_id),
            event_type: self.event_type,
            stage_name: self
                .stage_name
                .map(|s| decode("event stage_name", s.parse()))
                .transpose()?,
            severity: decode("severity", self.severity.parse())?,
            message: self.message,
            event_data: self.event_data,
            created_at: self.created_at,
        })
    }
}

/// Postgres' default name for the `UNIQUE` on `content_requests.correlation_id`.
const CORRELATION_ID_CONSTRAINT: &str = "content_requests_correlation_id_key";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) => db.constraint(),
        _ => None,
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") => StoreError::Concurrency(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Storage(format!("connection pool timed out in {operation}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
