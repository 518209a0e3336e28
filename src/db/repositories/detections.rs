use crate::db::models::detection_models::{
    BoundingBox, DetectionEvent, DetectionFilter, Location, NewDetection,
};
use crate::db::repositories::DetectionStore;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

/// Row shape of the detections table
#[derive(Debug, sqlx::FromRow)]
struct DetectionRow {
    id: i64,
    timestamp: DateTime<Utc>,
    class_name: String,
    confidence: f64,
    bbox: Option<Json<BoundingBox>>,
    location: Option<Json<Location>>,
    raw: Option<serde_json::Value>,
}

impl From<DetectionRow> for DetectionEvent {
    fn from(row: DetectionRow) -> Self {
        Self {
            id: row.id,
            timestamp: row.timestamp,
            class_name: row.class_name,
            confidence: row.confidence,
            bbox: row.bbox.map(|Json(b)| b),
            location: row.location.map(|Json(l)| l),
            raw: row.raw,
        }
    }
}

/// ILIKE pattern matching `needle` anywhere, with its own wildcards taken literally
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Detections repository backed by PostgreSQL
#[derive(Clone)]
pub struct DetectionsRepository {
    pool: Arc<PgPool>,
}

impl DetectionsRepository {
    /// Create a new detections repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DetectionStore for DetectionsRepository {
    async fn insert(&self, detection: &NewDetection) -> Result<DetectionEvent> {
        let row = sqlx::query_as::<_, DetectionRow>(
            r#"
            INSERT INTO detections (timestamp, class_name, confidence, bbox, location, raw)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, timestamp, class_name, confidence, bbox, location, raw
            "#,
        )
        .bind(detection.timestamp)
        .bind(&detection.class_name)
        .bind(detection.confidence)
        .bind(detection.bbox.map(Json))
        .bind(detection.location.map(Json))
        .bind(&detection.raw)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create detection: {}", e)))?;

        Ok(row.into())
    }

    async fn recent_since(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<DetectionEvent>> {
        let rows = sqlx::query_as::<_, DetectionRow>(
            r#"
            SELECT id, timestamp, class_name, confidence, bbox, location, raw
            FROM detections
            WHERE timestamp >= $1
            ORDER BY timestamp DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get recent detections: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_by_class(&self, class_name: &str) -> Result<Option<DetectionEvent>> {
        let row = sqlx::query_as::<_, DetectionRow>(
            r#"
            SELECT id, timestamp, class_name, confidence, bbox, location, raw
            FROM detections
            WHERE LOWER(class_name) = LOWER($1)
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(class_name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get latest detection: {}", e)))?;

        Ok(row.map(Into::into))
    }

    async fn search(&self, filter: &DetectionFilter) -> Result<Vec<DetectionEvent>> {
        let rows = sqlx::query_as::<_, DetectionRow>(
            r#"
            SELECT id, timestamp, class_name, confidence, bbox, location, raw
            FROM detections
            WHERE ($1::TEXT IS NULL OR LOWER(class_name) = LOWER($1))
              AND ($2::TEXT IS NULL OR class_name ILIKE $2 ESCAPE '\')
            ORDER BY timestamp DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(filter.class_name())
        .bind(filter.query().map(contains_pattern))
        .bind(filter.effective_limit())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to search detections: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM detections
            WHERE timestamp < $1
            "#,
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to delete old detections: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&*self.pool).await {
            Ok(_) => true,
            Err(e) => {
                error!("Database health check failed: {}", e);
                false
            }
        }
    }
}
