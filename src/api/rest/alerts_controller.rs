use crate::api::rest::{ApiResult, AppState};
use crate::db::models::detection_models::{AlertView, CategoryLocation};
use crate::services::alerts;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
}

/// Detections of the last 30 minutes, newest first
pub async fn latest_alerts(State(state): State<AppState>) -> ApiResult<Json<Vec<AlertView>>> {
    let alerts = alerts::recent_alerts(state.detections.as_ref(), Utc::now()).await?;
    Ok(Json(alerts))
}

/// Last sighting of each tracked category
pub async fn latest_locations(State(state): State<AppState>) -> ApiResult<Json<Vec<CategoryLocation>>> {
    let locations = alerts::latest_locations(state.detections.as_ref()).await?;
    Ok(Json(locations))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = state.detections.health_check().await;

    if database {
        (StatusCode::OK, Json(HealthResponse { status: "ok", database }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "degraded", database }),
        )
    }
}
