use crate::api::rest::{ApiResult, AppState};
use crate::db::models::detection_models::{AdminDetectionRow, DetectionFilter};
use crate::security::session::AdminUser;
use axum::extract::{Query, State};
use axum::response::Json;
use log::info;

/// Filterable listing of stored detections, admins only.
///
/// `class_name` matches exactly and `q` as a substring, both ignoring case;
/// `limit` defaults to 100 and is capped at 1000.
pub async fn list_detections(
    AdminUser(claims): AdminUser,
    State(state): State<AppState>,
    Query(filter): Query<DetectionFilter>,
) -> ApiResult<Json<Vec<AdminDetectionRow>>> {
    info!("{} listing detections with {:?}", claims.name, filter);

    let events = state.detections.search(&filter).await?;
    Ok(Json(events.iter().map(AdminDetectionRow::from).collect()))
}
