use crate::api::rest::AppState;
use crate::pipeline::encode::MULTIPART_CONTENT_TYPE;
use axum::body::StreamBody;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use log::info;
use std::sync::Arc;

/// Live feed; every request opens its own capture session
pub async fn video_feed(State(state): State<AppState>) -> impl IntoResponse {
    info!("Opening live feed session");

    let stream = Arc::clone(&state.pipeline).start(Arc::clone(&state.sources));

    (
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        StreamBody::new(stream),
    )
}
