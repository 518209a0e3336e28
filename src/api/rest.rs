use crate::api::host_filter::{self, AllowedHosts};
use crate::capture::FrameSourceFactory;
use crate::config::ApiConfig;
use crate::db::repositories::DetectionStore;
use crate::error::Error;
use crate::pipeline::FramePipeline;
use crate::security::auth::AuthService;
use anyhow::Result;
use axum::{
    extract::FromRef,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::info;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

pub mod admin_controller;
pub mod alerts_controller;
pub mod dashboard_controller;
pub mod video_controller;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub detections: Arc<dyn DetectionStore>,
    pub auth_service: Arc<AuthService>,
    pub pipeline: Arc<FramePipeline>,
    pub sources: Arc<dyn FrameSourceFactory>,
    pub allowed_hosts: Arc<AllowedHosts>,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.auth_service)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            Error::Authorization(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Every route of the dashboard, wrapped in the host filter
pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    // The JSON feeds are polled cross-origin by map widgets
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false)
        .max_age(Duration::from_secs(3600));

    Router::new()
        // Dashboard and session routes
        .route("/", get(dashboard_controller::dashboard))
        .route(
            "/login/",
            get(dashboard_controller::login_page).post(dashboard_controller::login),
        )
        .route(
            "/logout/",
            get(dashboard_controller::logout).post(dashboard_controller::logout),
        )
        // API routes
        .route("/api/", get(dashboard_controller::dashboard))
        .route("/api/video_feed/", get(video_controller::video_feed))
        .route("/api/alerts/", get(alerts_controller::latest_alerts))
        .route("/api/locations/", get(alerts_controller::latest_locations))
        .route("/api/health/", get(alerts_controller::health))
        // Admin routes
        .route("/admin/detections/", get(admin_controller::list_detections))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.allowed_hosts),
            host_filter::enforce_allowed_hosts,
        ))
        .with_state(state)
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            state,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let app = build_router(self.state.clone(), &self.config.static_dir);

        // Build the server address
        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen address {}: {}", addr, e)))?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}
