use crate::api::host_filter::AllowedHosts;
use crate::api::rest::{build_router, AppState};
use crate::capture::{CaptureError, FrameSource, FrameSourceFactory};
use crate::config::SecurityConfig;
use crate::db::models::detection_models::NewDetection;
use crate::db::models::user_models::{LoginCredentials, UserRole};
use crate::db::repositories::{DetectionStore, MemoryDetectionStore, MemoryUserStore};
use crate::detector::{Detections, Detector, DetectorError, Frame};
use crate::pipeline::FramePipeline;
use crate::security::auth::AuthService;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

struct StillSource {
    remaining: usize,
}

impl FrameSource for StillSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.remaining == 0 {
            return Err(CaptureError::EndOfStream);
        }
        self.remaining -= 1;
        Ok(Frame::from_pixel(8, 8, image::Rgb([90, 90, 90])))
    }

    fn release(&mut self) {}
}

struct StillFactory;

impl FrameSourceFactory for StillFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        Ok(Box::new(StillSource { remaining: 2 }))
    }
}

struct NothingDetector;

#[async_trait]
impl Detector for NothingDetector {
    async fn detect(&self, frame: &Frame) -> Result<Detections, DetectorError> {
        Ok(Detections::passthrough(frame))
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryDetectionStore>,
    auth: Arc<AuthService>,
}

impl TestApp {
    async fn new() -> Self {
        let store = Arc::new(MemoryDetectionStore::new());
        let config = SecurityConfig {
            password_hash_cost: 4,
            ..SecurityConfig::default()
        };
        let auth = Arc::new(AuthService::new(Arc::new(MemoryUserStore::new()), &config));
        auth.register("ranger", "trail-mix", UserRole::Viewer).await.unwrap();
        auth.register("warden", "big-keys", UserRole::Admin).await.unwrap();

        let pipeline = Arc::new(FramePipeline::new(
            Arc::new(NothingDetector),
            store.clone(),
            None,
            80,
        ));

        let state = AppState {
            detections: store.clone(),
            auth_service: auth.clone(),
            pipeline,
            sources: Arc::new(StillFactory),
            allowed_hosts: Arc::new(AllowedHosts::new(&["localhost".to_string()], false)),
        };

        Self {
            router: build_router(state, Path::new("static")),
            store,
            auth,
        }
    }

    async fn session_for(&self, username: &str, password: &str) -> String {
        let (_, token) = self
            .auth
            .login(&LoginCredentials {
                username: username.to_string(),
                password: password.to_string(),
                next: None,
            })
            .await
            .unwrap();
        format!("sessionid={}", token)
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "localhost:8000")
        .body(Body::empty())
        .unwrap()
}

fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "localhost")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, "localhost")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    hyper::body::to_bytes(response.into_body()).await.unwrap().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_value(response: &Response, name: header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_alerts_and_locations_shapes() {
    let app = TestApp::new().await;
    let now = Utc::now();
    app.store
        .insert(&NewDetection::now("fire", 0.88).at(now - Duration::minutes(5)))
        .await
        .unwrap();
    app.store
        .insert(&NewDetection::now("animal", 0.61).at(now - Duration::minutes(40)))
        .await
        .unwrap();

    let response = app.send(get("/api/alerts/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let alerts = body_json(response).await;
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["class"], "fire");
    for key in ["timestamp", "confidence", "bbox", "location", "raw"] {
        assert!(alerts[0].get(key).is_some(), "missing {}", key);
    }

    let locations = body_json(app.send(get("/api/locations/")).await).await;
    let ids: Vec<&str> = locations
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["animal", "fire"]);
    assert_eq!(locations[1]["latest"]["confidence"], 0.88);
}

#[tokio::test]
async fn test_dashboard_requires_login() {
    let app = TestApp::new().await;

    let response = app.send(get("/")).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(header_value(&response, header::LOCATION), "/login/?next=%2F");

    let response = app.send(get("/api/")).await;
    assert_eq!(header_value(&response, header::LOCATION), "/login/?next=%2Fapi%2F");
}

#[tokio::test]
async fn test_login_sets_session_and_redirects() {
    let app = TestApp::new().await;

    let response = app
        .send(post_form("/login/", "username=ranger&password=trail-mix&next=%2Fapi%2F"))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(header_value(&response, header::LOCATION), "/api/");

    let set_cookie = header_value(&response, header::SET_COOKIE);
    assert!(set_cookie.starts_with("sessionid="));
    assert!(set_cookie.contains("HttpOnly"));

    let cookie = set_cookie.split(';').next().unwrap().to_string();
    let response = app.send(get_with_cookie("/", &cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(page.contains("ranger"));
    assert!(page.contains("/api/video_feed/"));
}

#[tokio::test]
async fn test_login_ignores_offsite_next() {
    let app = TestApp::new().await;

    let response = app
        .send(post_form(
            "/login/",
            "username=ranger&password=trail-mix&next=https%3A%2F%2Fevil.example%2F",
        ))
        .await;
    assert_eq!(header_value(&response, header::LOCATION), "/");
}

#[tokio::test]
async fn test_login_ignores_next_with_control_characters() {
    let app = TestApp::new().await;

    for next in ["%2F%09%2Fevil.example", "%2F%0D%0A", "%2Fa%0Ab"] {
        let body = format!("username=ranger&password=trail-mix&next={}", next);
        let response = app.send(post_form("/login/", &body)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(header_value(&response, header::LOCATION), "/");
    }
}

#[tokio::test]
async fn test_bad_login_rerenders_form() {
    let app = TestApp::new().await;

    let response = app
        .send(post_form("/login/", "username=ranger&password=wrong"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let page = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(page.contains("form-error"));
    assert!(page.contains(r#"value="ranger""#));
}

#[tokio::test]
async fn test_login_page_carries_next() {
    let app = TestApp::new().await;

    let response = app.send(get("/login/?next=%2Fadmin%2Fdetections%2F")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(page.contains(r#"name="next" value="/admin/detections/""#));
}

#[tokio::test]
async fn test_logout_clears_session() {
    let app = TestApp::new().await;
    let cookie = app.session_for("ranger", "trail-mix").await;

    let response = app.send(get_with_cookie("/logout/", &cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(header_value(&response, header::LOCATION), "/login/");

    let set_cookie = header_value(&response, header::SET_COOKIE);
    assert!(set_cookie.starts_with("sessionid="));
    assert!(set_cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_admin_listing_requires_admin_role() {
    let app = TestApp::new().await;
    app.store
        .insert(&NewDetection::now("Human", 0.7))
        .await
        .unwrap();
    app.store
        .insert(&NewDetection::now("animal", 0.5))
        .await
        .unwrap();

    let response = app.send(get("/admin/detections/")).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let viewer = app.session_for("ranger", "trail-mix").await;
    let response = app.send(get_with_cookie("/admin/detections/", &viewer)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["status"], 403);

    let admin = app.session_for("warden", "big-keys").await;
    let response = app
        .send(get_with_cookie("/admin/detections/?class_name=human", &admin))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let rows = body_json(response).await;
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["class_name"], "Human");
    assert_eq!(rows[0]["short_location"], "-");
}

#[tokio::test]
async fn test_health_reports_database() {
    let app = TestApp::new().await;

    let response = app.send(get("/api/health/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"status": "ok", "database": true})
    );
}

#[tokio::test]
async fn test_unknown_host_is_rejected() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .uri("/api/alerts/")
        .header(header::HOST, "evil.example")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(request).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_static_assets_are_served() {
    let app = TestApp::new().await;

    let response = app.send(get("/static/dashboard.js")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_video_feed_streams_multipart_jpegs() {
    let app = TestApp::new().await;

    let response = app.send(get("/api/video_feed/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_value(&response, header::CONTENT_TYPE),
        "multipart/x-mixed-replace; boundary=frame"
    );

    let body = body_bytes(response).await;
    let marker = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let parts = body.windows(marker.len()).filter(|w| *w == marker).count();
    assert_eq!(parts, 2);
    assert!(app.store.is_empty().await);
}
