use crate::api::rest::{ApiError, AppState};
use crate::db::models::user_models::LoginCredentials;
use crate::error::Error;
use crate::security::session::{clear_session, safe_next, session_cookie, CurrentUser, LOGIN_PATH};
use axum::extract::{Form, Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use log::{info, warn};
use serde::Deserialize;

const LOGIN_TEMPLATE: &str = include_str!("../../../templates/login.html");
const DASHBOARD_TEMPLATE: &str = include_str!("../../../templates/dashboard.html");

const LOGIN_FAILED: &str =
    "Please enter a correct username and password. Note that both fields may be case-sensitive.";

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

/// Escape text for HTML element and attribute content
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_login(username: &str, next: &str, error: Option<&str>) -> Html<String> {
    let error_html = match error {
        Some(message) => format!(r#"<p class="form-error">{}</p>"#, escape_html(message)),
        None => String::new(),
    };

    Html(
        LOGIN_TEMPLATE
            .replace("{{error}}", &error_html)
            .replace("{{username}}", &escape_html(username))
            .replace("{{next}}", &escape_html(next)),
    )
}

fn render_dashboard(username: &str, is_admin: bool) -> Html<String> {
    let admin_link = if is_admin {
        r#"<a href="/admin/detections/">Detections</a>"#
    } else {
        ""
    };

    Html(
        DASHBOARD_TEMPLATE
            .replace("{{username}}", &escape_html(username))
            .replace("{{admin_link}}", admin_link),
    )
}

pub async fn dashboard(CurrentUser(claims): CurrentUser) -> Html<String> {
    render_dashboard(&claims.name, claims.is_admin())
}

pub async fn login_page(Query(query): Query<LoginQuery>) -> Html<String> {
    render_login("", query.next.as_deref().unwrap_or(""), None)
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(credentials): Form<LoginCredentials>,
) -> Result<Response, ApiError> {
    let next = credentials.next.clone().unwrap_or_default();

    match state.auth_service.login(&credentials).await {
        Ok((_user, token)) => {
            let target = safe_next(credentials.next.as_deref()).to_string();
            Ok((jar.add(session_cookie(token)), Redirect::to(&target)).into_response())
        }
        Err(e) => match e.downcast_ref::<Error>() {
            Some(Error::Authentication(reason)) => {
                warn!("Failed login for '{}': {}", credentials.username, reason);
                Ok(render_login(&credentials.username, &next, Some(LOGIN_FAILED)).into_response())
            }
            _ => Err(e.into()),
        },
    }
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Redirect) {
    info!("Session closed");
    (clear_session(jar), Redirect::to(LOGIN_PATH))
}
