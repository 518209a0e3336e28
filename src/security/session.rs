use crate::api::rest::ApiError;
use crate::error::Error;
use crate::security::auth::AuthService;
use crate::security::Claims;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;
use url::Url;

pub const SESSION_COOKIE: &str = "sessionid";
pub const LOGIN_PATH: &str = "/login/";
pub const HOME_PATH: &str = "/";

/// Logged-in user, resolved from the session cookie.
/// Missing or invalid sessions redirect to the login page.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    Arc<AuthService>: FromRef<S>,
{
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<AuthService>::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        let claims = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| auth.authenticate(cookie.value()).ok());

        match claims {
            Some(claims) => Ok(CurrentUser(claims)),
            None => {
                let target = parts
                    .uri
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or(HOME_PATH);
                Err(Redirect::to(&login_url(target)))
            }
        }
    }
}

/// Logged-in user holding the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    Arc<AuthService>: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(claims) = CurrentUser::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        if !claims.is_admin() {
            let err = Error::Authorization(format!("{} is not an administrator", claims.name));
            return Err(ApiError::from(err).into_response());
        }

        Ok(AdminUser(claims))
    }
}

/// Login page URL that returns to `next` afterwards
pub fn login_url(next: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    format!("{}?next={}", LOGIN_PATH, encoded)
}

/// Post-login destination; anything that is not a local absolute path goes home
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(n) if is_local_path(n) => n,
        _ => HOME_PATH,
    }
}

/// Same-origin absolute path free of whitespace and control characters
fn is_local_path(next: &str) -> bool {
    if !next.starts_with('/') || next.starts_with("//") || next.contains('\\') {
        return false;
    }
    if next.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return false;
    }

    let Ok(base) = Url::parse("http://wildwatch.invalid/") else {
        return false;
    };
    match base.join(next) {
        Ok(resolved) => resolved.origin() == base.origin(),
        Err(_) => false,
    }
}

pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}

pub fn clear_session(jar: CookieJar) -> CookieJar {
    let mut cookie = Cookie::named(SESSION_COOKIE);
    cookie.set_path("/");
    jar.remove(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_must_stay_on_site() {
        assert_eq!(safe_next(Some("/api/")), "/api/");
        assert_eq!(safe_next(Some("//evil.example")), "/");
        assert_eq!(safe_next(Some("https://evil.example/")), "/");
        assert_eq!(safe_next(Some("/\\evil")), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn next_with_control_characters_goes_home() {
        assert_eq!(safe_next(Some("/\t/evil.example")), "/");
        assert_eq!(safe_next(Some("/\r\n")), "/");
        assert_eq!(safe_next(Some("/a\nb")), "/");
        assert_eq!(safe_next(Some("/a b")), "/");
        assert_eq!(safe_next(Some("/\u{7f}")), "/");
        assert_eq!(safe_next(Some("/admin/detections/?q=fire")), "/admin/detections/?q=fire");
    }

    #[test]
    fn accepted_next_is_a_valid_redirect() {
        for next in ["/", "/api/", "/admin/detections/?q=fire&limit=5", "/\t/evil.example", "/a\nb"] {
            let target = safe_next(Some(next));
            let response = Redirect::to(target).into_response();
            assert!(response.headers().contains_key(axum::http::header::LOCATION));
        }
    }

    #[test]
    fn login_url_encodes_target() {
        assert_eq!(login_url("/"), "/login/?next=%2F");
        assert_eq!(login_url("/admin/detections/?q=a b"), "/login/?next=%2Fadmin%2Fdetections%2F%3Fq%3Da+b");
    }

    #[test]
    fn session_cookie_is_http_only() {
        let cookie = session_cookie("token".to_string());
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }
}
