//! Rejects requests whose `Host` is not one the site is served under.
//!
//! Patterns follow the usual allowed-hosts rules: an exact name, a leading-dot
//! pattern matching the domain and all of its subdomains, or `*` for anything.

use axum::{
    body::Body,
    extract::State,
    http::{header::HOST, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::warn;
use std::sync::Arc;

/// Hosts accepted while debugging with no explicit list
const DEBUG_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

#[derive(Debug, Clone)]
pub struct AllowedHosts {
    patterns: Vec<String>,
}

impl AllowedHosts {
    pub fn new(hosts: &[String], debug: bool) -> Self {
        let mut patterns: Vec<String> = hosts
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        if patterns.is_empty() && debug {
            patterns = DEBUG_HOSTS.iter().map(|h| h.to_string()).collect();
        }

        Self { patterns }
    }

    /// Whether a `Host` header value (port allowed) matches a pattern
    pub fn is_allowed(&self, host: &str) -> bool {
        let Some(domain) = domain_of(host) else {
            return false;
        };

        self.patterns.iter().any(|pattern| {
            if pattern == "*" {
                return true;
            }
            match pattern.strip_prefix('.') {
                Some(bare) => domain == bare || domain.ends_with(pattern.as_str()),
                None => domain == *pattern,
            }
        })
    }
}

/// Lowercased host without port or trailing dot; `None` for malformed values
fn domain_of(host: &str) -> Option<String> {
    let host = host.trim().to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }

    let domain = if host.starts_with('[') {
        // [v6]:port
        let end = host.find(']')?;
        let rest = &host[end + 1..];
        if !(rest.is_empty() || rest.strip_prefix(':').map_or(false, is_port)) {
            return None;
        }
        host[..=end].to_string()
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if is_port(port) => name.to_string(),
            Some(_) => return None,
            None => host,
        }
    };

    let domain = domain.strip_suffix('.').unwrap_or(&domain).to_string();
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

fn is_port(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

pub async fn enforce_allowed_hosts(
    State(hosts): State<Arc<AllowedHosts>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            request.uri().authority().map(|a| a.to_string())
        });

    match host {
        Some(host) if hosts.is_allowed(&host) => next.run(request).await,
        host => {
            warn!("Rejected request for disallowed host {:?}", host);
            (StatusCode::BAD_REQUEST, "Bad Request (400)").into_response()
        }
    }
}
