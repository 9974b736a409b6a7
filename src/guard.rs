//! Extension guard.
//!
//! Classifies the trailing file extension of a request path and rejects a
//! small denylist outright with 403. The denylist exists to stop clients
//! from directly requesting server-side template/config files the routing
//! layer does not otherwise protect.

use std::{collections::HashSet, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::debug;

use crate::hooks::{EdgeHooks, SESSION_COOKIE};

/// Marker attached to guard-issued 403 responses so the logging layer can
/// treat them as expected traffic.
#[derive(Clone, Copy, Debug)]
pub struct GuardRejection;

/// Immutable denylist of dot-prefixed extensions, built once at startup.
#[derive(Debug, Clone)]
pub struct DenySet {
    extensions: HashSet<String>,
}

impl DenySet {
    pub fn new(extensions: impl IntoIterator<Item = String>) -> Self {
        Self {
            extensions: extensions.into_iter().collect(),
        }
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }
}

/// Shared guard state for middleware.
#[derive(Clone)]
pub struct GuardState {
    pub denied: Arc<DenySet>,
    pub hooks: Arc<dyn EdgeHooks>,
}

/// Extension of the final path segment, including the dot, case-sensitive.
///
/// Undefined (`None`) when the final segment contains no dot; dots in
/// earlier segments do not count.
pub fn request_extension(path: &str) -> Option<&str> {
    let segment = match path.rfind('/') {
        Some(index) => &path[index..],
        None => path,
    };
    segment.rfind('.').map(|index| &segment[index..])
}

/// Middleware rejecting denylisted extensions with 403.
///
/// A server-side session is still allocated before rejection so the host
/// keeps tracking the client; fresh sessions are surfaced as Set-Cookie.
pub async fn extension_guard_layer(
    State(guard): State<GuardState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let extension = request_extension(request.uri().path());
    let denied = extension.is_some_and(|ext| guard.denied.contains(ext));
    if !denied {
        return next.run(request).await;
    }

    counter!("facciata_guard_forbidden_total").increment(1);
    debug!(
        target = "facciata::guard",
        path = %request.uri().path(),
        extension = extension.unwrap_or(""),
        "rejecting denylisted extension"
    );

    let ticket = guard.hooks.allocate_session(request.headers());
    let mut response = StatusCode::FORBIDDEN.into_response();
    if ticket.fresh {
        let cookie = format!("{SESSION_COOKIE}={}; Path=/; HttpOnly", ticket.id);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response.extensions_mut().insert(GuardRejection);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_of_final_segment() {
        assert_eq!(request_extension("/theme/config.properties"), Some(".properties"));
        assert_eq!(request_extension("/post/hello.html"), Some(".html"));
        assert_eq!(request_extension("/index.jsp"), Some(".jsp"));
    }

    #[test]
    fn no_dot_in_final_segment_is_undefined() {
        assert_eq!(request_extension("/post/hello"), None);
        assert_eq!(request_extension("/"), None);
        assert_eq!(request_extension("/a.b/c"), None);
    }

    #[test]
    fn last_dot_wins() {
        assert_eq!(request_extension("/archive.tar.gz"), Some(".gz"));
    }

    #[test]
    fn extension_is_case_sensitive() {
        let deny = DenySet::new([".jsp".to_string(), ".properties".to_string()]);
        assert!(deny.contains(".jsp"));
        assert!(!deny.contains(".JSP"));
        assert!(!deny.contains(".html"));
    }
}
