//! Router composition and the downstream proxy stage.
//!
//! The filter pipeline runs request context → response logging →
//! extension guard → static page cache → trim filter → reverse-proxy
//! fallback. The no-extension branch always gets the trim wrapper; the
//! cacheable article branch writes final HTML directly and bypasses it.

pub mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header::HeaderName},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::{
    cache::{
        ArticlePattern, CacheState, FetchCoordinator, OriginClient, PageStore, forwarded_headers,
        static_page_layer,
    },
    config::Settings,
    guard::{DenySet, GuardState, extension_guard_layer},
    hooks::{DefaultHooks, EdgeHooks},
    trim::trim_filter_layer,
};

use self::middleware::{log_responses, set_request_context};

use super::error::InfraError;

/// Largest request body the pass-through proxy will buffer.
const PROXY_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Shared state for the whole edge pipeline.
#[derive(Clone)]
pub struct EdgeState {
    pub guard: GuardState,
    pub cache: CacheState,
    pub origin: Arc<OriginClient>,
    pub hooks: Arc<dyn EdgeHooks>,
}

/// Build pipeline state from resolved settings.
pub fn build_state(settings: &Settings) -> Result<EdgeState, InfraError> {
    let client = reqwest::Client::builder()
        .timeout(settings.origin.timeout)
        .build()
        .map_err(|err| {
            InfraError::configuration(format!("failed to build origin client: {err}"))
        })?;

    let hooks: Arc<dyn EdgeHooks> =
        Arc::new(DefaultHooks::new(settings.origin.export_agent_token.clone()));
    let origin = Arc::new(OriginClient::new(
        client,
        settings.origin.context_path.clone(),
        settings.origin.host.clone(),
    ));

    Ok(EdgeState {
        guard: GuardState {
            denied: Arc::new(DenySet::new(settings.guard.forbidden_extensions.clone())),
            hooks: Arc::clone(&hooks),
        },
        cache: CacheState {
            pattern: ArticlePattern::new(
                settings.cache.article_prefix.clone(),
                settings.cache.article_suffix.clone(),
            ),
            store: Arc::new(PageStore::new(settings.cache.root_dir.clone())),
            origin: Arc::clone(&origin),
            flights: Arc::new(FetchCoordinator::new()),
            hooks: Arc::clone(&hooks),
        },
        origin,
        hooks,
    })
}

pub fn build_router(state: EdgeState) -> Router {
    Router::new()
        .fallback(proxy_origin)
        .layer(from_fn(trim_filter_layer))
        .layer(from_fn_with_state(state.cache.clone(), static_page_layer))
        .layer(from_fn_with_state(state.guard.clone(), extension_guard_layer))
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
        .with_state(state)
}

/// Downstream pipeline stage: forward the request to the origin renderer
/// and replay its response.
async fn proxy_origin(State(state): State<EdgeState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let scheme = state.hooks.real_scheme(&parts.headers);
    let host = match state.origin.host_for(&parts.headers) {
        Ok(host) => host,
        Err(err) => return bad_gateway("origin host unresolved", &err),
    };
    let url = match state.origin.passthrough_url(
        &scheme,
        &host,
        parts.uri.path(),
        parts.uri.query(),
    ) {
        Ok(url) => url,
        Err(err) => return bad_gateway("origin url invalid", &err),
    };

    let bytes = match axum::body::to_bytes(body, PROXY_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let upstream = match state
        .origin
        .passthrough(parts.method, url, forwarded_headers(&parts.headers), bytes)
        .await
    {
        Ok(upstream) => upstream,
        Err(err) => return bad_gateway("origin unreachable", &err),
    };

    replay_upstream(upstream).await
}

async fn replay_upstream(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return bad_gateway("origin body unreadable", &err),
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    for (name, value) in headers.iter() {
        if is_end_to_end(name) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
    response
}

/// Hop-by-hop headers stay on their own hop; the body is re-measured.
fn is_end_to_end(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection" | "keep-alive" | "transfer-encoding" | "content-length" | "upgrade"
    )
}

fn bad_gateway(context: &'static str, err: &dyn std::fmt::Display) -> Response {
    error!(target = "facciata::http::proxy", error = %err, context, "proxying to origin failed");
    StatusCode::BAD_GATEWAY.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        assert!(!is_end_to_end(&HeaderName::from_static("connection")));
        assert!(!is_end_to_end(&HeaderName::from_static("transfer-encoding")));
        assert!(!is_end_to_end(&HeaderName::from_static("content-length")));
        assert!(is_end_to_end(&HeaderName::from_static("content-type")));
        assert!(is_end_to_end(&HeaderName::from_static("set-cookie")));
    }
}
