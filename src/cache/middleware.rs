//! Static page cache middleware.
//!
//! Serves cached article pages from disk and regenerates them on demand by
//! fetching the rendered page from the origin. Every failure mode degrades
//! the single request in flight; nothing here fails the pipeline.

use std::{path::Path, sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::hooks::EdgeHooks;

use super::{
    FetchCoordinator, FetchError, OriginClient, PageStore, StoreError, forwarded_headers,
};

const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Predicate selecting cacheable article pages.
///
/// An external convention: article pages live under one path prefix and
/// carry one suffix, and their rendered output changes rarely.
#[derive(Debug, Clone)]
pub struct ArticlePattern {
    prefix: String,
    suffix: String,
}

impl ArticlePattern {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix) && path.ends_with(&self.suffix)
    }
}

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub pattern: ArticlePattern,
    pub store: Arc<PageStore>,
    pub origin: Arc<OriginClient>,
    pub flights: Arc<FetchCoordinator>,
    pub hooks: Arc<dyn EdgeHooks>,
}

#[derive(Debug, Error)]
enum PopulateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Middleware serving and populating the article page cache.
///
/// Hit: full file bytes. Miss: one origin fetch per path at a time (the
/// in-flight coordinator collapses duplicates), write-through to disk,
/// serve the fetched bytes. Fetch failures degrade to serving whatever is
/// on disk, possibly nothing.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn static_page_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }
    let path = request.uri().path().to_string();
    if !cache.pattern.matches(&path) {
        return next.run(request).await;
    }

    let artifact = match cache.store.artifact_path(&path) {
        Ok(artifact) => artifact,
        Err(err) => {
            warn!(
                target = "facciata::cache",
                error = %err,
                "rejecting uncacheable article path"
            );
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match cache.store.read(&artifact).await {
        Ok(Some(bytes)) => {
            counter!("facciata_page_cache_hit_total").increment(1);
            debug!(target = "facciata::cache", outcome = "hit", "serving cached article");
            return html_response(bytes);
        }
        Ok(None) => {}
        Err(err) => {
            error!(target = "facciata::cache", error = %err, "cache read failed");
            return html_response(Bytes::new());
        }
    }

    counter!("facciata_page_cache_miss_total").increment(1);
    let permit = cache.flights.enter(&path).await;

    // A concurrent leader may have populated the file while we queued.
    if let Ok(Some(bytes)) = cache.store.read(&artifact).await {
        drop(permit);
        debug!(
            target = "facciata::cache",
            outcome = "hit_after_wait",
            "serving article populated by a concurrent request"
        );
        return html_response(bytes);
    }

    let fresh = if cache.hooks.is_export_client(request.headers()) {
        // An export client is walking the site to produce exactly these
        // files; fetching back through it would loop.
        counter!("facciata_origin_fetch_skip_total").increment(1);
        debug!(target = "facciata::cache", "skipping origin fetch for export client");
        None
    } else {
        populate(&cache, request.headers(), &path, &artifact).await
    };
    drop(permit);

    match fresh {
        Some(bytes) => html_response(bytes),
        None => {
            let bytes = match cache.store.read(&artifact).await {
                Ok(existing) => existing.unwrap_or_default(),
                Err(err) => {
                    error!(target = "facciata::cache", error = %err, "cache read failed");
                    Bytes::new()
                }
            };
            html_response(bytes)
        }
    }
}

/// Fetch the page from the origin and persist it; `None` on soft failure.
async fn populate(
    cache: &CacheState,
    headers: &HeaderMap,
    path: &str,
    artifact: &Path,
) -> Option<Bytes> {
    let scheme = cache.hooks.real_scheme(headers);
    let started = Instant::now();

    let outcome: Result<Bytes, PopulateError> = async {
        let host = cache.origin.host_for(headers)?;
        let url = cache.origin.page_url(&scheme, &host, path)?;
        let bytes = cache
            .origin
            .fetch_page(url, forwarded_headers(headers))
            .await?;
        cache.store.write_atomic(artifact, &bytes).await?;
        Ok(bytes)
    }
    .await;

    histogram!("facciata_origin_fetch_ms").record(started.elapsed().as_millis() as f64);

    match outcome {
        Ok(bytes) => {
            debug!(
                target = "facciata::cache",
                outcome = "populated",
                bytes = bytes.len(),
                "article fetched from origin and persisted"
            );
            Some(bytes)
        }
        Err(err) => {
            counter!("facciata_origin_fetch_fail_total").increment(1);
            error!(
                target = "facciata::cache",
                error = %err,
                "origin fetch failed, degrading to stored content"
            );
            None
        }
    }
}

fn html_response(bytes: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HTML_CONTENT_TYPE)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
