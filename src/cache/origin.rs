//! Origin renderer client.
//!
//! Builds canonical origin URLs, replays inbound headers on the internal
//! HTTP hop, and performs the cache-population GET. The same client backs
//! the pass-through proxy used as the downstream pipeline stage.

use axum::http::{HeaderMap, Method, StatusCode, header};
use bytes::Bytes;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request carries no host")]
    MissingHost,
    #[error("invalid origin url `{url}`: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("origin request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("origin returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("origin body for {url} is not valid UTF-8")]
    Encoding { url: String },
}

/// HTTP client for the internal hop to the dynamic renderer.
#[derive(Debug, Clone)]
pub struct OriginClient {
    client: reqwest::Client,
    context_path: String,
    host_override: Option<String>,
}

impl OriginClient {
    pub fn new(
        client: reqwest::Client,
        context_path: impl Into<String>,
        host_override: Option<String>,
    ) -> Self {
        Self {
            client,
            context_path: context_path.into(),
            host_override,
        }
    }

    /// Origin host: the configured override, else the inbound Host header.
    pub fn host_for(&self, headers: &HeaderMap) -> Result<String, FetchError> {
        if let Some(host) = &self.host_override {
            return Ok(host.clone());
        }
        headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(|host| host.to_string())
            .ok_or(FetchError::MissingHost)
    }

    /// Canonical page URL: scheme + host + context path + request path with
    /// the trailing extension stripped.
    pub fn page_url(&self, scheme: &str, host: &str, path: &str) -> Result<Url, FetchError> {
        let stripped = match path.rfind('.') {
            Some(index) => &path[..index],
            None => path,
        };
        let raw = format!("{scheme}://{host}{}{stripped}", self.context_path);
        Url::parse(&raw).map_err(|source| FetchError::Url { url: raw, source })
    }

    /// Pass-through URL keeping the path (and query) intact.
    pub fn passthrough_url(
        &self,
        scheme: &str,
        host: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<Url, FetchError> {
        let raw = match query {
            Some(query) => format!("{scheme}://{host}{}{path}?{query}", self.context_path),
            None => format!("{scheme}://{host}{}{path}", self.context_path),
        };
        Url::parse(&raw).map_err(|source| FetchError::Url { url: raw, source })
    }

    /// GET a rendered page for cache population.
    ///
    /// Success is HTTP 200 with a UTF-8 body; anything else is a soft
    /// failure surfaced to the caller for logging and degradation.
    pub async fn fetch_page(&self, url: Url, headers: HeaderMap) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        if std::str::from_utf8(&bytes).is_err() {
            return Err(FetchError::Encoding {
                url: url.to_string(),
            });
        }
        Ok(bytes)
    }

    /// Forward a request unchanged and hand back the origin's response.
    pub async fn passthrough(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }
}

/// Capture inbound request headers for replay on the origin hop.
///
/// Last write wins on duplicate names, mirroring the single-valued map the
/// forwarded header set is specified as.
pub fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        out.insert(name.clone(), value.clone());
    }
    out
}
