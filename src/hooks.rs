//! Injected collaborator capabilities.
//!
//! Scheme detection, export-client classification and session allocation
//! belong to the hosting deployment, not to the filter core. They are
//! expressed as a trait so a host can substitute its own implementation;
//! [`DefaultHooks`] ships a self-contained default.

use std::time::Instant;

use axum::http::{HeaderMap, header};
use dashmap::DashMap;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "FACCIATA_SESSION";

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Capabilities supplied by the hosting environment.
pub trait EdgeHooks: Send + Sync + 'static {
    /// Effective request scheme, honouring any forwarding proxy.
    fn real_scheme(&self, headers: &HeaderMap) -> String;

    /// Whether the caller is itself a static-export/crawler client whose
    /// requests must not trigger origin regeneration.
    fn is_export_client(&self, headers: &HeaderMap) -> bool;

    /// Allocate (or re-attach) a server-side session for the caller.
    fn allocate_session(&self, headers: &HeaderMap) -> SessionTicket;
}

/// Outcome of a session allocation.
#[derive(Debug, Clone)]
pub struct SessionTicket {
    pub id: String,
    /// True when the session was created by this call rather than resumed
    /// from a cookie; fresh tickets are surfaced to the client as Set-Cookie.
    pub fresh: bool,
}

/// Default collaborator implementation.
///
/// Sessions live in a concurrent map keyed by cookie value; export clients
/// are recognised by a User-Agent token.
pub struct DefaultHooks {
    sessions: DashMap<String, Instant>,
    export_agent_token: String,
}

impl DefaultHooks {
    pub fn new(export_agent_token: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            export_agent_token: export_agent_token.into(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn cookie_session(&self, headers: &HeaderMap) -> Option<String> {
        for value in headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                let Some((name, value)) = pair.split_once('=') else {
                    continue;
                };
                if name.trim() == SESSION_COOKIE && !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
        None
    }
}

impl EdgeHooks for DefaultHooks {
    fn real_scheme(&self, headers: &HeaderMap) -> String {
        headers
            .get(FORWARDED_PROTO_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|proto| proto.trim().to_ascii_lowercase())
            .filter(|proto| !proto.is_empty())
            .unwrap_or_else(|| "http".to_string())
    }

    fn is_export_client(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|agent| agent.contains(self.export_agent_token.as_str()))
    }

    fn allocate_session(&self, headers: &HeaderMap) -> SessionTicket {
        if let Some(id) = self.cookie_session(headers) {
            if self.sessions.contains_key(&id) {
                return SessionTicket { id, fresh: false };
            }
            // Unknown cookie value: adopt it so the client stays trackable
            // across filter restarts.
            self.sessions.insert(id.clone(), Instant::now());
            return SessionTicket { id, fresh: false };
        }

        let id = Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), Instant::now());
        SessionTicket { id, fresh: true }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn scheme_defaults_to_http() {
        let hooks = DefaultHooks::new("static-export");
        assert_eq!(hooks.real_scheme(&HeaderMap::new()), "http");
    }

    #[test]
    fn scheme_honours_forwarded_proto() {
        let hooks = DefaultHooks::new("static-export");
        let headers = headers_with("x-forwarded-proto", "HTTPS");
        assert_eq!(hooks.real_scheme(&headers), "https");
    }

    #[test]
    fn export_client_detected_by_agent_token() {
        let hooks = DefaultHooks::new("static-export");
        let headers = headers_with("user-agent", "facciata-static-export/1.0");
        assert!(hooks.is_export_client(&headers));

        let headers = headers_with("user-agent", "Mozilla/5.0");
        assert!(!hooks.is_export_client(&headers));
    }

    #[test]
    fn session_is_fresh_without_cookie() {
        let hooks = DefaultHooks::new("static-export");
        let ticket = hooks.allocate_session(&HeaderMap::new());
        assert!(ticket.fresh);
        assert_eq!(hooks.session_count(), 1);
    }

    #[test]
    fn session_resumes_from_cookie() {
        let hooks = DefaultHooks::new("static-export");
        let first = hooks.allocate_session(&HeaderMap::new());

        let headers = headers_with(
            "cookie",
            &format!("theme=dark; {SESSION_COOKIE}={}", first.id),
        );
        let second = hooks.allocate_session(&headers);

        assert!(!second.fresh);
        assert_eq!(second.id, first.id);
        assert_eq!(hooks.session_count(), 1);
    }
}
