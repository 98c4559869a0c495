use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::AuditMetadata;
use crate::error::rate_limit_headers;
use crate::handlers::AppState;
use crate::key_generator::KeyGenerator;

/// Routes that also pass the admin-scope limiter.
pub const ADMIN_PATH_PREFIX: &str = "/api/v1/audit-logs";

/// Per-request data resolved once by [`logging_middleware`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
}

impl RequestContext {
    /// Audit metadata from the caller's headers
    pub fn audit_metadata(&self, headers: &HeaderMap) -> AuditMetadata {
        AuditMetadata::new(
            header_value(headers, "x-user-id"),
            Some(self.client_ip.as_str()),
            header_value(headers, "user-agent"),
            header_value(headers, "x-session-id"),
        )
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request, &state.keys);
    let request_id = Uuid::new_v4().to_string();

    info!(
        target: "sheetguard::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        client_ip,
    });

    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        target: "sheetguard::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Fixed-window admission per client. Every route passes the global limiter;
/// audit-log routes also pass the admin limiter.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = match request.extensions().get::<RequestContext>() {
        Some(ctx) => ctx.client_ip.clone(),
        None => get_client_ip(&request, &state.keys),
    };
    let key = state.keys.generate_key(&client_ip);

    let limiters = state.gateway.limiters();
    let scoped = if request.uri().path().starts_with(ADMIN_PATH_PREFIX) {
        vec![&limiters.global, &limiters.admin]
    } else {
        vec![&limiters.global]
    };

    match state.gateway.admit(&scoped, &key) {
        Ok(decision) => {
            let mut response = next.run(request).await;
            if let Some(decision) = decision {
                response.headers_mut().extend(rate_limit_headers(&decision));
            }
            response
        }
        Err(err) => {
            debug!(
                target: "sheetguard::middleware",
                key = %key,
                path = %request.uri().path(),
                "Rate limit exceeded"
            );
            err.into_response()
        }
    }
}

pub fn get_client_ip(request: &Request, keys: &KeyGenerator) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    keys.client_ip(request.headers(), peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(peer: &str) -> Request {
        let mut request = Request::new(axum::body::Body::empty());
        let peer: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        request
    }

    #[test]
    fn test_get_client_ip_from_connect_info() {
        let request = request_from("203.0.113.9:40000");
        assert_eq!(get_client_ip(&request, &KeyGenerator::default()), "203.0.113.9");
    }

    #[test]
    fn test_forwarded_header_ignored_unless_trusted() {
        let mut request = request_from("203.0.113.9:40000");
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        assert_eq!(get_client_ip(&request, &KeyGenerator::default()), "203.0.113.9");
        assert_eq!(get_client_ip(&request, &KeyGenerator::new(true)), "192.168.1.1");
    }

    #[test]
    fn test_get_client_ip_fallback() {
        let request = Request::new(axum::body::Body::empty());
        assert_eq!(get_client_ip(&request, &KeyGenerator::default()), "unknown");
    }

    #[test]
    fn test_audit_metadata_defaults_to_unknown() {
        let ctx = RequestContext {
            request_id: "r-1".to_string(),
            client_ip: "10.0.0.1".to_string(),
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("alice"));

        let metadata = ctx.audit_metadata(&headers);
        assert_eq!(metadata.user_id, "alice");
        assert_eq!(metadata.ip_address, "10.0.0.1");
        assert_eq!(metadata.user_agent, "unknown");
        assert_eq!(metadata.session_id, "unknown");
    }
}
