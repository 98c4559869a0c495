//! Key generation utilities for rate limiting.

use axum::http::HeaderMap;
use regex::Regex;
use std::net::SocketAddr;
use std::sync::LazyLock;

static UNSAFE_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9:._\-]").expect("static regex is valid"));

/// Resolves the caller's address and turns it into a limiter bucket key.
///
/// Keys carry no scope: every limiter keeps its own buckets. Forwarding
/// headers are client-controlled, so they are only read when the service
/// sits behind a proxy that overwrites them.
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    trust_proxy_headers: bool,
}

impl KeyGenerator {
    pub fn new(trust_proxy_headers: bool) -> Self {
        Self { trust_proxy_headers }
    }

    pub fn trusts_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    /// Bucket key such as `sheetguard:ip:10.0.0.1`
    pub fn generate_key(&self, client_ip: &str) -> String {
        Self::sanitize_key(&format!("sheetguard:ip:{}", client_ip))
    }

    /// Client address: the peer, or the forwarding headers when trusted
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_proxy_headers {
            if let Some(ip) = forwarded_ip(headers) {
                return ip;
            }
        }

        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Replace anything outside `[A-Za-z0-9:._-]` with `_`
    pub fn sanitize_key(key: &str) -> String {
        UNSAFE_KEY_CHARS.replace_all(key, "_").into_owned()
    }
}

/// First `x-forwarded-for` hop, then `x-real-ip`
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first_ip) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return Some(first_ip.to_string());
        }
    }
    header_str(headers, "x-real-ip").map(str::to_string)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
