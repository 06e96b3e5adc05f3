pub mod heartbeat;
pub mod monitoring;
pub mod nearest;
pub mod siteinfo;

/// Strips the `Bearer ` prefix from an `Authorization` header, shared by
/// every bearer-token-gated surface (components C, G, H, I).
pub(crate) fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
