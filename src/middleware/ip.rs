//! Client IP extraction, the default rate limit identifier.
//!
//! # Source Priority
//!
//! 1. `X-Forwarded-For` header (first entry of the comma-separated list)
//! 2. `X-Real-IP` header
//! 3. Peer address from axum's `ConnectInfo<SocketAddr>` extension
//! 4. [`UNKNOWN_IP`]
//!
//! # Security Warning: IP Spoofing Risk
//!
//! The proxy headers are client controlled unless a reverse proxy overwrites
//! them. Deploy behind a proxy that sets `X-Forwarded-For` / `X-Real-IP`
//! itself, or supply a custom identifier function to the rate limiter.
//!
//! All requests without an identifiable address share the `"unknown"`
//! identifier and therefore one quota.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Fallback identifier when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Where the client IP was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn extract_ip_from_headers<B>(req: &Request<B>) -> ExtractedIp<'_> {
    // "client, proxy1, proxy2" - the client is first
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && !first_ip.trim().is_empty()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Extract the client IP of a request.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` when nothing identifies the client.
#[inline]
pub fn extract_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    match extract_ip_from_headers(req) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => match req.extensions().get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => Cow::Owned(addr.ip().to_string()),
            None => Cow::Borrowed(UNKNOWN_IP),
        },
    }
}
