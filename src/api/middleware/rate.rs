//! Per-client rate limiting middleware.
//!
//! Fixed window per (client address, user-agent prefix). Known crawlers
//! bypass the counter entirely, so search indexing never sees a 429.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{self, ApiContext};

/// Client address for the rate key: proxy header first, socket second.
fn client_ip(req: &Request<axum::body::Body>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(req: &Request<axum::body::Body>) -> String {
    req.headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Fixed-window rate limiting. Returns 429 with `Retry-After` if exceeded.
/// Accesses `ApiContext` from request extensions.
pub async fn limit(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let ua = user_agent(&req);
    if !types::is_crawler(&ua) {
        let ip = client_ip(&req);

        // MutexGuard is !Send — must drop before .await via block scope
        {
            let mut limiter = ctx
                .rate_limiter
                .lock()
                .map_err(|_| ApiError::Internal("rate limiter lock".into()))?;

            limiter
                .check(&ip, &ua)
                .map_err(|retry_after| ApiError::RateLimited { retry_after })?;
        }
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/health");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn forwarded_header_beats_socket_address() {
        let mut req = request_with(&[("x-forwarded-for", "198.51.100.4, 10.0.0.1")]);
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("127.0.0.1:9999".parse().unwrap()));
        assert_eq!(client_ip(&req), "198.51.100.4");
    }

    #[test]
    fn socket_address_used_without_proxy_header() {
        let mut req = request_with(&[]);
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("203.0.113.9:4321".parse().unwrap()));
        assert_eq!(client_ip(&req), "203.0.113.9");
    }

    #[test]
    fn missing_everything_falls_back_to_unknown() {
        let req = request_with(&[]);
        assert_eq!(client_ip(&req), "unknown");
        assert_eq!(user_agent(&req), "");
    }
}
