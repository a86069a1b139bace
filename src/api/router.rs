//! Edge router: health and per-user read endpoints behind the rate filter.

use axum::extract::{Extension, Path};
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::api::error::ApiError;
use crate::api::middleware::rate;
use crate::api::types::ApiContext;
use crate::config;
use crate::db::repository::UserStats;
use crate::models::Conversation;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        version: config::APP_VERSION,
    })
}

async fn user_stats(
    Extension(ctx): Extension<ApiContext>,
    Path(user_id): Path<String>,
) -> Result<Json<UserStats>, ApiError> {
    Ok(Json(ctx.store.get_user_stats(&user_id)?))
}

async fn user_conversations(
    Extension(ctx): Extension<ApiContext>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(ctx.store.list_conversations(&user_id, false)?))
}

/// Build the edge router. Every route passes the rate filter first.
pub fn edge_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/users/:user_id/stats", get(user_stats))
        .route("/api/users/:user_id/conversations", get(user_conversations))
        .layer(middleware::from_fn(rate::limit))
        .layer(Extension(ctx))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::PlanTier;
    use crate::remote_store::RemoteStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    const UA: &str = "Mozilla/5.0 (Macintosh) NoraWeb/3.0";
    const CRAWLER_UA: &str = "Mozilla/5.0 (compatible; Googlebot/2.1)";

    fn router() -> (Router, Arc<RemoteStore>) {
        let store = Arc::new(RemoteStore::open_in_memory().unwrap());
        (edge_router(ApiContext::new(Arc::clone(&store))), store)
    }

    fn get_request(uri: &str, ua: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("user-agent", ua)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (router, _) = router();
        let response = router
            .oneshot(get_request("/api/health", UA, "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn stats_endpoint_serves_store_numbers() {
        let (router, store) = router();
        store
            .create_conversation("user-1", "Hola", PlanTier::Free, None)
            .unwrap();

        let response = router
            .oneshot(get_request("/api/users/user-1/stats", UA, "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["conversationCount"], 1);
    }

    #[tokio::test]
    async fn conversations_endpoint_lists_only_that_user() {
        let (router, store) = router();
        store
            .create_conversation("user-1", "Mía", PlanTier::Free, None)
            .unwrap();
        store
            .create_conversation("user-2", "Ajena", PlanTier::Free, None)
            .unwrap();

        let response = router
            .oneshot(get_request(
                "/api/users/user-1/conversations",
                UA,
                "203.0.113.7",
            ))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), 65536).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["title"], "Mía");
    }

    #[tokio::test]
    async fn sixty_first_request_gets_429_with_retry_after() {
        let (router, _) = router();
        for _ in 0..60 {
            let response = router
                .clone()
                .oneshot(get_request("/api/health", UA, "203.0.113.7"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = router
            .oneshot(get_request("/api/health", UA, "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn other_clients_unaffected_by_a_limited_one() {
        let (router, _) = router();
        for _ in 0..61 {
            let _ = router
                .clone()
                .oneshot(get_request("/api/health", UA, "203.0.113.7"))
                .await
                .unwrap();
        }
        let response = router
            .oneshot(get_request("/api/health", UA, "203.0.113.8"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn crawlers_are_never_rate_limited() {
        let (router, _) = router();
        for _ in 0..70 {
            let response = router
                .clone()
                .oneshot(get_request("/api/health", CRAWLER_UA, "203.0.113.7"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
