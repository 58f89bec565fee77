//! Axum server setup and router configuration.

use crate::api;
use crate::state::AppState;
use axum::{Json, Router, response::IntoResponse, routing::get};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .nest("/api/public", api::public::router())
        .nest("/api/internal", api::internal::router())
        .route("/ws", get(api::ws::checkout_ws))
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run the server until `shutdown` completes.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadedConfig, ServerConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chaingate_core::config::EngineConfig;
    use chaingate_core::entities::CryptoCurrencyName;
    use chaingate_core::vault::KdfParams;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://chaingate@localhost/unused")
            .unwrap();
        let config = LoadedConfig {
            server: ServerConfig {
                listen: "127.0.0.1:0".parse().unwrap(),
                internal_token: Some("internal-secret".to_string()),
            },
            master_key: vec![9u8; 32],
            kdf: KdfParams {
                log_n: 4,
                r: 8,
                p: 1,
            },
            blockchains: vec![(
                CryptoCurrencyName::Btc,
                "http://btc-service:9001".parse().unwrap(),
            )],
            blockchain_timeout: Duration::from_secs(1),
            webhook_timeout: Duration::from_secs(1),
            engine: EngineConfig::default(),
        };
        AppState::new(pool, &config).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = build_router(test_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "healthy");
    }

    #[tokio::test]
    async fn test_public_api_requires_api_key() {
        let response = build_router(test_state())
            .oneshot(
                Request::post("/api/public/payment")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_undecryptable_api_key_is_unauthorized() {
        let response = build_router(test_state())
            .oneshot(
                Request::get("/api/public/payments")
                    .header("X-API-KEY", "not-a-sealed-key!")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_internal_webhook_checks_token() {
        let response = build_router(test_state())
            .oneshot(
                Request::post("/api/internal/payment/webhook")
                    .header("X-Internal-Token", "wrong")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_internal_webhook_rejects_bad_amounts() {
        let body = serde_json::json!({
            "paymentId": "btc-1",
            "payCurrency": "btc",
            "paymentState": "paid",
            "payAmount": "1.5",
            "actuallyPaid": "100",
        });
        let response = build_router(test_state())
            .oneshot(
                Request::post("/api/internal/payment/webhook")
                    .header("X-Internal-Token", "internal-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ws_requires_payment_id() {
        let response = build_router(test_state())
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
