use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use stride_ingress::{IngressError, IngressOutcome, MobileSyncRequest};
use stride_types::ActivitySource;

use crate::AppState;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);
    Router::new()
        .route("/health", get(health))
        .route(
            "/webhooks/{provider}",
            get(webhook_validation).post(receive_webhook),
        )
        .route("/sync/mobile", post(mobile_sync))
        .route(
            "/pending-inputs/{activity_id}",
            post(resolve_pending_input).delete(dismiss_pending_input),
        )
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/retry", post(retry_run))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct ValidationQuery {
    #[serde(rename = "hub.challenge")]
    hub_challenge: Option<String>,
}

/// Subscription validation echo used by push providers when a webhook
/// endpoint is registered.
async fn webhook_validation(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<ValidationQuery>,
) -> impl IntoResponse {
    if parse_provider(&state, &provider).is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown provider" })));
    }
    match query.hub_challenge {
        Some(challenge) => (StatusCode::OK, Json(json!({ "hub.challenge": challenge }))),
        None => (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing hub.challenge" }))),
    }
}

fn parse_provider(
    state: &AppState,
    provider: &str,
) -> Option<std::sync::Arc<dyn stride_ingress::SourceProvider>> {
    let source = ActivitySource::parse(provider)?;
    state.providers.get(&source).cloned()
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let Some(source_provider) = parse_provider(&state, &provider) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown provider" })),
        );
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state
        .ingress
        .handle_webhook(source_provider.as_ref(), signature, &body)
        .await
    {
        // Drops still return 200 so upstream does not redeliver.
        Ok(IngressOutcome::Published { count }) => {
            (StatusCode::OK, Json(json!({ "published": count })))
        }
        Ok(_) => (StatusCode::OK, Json(json!({ "published": 0 }))),
        Err(IngressError::InvalidPayload(message)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
        }
        Err(IngressError::AuthFailure(message)) => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
        }
        Err(IngressError::UnknownUser(_)) => (StatusCode::OK, Json(json!({ "published": 0 }))),
        Err(IngressError::Transient(message)) => {
            warn!("webhook ingestion failed transiently: {message}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "temporarily unavailable" })),
            )
        }
    }
}

/// Resolve the mobile bearer token to a user through the integration
/// identity index.
async fn mobile_user_for(state: &AppState, headers: &HeaderMap) -> Result<String, StatusCode> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    state
        .store
        .find_user_by_provider_external_id(ActivitySource::Mobile, token)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn mobile_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MobileSyncRequest>,
) -> impl IntoResponse {
    let user_id = match mobile_user_for(&state, &headers).await {
        Ok(user_id) => user_id,
        Err(status) => return (status, Json(json!({ "error": "unauthorized" }))),
    };

    match state.ingress.handle_mobile_sync(&user_id, request).await {
        Ok(response) => (
            StatusCode::OK,
            Json(serde_json::to_value(response).unwrap_or_default()),
        ),
        Err(IngressError::InvalidPayload(message)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
        }
        Err(e) => {
            warn!("mobile sync failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "temporarily unavailable" })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResolvePendingInput {
    #[serde(default)]
    input_data: HashMap<String, String>,
}

async fn resolve_pending_input(
    State(state): State<AppState>,
    Path(activity_id): Path<String>,
    Json(body): Json<ResolvePendingInput>,
) -> impl IntoResponse {
    match state.store.get_pending_input(&activity_id).await {
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "no pending input" })),
            )
        }
        Err(e) => {
            warn!("pending input lookup failed: {e}");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "temporarily unavailable" })),
            );
        }
        Ok(Some(_)) => {}
    }

    match state
        .pending_inputs
        .resolve(&activity_id, body.input_data)
        .await
    {
        Ok(input) => (
            StatusCode::OK,
            Json(json!({ "activity_id": input.activity_id, "status": "completed" })),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))),
    }
}

async fn dismiss_pending_input(
    State(state): State<AppState>,
    Path(activity_id): Path<String>,
) -> impl IntoResponse {
    match state.pending_inputs.dismiss(&activity_id).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "dismissed" }))),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))),
    }
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    match state.store.get_pipeline_run(&run_id).await {
        Ok(Some(run)) => (
            StatusCode::OK,
            Json(serde_json::to_value(&run).unwrap_or_default()),
        ),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "no such run" }))),
        Err(e) => {
            warn!("run lookup failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "temporarily unavailable" })),
            )
        }
    }
}

/// Republish the run's original payload with the same execution id, so
/// PARTIAL and FAILED runs can be retried from the activity list.
async fn retry_run(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    match state.pending_inputs.retry_run(&run_id).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "status": "retrying" }))),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    use stride_bus::{BusConfig, InProcessBus, Offloader};
    use stride_ingress::{ProviderSdk, StravaProvider};
    use stride_orchestrator::PendingInputService;
    use stride_store::{ExecutionLog, JsonStore, MemoryBlobStore};

    struct NoSdk;

    #[async_trait::async_trait]
    impl ProviderSdk for NoSdk {
        async fn fetch_activity(
            &self,
            _user_id: &str,
            _source: ActivitySource,
            _external_id: &str,
        ) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("not wired in this test")
        }

        async fn fetch_activities_for_day(
            &self,
            _user_id: &str,
            _source: ActivitySource,
            _date: chrono::NaiveDate,
        ) -> anyhow::Result<Vec<serde_json::Value>> {
            anyhow::bail!("not wired in this test")
        }
    }

    async fn test_state(dir: &tempfile::TempDir) -> AppState {
        let store = Arc::new(JsonStore::new(dir.path()).await.unwrap());
        let bus = Arc::new(InProcessBus::new(BusConfig::default()));
        let offloader = Offloader::new(
            Arc::new(MemoryBlobStore::new()),
            "stride",
            stride_bus::DEFAULT_OFFLOAD_THRESHOLD,
        );
        let log = Arc::new(ExecutionLog::new(dir.path().join("executions.jsonl")));
        let ingress = Arc::new(stride_ingress::IngressService::new(
            store.clone(),
            bus.clone(),
            offloader.clone(),
            Arc::new(NoSdk),
            log.clone(),
        ));
        let pending_inputs = Arc::new(PendingInputService::new(
            store.clone(),
            bus,
            offloader,
            log,
        ));
        let mut providers: HashMap<ActivitySource, Arc<dyn stride_ingress::SourceProvider>> =
            HashMap::new();
        providers.insert(
            ActivitySource::Strava,
            Arc::new(StravaProvider::new("secret")),
        );
        AppState {
            ingress,
            providers: Arc::new(providers),
            pending_inputs,
            store,
        }
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir).await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_provider_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir).await);
        let response = app
            .oneshot(
                Request::post("/webhooks/zwift")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unsigned_webhook_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir).await);
        let response = app
            .oneshot(
                Request::post("/webhooks/strava")
                    .body(Body::from(
                        r#"{"object_type":"activity","aspect_type":"create","object_id":1,"owner_id":1}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn validation_echoes_challenge() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir).await);
        let response = app
            .oneshot(
                Request::get("/webhooks/strava?hub.challenge=abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["hub.challenge"], "abc123");
    }

    #[tokio::test]
    async fn missing_pending_input_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir).await);
        let response = app
            .oneshot(
                Request::post("/pending-inputs/strava:999")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"input_data":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mobile_sync_without_token_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir).await);
        let response = app
            .oneshot(
                Request::post("/sync/mobile")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"activities":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn mobile_sync_with_registered_token_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        state
            .store
            .put_user(stride_types::UserRecord::new("u1", chrono::Utc::now()))
            .await
            .unwrap();
        state
            .store
            .register_integration_identity(ActivitySource::Mobile, "device-token-1", "u1")
            .await
            .unwrap();

        let app = router(state);
        let response = app
            .oneshot(
                Request::post("/sync/mobile")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer device-token-1")
                    .body(Body::from(r#"{"activities":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["processedCount"], 0);
        assert_eq!(json["success"], true);
    }
}
