//! HTTP API for the UI: derived view, notifications, session and intents

use crate::config::ApiConfig;
use crate::coordinator::{CoordinatorHandle, Intent, IntentAck, LifecycleView};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::notify::BufferedNotifier;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub notifications: Arc<BufferedNotifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/view", get(get_view))
        .route("/notifications", get(get_notifications))
        .route("/session/login", post(login))
        .route("/session/logout", post(logout))
        .route("/session/refresh", post(refresh))
        .route("/intents/mint", post(mint_profile))
        .route("/intents/join", post(join_pool))
        .route("/intents/deposit", post(deposit))
        .route("/intents/accept", post(accept))
        .route("/intents/exchange", post(exchange_socials))
        .route("/intents/request-matchmaking", post(request_matchmaking))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server until shutdown is signalled
pub async fn run_server(
    config: ApiConfig,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> CoordinatorResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoordinatorError::Config(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| CoordinatorError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Coordinator error rendered as a JSON response
pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(error: CoordinatorError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::NoSession => StatusCode::UNAUTHORIZED,
            CoordinatorError::NoActiveMatch
            | CoordinatorError::Precondition(_)
            | CoordinatorError::AlreadyInFlight { .. } => StatusCode::CONFLICT,
            CoordinatorError::MutationRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoordinatorError::Wallet(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_view(State(state): State<AppState>) -> ApiResult<LifecycleView> {
    Ok(Json(state.coordinator.view().await?))
}

async fn get_notifications(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.notifications.recent())
}

async fn login(State(state): State<AppState>) -> ApiResult<LifecycleView> {
    Ok(Json(state.coordinator.login().await?))
}

async fn logout(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.coordinator.logout().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.coordinator.refresh().await?;
    Ok(StatusCode::ACCEPTED)
}

async fn submit(state: &AppState, intent: Intent) -> ApiResult<IntentAck> {
    Ok(Json(state.coordinator.submit(intent).await?))
}

async fn mint_profile(
    State(state): State<AppState>,
    Json(request): Json<MintRequest>,
) -> ApiResult<IntentAck> {
    let intent = Intent::MintProfile {
        gender: request.gender,
        preferred: request.preferred,
        age: request.age,
        interests_hash: request.interests_hash,
    };
    submit(&state, intent).await
}

async fn join_pool(State(state): State<AppState>) -> ApiResult<IntentAck> {
    submit(&state, Intent::JoinPool).await
}

async fn deposit(State(state): State<AppState>) -> ApiResult<IntentAck> {
    submit(&state, Intent::Deposit).await
}

async fn accept(State(state): State<AppState>) -> ApiResult<IntentAck> {
    submit(&state, Intent::Accept).await
}

async fn exchange_socials(
    State(state): State<AppState>,
    Json(request): Json<ExchangeRequest>,
) -> ApiResult<IntentAck> {
    submit(
        &state,
        Intent::ExchangeSocials {
            contact: request.contact,
        },
    )
    .await
}

async fn request_matchmaking(State(state): State<AppState>) -> ApiResult<IntentAck> {
    submit(&state, Intent::RequestMatchmaking).await
}

// Request and response types

#[derive(Debug, Deserialize)]
struct MintRequest {
    gender: u8,
    preferred: u8,
    age: u64,
    interests_hash: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeRequest {
    contact: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
