use crate::cache::CacheError;
use crate::config::Listener as ListenerConfig;
use crate::service::RankingService;
use crate::types::RankingSnapshot;
use crate::webhook::{DonationWebhook, WebhookBody, WebhookError, WebhookSummary};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub ranking: RankingService,
    pub webhook: Arc<DonationWebhook>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ranking", get(ranking))
        .route("/donation-webhook", post(donation_webhook))
        .with_state(state)
}

pub async fn serve(listener: ListenerConfig, state: AppState) -> Result<(), ServeError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "ranking API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Serialize)]
struct ErrorMessage {
    message: String,
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: ErrorMessage,
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = Json(ApiErrorResponse {
        error: ErrorMessage { message },
    });
    (status, body).into_response()
}

#[derive(Deserialize, Debug, Default)]
struct RankingParams {
    #[serde(rename = "clearCache")]
    clear_cache: Option<String>,
}

impl RankingParams {
    fn bust_cache(&self) -> bool {
        self.clear_cache.as_deref().is_some_and(|flag| {
            matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
        })
    }
}

async fn ranking(
    State(state): State<AppState>,
    Query(params): Query<RankingParams>,
) -> Result<Json<DataResponse<Arc<RankingSnapshot>>>, CacheError> {
    let snapshot = state.ranking.query_with(params.bust_cache()).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

async fn donation_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WebhookSummary>, WebhookError> {
    state.webhook.handle(WebhookBody::parse(&body)).await.map(Json)
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        error_response(StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        error_response(status, self.to_string())
    }
}
