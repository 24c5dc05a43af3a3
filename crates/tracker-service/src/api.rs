//! HTTP API over the tracker.

use crate::service::TrackerService;
use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::{get, post},
	Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracker_types::{EffectKind, Signature, SignatureOutcome, TrackedTransaction};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<TrackerService>,
}

/// Error body returned by every failing handler.
#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	message: String,
}

impl ApiError {
	fn new(status: StatusCode, message: impl Into<String>) -> Self {
		Self {
			status,
			message: message.into(),
		}
	}

	fn not_found(signature: &Signature) -> Self {
		Self::new(
			StatusCode::NOT_FOUND,
			format!("Transaction {} is not tracked", signature),
		)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(
			self.status,
			Json(serde_json::json!({ "error": self.message })),
		)
			.into_response()
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
	pub signature: String,
	pub description: String,
	#[serde(default)]
	pub success_actions: Vec<EffectKind>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutcomeRequest {
	/// Failure reason; absent for a successful outcome
	#[serde(default)]
	pub error: Option<String>,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health_check))
		.route(
			"/transactions",
			get(list_transactions)
				.post(track_transaction)
				.delete(clear_transactions),
		)
		.route(
			"/transactions/{signature}",
			get(get_transaction).delete(remove_transaction),
		)
		.route("/transactions/{signature}/outcome", post(resolve_outcome))
		.with_state(state)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

pub async fn start_http_server(service: Arc<TrackerService>, address: String) -> anyhow::Result<()> {
	let app = router(AppState { service });
	let listener = tokio::net::TcpListener::bind(&address).await?;

	info!("API server listening on {}", address);
	axum::serve(listener, app).await?;

	Ok(())
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
	let tracker = state.service.tracker();
	let source = match state.service.manual_notifier() {
		Some(_) => "manual",
		None => "rpc",
	};

	Json(serde_json::json!({
		"status": "ok",
		"transactions": tracker.list().await.len(),
		"notifier": source,
		"durable": tracker.is_durable(),
	}))
}

async fn list_transactions(State(state): State<AppState>) -> Json<Vec<TrackedTransaction>> {
	Json(state.service.tracker().list().await)
}

async fn track_transaction(
	State(state): State<AppState>,
	Json(request): Json<TrackRequest>,
) -> Result<(StatusCode, Json<TrackedTransaction>), ApiError> {
	if request.signature.trim().is_empty() {
		return Err(ApiError::new(
			StatusCode::BAD_REQUEST,
			"Signature must not be empty",
		));
	}

	let tracker = state.service.tracker();
	let signature = Signature::new(request.signature);
	let status = match tracker.get(&signature).await {
		Some(_) => StatusCode::OK,
		None => StatusCode::CREATED,
	};

	let record = tracker
		.track(signature, request.description, request.success_actions)
		.await;
	Ok((status, Json(record)))
}

async fn clear_transactions(State(state): State<AppState>) -> StatusCode {
	state.service.tracker().clear().await;
	StatusCode::NO_CONTENT
}

async fn get_transaction(
	State(state): State<AppState>,
	Path(signature): Path<String>,
) -> Result<Json<TrackedTransaction>, ApiError> {
	let signature = Signature::new(signature);
	state
		.service
		.tracker()
		.get(&signature)
		.await
		.map(Json)
		.ok_or_else(|| ApiError::not_found(&signature))
}

async fn remove_transaction(
	State(state): State<AppState>,
	Path(signature): Path<String>,
) -> Result<StatusCode, ApiError> {
	let signature = Signature::new(signature);
	if state.service.tracker().remove(&signature).await {
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(ApiError::not_found(&signature))
	}
}

/// Pushes an outcome through the manual notifier.
async fn resolve_outcome(
	State(state): State<AppState>,
	Path(signature): Path<String>,
	Json(request): Json<OutcomeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
	let Some(notifier) = state.service.manual_notifier() else {
		return Err(ApiError::new(
			StatusCode::CONFLICT,
			"Outcomes are reported by the RPC notifier",
		));
	};

	let signature = Signature::new(signature);
	let outcome = match request.error {
		Some(error) => SignatureOutcome::failure(error),
		None => SignatureOutcome::success(),
	};

	let delivered = notifier.resolve(&signature, outcome);
	if delivered == 0 {
		return Err(ApiError::new(
			StatusCode::NOT_FOUND,
			format!("No pending subscription for {}", signature),
		));
	}

	Ok((
		StatusCode::ACCEPTED,
		Json(serde_json::json!({ "delivered": delivered })),
	))
}
