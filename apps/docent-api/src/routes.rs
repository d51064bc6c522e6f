use std::convert::Infallible;

use axum::{
	Json, Router,
	body::Body,
	extract::{Path, Query, State, rejection::JsonRejection},
	http::{HeaderMap, Request, StatusCode, header},
	middleware::{self, Next},
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing::{delete, get, post},
};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use docent_service::{
	ChatReply, ChatRequest, CollectionSummary, ConversationContext, DeleteReport, Error,
	PeekedPassage, RetrievalReport, SessionView, TurnEvent,
};

const DEFAULT_PEEK: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
	pub input: String,
	pub doc_content_hash: String,
	pub thread_id: String,
}
impl ChatBody {
	fn into_request(self) -> Result<ChatRequest, ApiError> {
		let blank: Vec<String> = [
			("input", self.input.as_str()),
			("doc_content_hash", self.doc_content_hash.as_str()),
			("thread_id", self.thread_id.as_str()),
		]
		.into_iter()
		.filter(|(_, value)| value.trim().is_empty())
		.map(|(field, _)| field.to_string())
		.collect();

		if !blank.is_empty() {
			return Err(json_error(
				StatusCode::BAD_REQUEST,
				"invalid_request",
				"Required fields must not be blank.",
				Some(blank),
			));
		}

		let context = ConversationContext::new(self.doc_content_hash)?;

		Ok(ChatRequest::new(self.thread_id, self.input, context))
	}
}

#[derive(Debug, Deserialize)]
pub struct PeekParams {
	pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RetrievalBody {
	pub query: String,
	pub doc_content_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
	pub doc_content_hash: String,
	pub count: u64,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/v1/chat", post(chat))
		.route("/v1/chat/stream", post(chat_stream))
		.route_layer(middleware::from_fn_with_state(state.clone(), api_auth))
		.route("/health", get(health))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/collection", get(collection))
		.route("/v1/admin/peek", get(peek))
		.route("/v1/admin/documents/{doc_content_hash}/count", get(count))
		.route("/v1/admin/documents/{doc_content_hash}", delete(delete_document))
		.route("/v1/admin/retrieval", post(retrieval))
		.route("/v1/sessions/{thread_id}", get(session))
		.route_layer(middleware::from_fn_with_state(state.clone(), admin_auth))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn chat(
	State(state): State<AppState>,
	payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
	let Json(body) = payload?;
	let reply = state.service.chat(body.into_request()?).await?;

	Ok(Json(reply))
}

async fn chat_stream(
	State(state): State<AppState>,
	payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
	let Json(body) = payload?;
	let events = state.service.chat_stream(body.into_request()?).await?;
	let events = events.map(|event| Ok::<_, Infallible>(to_sse(&event)));

	Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn collection(State(state): State<AppState>) -> Result<Json<CollectionSummary>, ApiError> {
	Ok(Json(state.service.collection_summary().await?))
}

async fn peek(
	State(state): State<AppState>,
	Query(params): Query<PeekParams>,
) -> Result<Json<Vec<PeekedPassage>>, ApiError> {
	let passages = state.service.peek(params.limit.unwrap_or(DEFAULT_PEEK)).await?;

	Ok(Json(passages))
}

async fn count(
	State(state): State<AppState>,
	Path(doc_content_hash): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
	let count = state.service.count_by_fingerprint(&doc_content_hash).await?;

	Ok(Json(CountResponse { doc_content_hash, count }))
}

async fn delete_document(
	State(state): State<AppState>,
	Path(doc_content_hash): Path<String>,
) -> Result<Json<DeleteReport>, ApiError> {
	Ok(Json(state.service.delete_by_fingerprint(&doc_content_hash).await?))
}

async fn retrieval(
	State(state): State<AppState>,
	payload: Result<Json<RetrievalBody>, JsonRejection>,
) -> Result<Json<RetrievalReport>, ApiError> {
	let Json(body) = payload?;
	let report = state.service.inspect_retrieval(&body.query, &body.doc_content_hash).await?;

	Ok(Json(report))
}

async fn session(
	State(state): State<AppState>,
	Path(thread_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
	Ok(Json(state.service.session(&thread_id).await?))
}

async fn api_auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
	authorize(state.api_token(), req, next).await
}

async fn admin_auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
	authorize(state.admin_token(), req, next).await
}

async fn authorize(expected: Option<&str>, req: Request<Body>, next: Next) -> Response {
	if let Some(expected) = expected
		&& read_bearer_token(req.headers()) != Some(expected)
	{
		return json_error(
			StatusCode::UNAUTHORIZED,
			"unauthorized",
			"A valid Bearer token is required.",
			None,
		)
		.into_response();
	}

	next.run(req).await
}

fn read_bearer_token(headers: &HeaderMap) -> Option<&str> {
	let raw = headers.get(header::AUTHORIZATION)?;
	let token = raw.to_str().ok()?.trim().strip_prefix("Bearer ")?.trim();

	if token.is_empty() { None } else { Some(token) }
}

fn to_sse(event: &TurnEvent) -> Event {
	let data = serde_json::to_string(event).unwrap_or_else(|err| {
		tracing::error!(error = %err, event = event.name(), "Failed to encode stream event.");

		String::from("{}")
	});

	Event::default().event(event.name()).data(data)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), fields }
	}
}

impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		let (status, code) = match &err {
			Error::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
			Error::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
			Error::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
			Error::ResourceInit { .. } => (StatusCode::SERVICE_UNAVAILABLE, "resource_unavailable"),
			Error::Provider { .. } => (StatusCode::BAD_GATEWAY, "provider_error"),
			Error::Session { .. } | Error::Storage { .. } =>
				(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
			Error::Qdrant { .. } => (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable"),
			Error::Retrieval { .. } | Error::Synthesis { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
		};

		if status.is_server_error() {
			tracing::error!(error = %err, error_code = code, "Request failed.");
		}

		json_error(status, code, err.to_string(), None)
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		json_error(rejection.status(), "invalid_body", rejection.body_text(), None)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}

pub fn json_error(
	status: StatusCode,
	code: &str,
	message: impl Into<String>,
	fields: Option<Vec<String>>,
) -> ApiError {
	ApiError::new(status, code, message, fields)
}
