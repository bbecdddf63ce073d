//! HTTP route handlers.
//!
//! Every Reddit route is a thin mapping onto one `tools/call`. Whatever the
//! MCP server answers (including `{"error": ...}` values from the session)
//! is returned with 200; only request validation produces a 400.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::bridge::protocol::{Tool, ToolCall};
use crate::health::HealthResponse;
use crate::service::BridgeService;

const DEFAULT_LIMIT: u32 = 10;
const DEFAULT_COMMENT_LIMIT: u32 = 20;
const DEFAULT_POST_COMMENT_LIMIT: u32 = 10;
const DEFAULT_POST_COMMENT_DEPTH: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Query(#[from] QueryRejection),
    #[error(transparent)]
    Path(#[from] PathRejection),
    #[error(transparent)]
    Json(#[from] JsonRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Query(rejection) => rejection.body_text(),
            ApiError::Path(rejection) => rejection.body_text(),
            ApiError::Json(rejection) => rejection.body_text(),
        };
        tracing::debug!(error = %message, "Rejected request");
        (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn non_blank(field: &str, value: String) -> Result<String, ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PostQuery {
    pub comment_limit: Option<u32>,
    pub comment_depth: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UnpopularQuery {
    pub limit: Option<u32>,
    pub max_subscribers: Option<u64>,
}

/// Body of `POST /tools/call`. `arguments` may be omitted or null.
#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Value,
}

impl TryFrom<ToolCallRequest> for ToolCall {
    type Error = ApiError;

    fn try_from(req: ToolCallRequest) -> Result<Self, Self::Error> {
        let name = non_blank("name", req.name.unwrap_or_default())?;
        let arguments = match req.arguments {
            Value::Null => Default::default(),
            Value::Object(map) => map,
            _ => {
                return Err(ApiError::BadRequest(
                    "arguments must be a JSON object".to_string(),
                ));
            }
        };
        Ok(ToolCall::named(name).with_arguments(arguments))
    }
}

async fn health(State(service): State<Arc<BridgeService>>) -> Json<HealthResponse> {
    Json(service.health())
}

async fn list_tools(State(service): State<Arc<BridgeService>>) -> Json<Value> {
    Json(service.list_tools().await)
}

async fn call_tool(
    State(service): State<Arc<BridgeService>>,
    body: Result<Json<ToolCallRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let call = ToolCall::try_from(req)?;
    Ok(Json(service.call_tool(call).await))
}

async fn frontpage(
    State(service): State<Arc<BridgeService>>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult {
    let Query(q) = query?;
    let call =
        ToolCall::new(Tool::GetFrontpagePosts).arg("limit", q.limit.unwrap_or(DEFAULT_LIMIT));
    Ok(Json(service.call_tool(call).await))
}

async fn subreddit_info(
    State(service): State<Arc<BridgeService>>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult {
    let Path(subreddit) = path?;
    let subreddit = non_blank("subreddit", subreddit)?;
    let call = ToolCall::new(Tool::GetSubredditInfo).arg("subreddit_name", subreddit);
    Ok(Json(service.call_tool(call).await))
}

async fn subreddit_hot(
    State(service): State<Arc<BridgeService>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult {
    let Path(subreddit) = path?;
    let Query(q) = query?;
    let call = ToolCall::new(Tool::GetSubredditHotPosts)
        .arg("subreddit_name", non_blank("subreddit", subreddit)?)
        .arg("limit", q.limit.unwrap_or(DEFAULT_LIMIT));
    Ok(Json(service.call_tool(call).await))
}

async fn post_content(
    State(service): State<Arc<BridgeService>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<PostQuery>, QueryRejection>,
) -> ApiResult {
    let Path(post_id) = path?;
    let Query(q) = query?;
    let call = ToolCall::new(Tool::GetPostContent)
        .arg("post_id", non_blank("post_id", post_id)?)
        .arg(
            "comment_limit",
            q.comment_limit.unwrap_or(DEFAULT_POST_COMMENT_LIMIT),
        )
        .arg(
            "comment_depth",
            q.comment_depth.unwrap_or(DEFAULT_POST_COMMENT_DEPTH),
        );
    Ok(Json(service.call_tool(call).await))
}

async fn post_comments(
    State(service): State<Arc<BridgeService>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult {
    let Path(post_id) = path?;
    let Query(q) = query?;
    let call = ToolCall::new(Tool::GetPostComments)
        .arg("post_id", non_blank("post_id", post_id)?)
        .arg("limit", q.limit.unwrap_or(DEFAULT_COMMENT_LIMIT));
    Ok(Json(service.call_tool(call).await))
}

async fn search(
    State(service): State<Arc<BridgeService>>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult {
    let Query(q) = query?;
    let call = ToolCall::new(Tool::SearchSubreddits)
        .arg("query", non_blank("query", q.query.unwrap_or_default())?)
        .arg("limit", q.limit.unwrap_or(DEFAULT_LIMIT));
    Ok(Json(service.call_tool(call).await))
}

async fn unpopular(
    State(service): State<Arc<BridgeService>>,
    query: Result<Query<UnpopularQuery>, QueryRejection>,
) -> ApiResult {
    let Query(q) = query?;
    let call = ToolCall::new(Tool::FindUnpopularSubreddits)
        .opt_arg("limit", q.limit)
        .opt_arg("max_subscribers", q.max_subscribers);
    Ok(Json(service.call_tool(call).await))
}

async fn shutdown(State(service): State<Arc<BridgeService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(json!({})))
}

pub fn routes(service: Arc<BridgeService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/call", post(call_tool))
        .route("/reddit/frontpage", get(frontpage))
        .route("/reddit/subreddit/{subreddit}", get(subreddit_info))
        .route("/reddit/subreddit/{subreddit}/hot", get(subreddit_hot))
        .route("/reddit/post/{post_id}", get(post_content))
        .route("/reddit/post/{post_id}/comments", get(post_comments))
        .route("/reddit/search", get(search))
        .route("/reddit/unpopular", get(unpopular))
        .route("/shutdown", post(shutdown))
        .with_state(service)
}
