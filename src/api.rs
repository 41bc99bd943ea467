use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rocket::http::{ContentType, Status};
use rocket::request::{self, FromRequest};
use rocket::serde::json::Json;
use rocket::{catch, get, post, Request, State};
use serde_json::Value;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::prompt::is_falsy;
use crate::settings::SERVED_MODEL_NAME;
use crate::types::{ChatCompletionResponse, ErrorResponse, HealthResponse, ModelList};

/// 请求头：原样收集用于 debug 日志，外加 Content-Type 是否声明了 JSON
pub struct RequestHeaders {
    lines: Vec<String>,
    json_body: bool,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestHeaders {
    type Error = Infallible;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let lines = req
            .headers()
            .iter()
            .map(|h| format!("{}: {}", h.name(), h.value()))
            .collect();
        let json_body = req.content_type().is_some_and(is_json_media_type);
        request::Outcome::Success(RequestHeaders { lines, json_body })
    }
}

/// `application/json` 或 `application/*+json`
fn is_json_media_type(ct: &ContentType) -> bool {
    ct.top() == "application"
        && (ct.sub() == "json" || ct.sub().as_str().to_ascii_lowercase().ends_with("+json"))
}

#[get("/health")]
pub async fn health(state: &State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: SERVED_MODEL_NAME.to_string(),
        engine: state.assistant.engine_name().to_string(),
    })
}

#[get("/v1/models")]
pub async fn list_models() -> Json<ModelList> {
    Json(ModelList::served())
}

#[post("/v1/chat/completions", data = "<body>")]
pub async fn chat_completions(
    state: &State<Arc<AppState>>,
    headers: RequestHeaders,
    body: String,
) -> Result<Json<ChatCompletionResponse>, ApiError> {
    tracing::debug!("Received request:");
    tracing::debug!("Headers: {:?}", headers.lines);
    tracing::debug!("Body: {body}");

    if !headers.json_body {
        tracing::error!("Error parsing JSON: request Content-Type is not application/json");
        return Err(ApiError::NotJsonContent);
    }
    let data: Value = serde_json::from_str(&body).map_err(|e| {
        tracing::error!("Error parsing JSON: {e}");
        ApiError::from(e)
    })?;
    tracing::debug!("Parsed JSON data: {data:#}");

    let messages = match data.get("messages") {
        Some(messages) if !is_falsy(messages) => messages,
        _ => {
            tracing::warn!("No messages provided in the request");
            return Err(ApiError::NoMessages);
        }
    };

    let Some(answer) = state.assistant.process_request(messages).await else {
        tracing::error!("LLaVA model returned no answer");
        return Err(ApiError::Processing);
    };

    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| {
            tracing::error!("Error processing request: {e}");
            ApiError::Internal(e.into())
        })?
        .as_secs();
    let response = ChatCompletionResponse::new(answer, created);

    let rendered = serde_json::to_string_pretty(&response).map_err(|e| {
        tracing::error!("Error processing request: {e}");
        ApiError::Internal(e.into())
    })?;
    tracing::debug!("Sending response: {rendered}");
    Ok(Json(response))
}

// 所有错误都用同一个 {"error": ...} 信封

/// 请求体不是合法 UTF-8 时 `String` 数据守卫会以 400 失败
#[catch(400)]
pub fn bad_request() -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: "Invalid JSON in request body".to_string(),
    })
}

#[catch(404)]
pub fn not_found(req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: format!("No route for {} {}", req.method(), req.uri()),
    })
}

#[catch(500)]
pub fn internal_error() -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: "Internal server error".to_string(),
    })
}

#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: status.reason().unwrap_or("Unknown error").to_string(),
    })
}
