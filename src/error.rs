use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;
use thiserror::Error;

use crate::types::ErrorResponse;

/// HTTP 层可见的错误。每个变体对应固定的状态码和对外文案，
/// 具体原因只写日志，不回给客户端。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request Content-Type is not JSON")]
    NotJsonContent,

    #[error("request has no messages")]
    NoMessages,

    #[error("model produced no answer")]
    Processing,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::InvalidJson(_) | ApiError::NotJsonContent | ApiError::NoMessages => {
                Status::BadRequest
            }
            ApiError::Processing | ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            ApiError::InvalidJson(_) | ApiError::NotJsonContent => "Invalid JSON in request body",
            ApiError::NoMessages => "Invalid input. No messages provided.",
            ApiError::Processing => "Error processing request.",
            ApiError::Internal(_) => "Internal server error",
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let body = ErrorResponse {
            error: self.public_message().to_string(),
        };
        (self.status(), Json(body)).respond_to(req)
    }
}

/// 消息折叠（messages → 文本 + 图片）失败的原因
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("messages should be a non-empty list")]
    NotAList,

    #[error("each message should be an object with a 'content' key")]
    MalformedMessage,

    #[error("image_url should be an object")]
    MalformedImageUrl,

    #[error("data URI has no ',' separator")]
    DataUriWithoutPayload,

    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("image_url.url should be a string")]
    NonStringUrl,

    #[error("text prompt should be a string")]
    NonStringText,

    #[error("text prompt is required")]
    MissingText,
}

/// 远程图片下载失败的原因
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}
