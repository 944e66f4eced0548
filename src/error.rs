use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::collector::CollectError;
use crate::database::DatabaseError;
use crate::hazemon::UpstreamError;
use crate::service::QueryError;

/// Every failed API call renders as `{"success": false, "error": ...}`
/// plus a few optional context fields.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { message: String, hint: Option<String> },
    #[error("Unauthorized")]
    Unauthorized { hint: String },
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    NotFound(String),
    #[error("Upstream error")]
    BadGateway {
        status: Option<u16>,
        upstream_url: Option<String>,
    },
    /// Details are logged, never returned.
    #[error("Internal error")]
    Internal { detail: String, hint: Option<String> },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            hint: None,
        }
    }

    pub fn internal(detail: impl ToString) -> Self {
        ApiError::Internal {
            detail: detail.to_string(),
            hint: None,
        }
    }

    fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("success".into(), Value::Bool(false));
        body.insert("error".into(), Value::String(self.to_string()));

        match self {
            ApiError::BadRequest { hint: Some(hint), .. }
            | ApiError::Internal { hint: Some(hint), .. }
            | ApiError::Unauthorized { hint } => {
                body.insert("hint".into(), json!(hint));
            }
            ApiError::BadGateway { status, upstream_url } => {
                if let Some(status) = status {
                    body.insert("status".into(), json!(status));
                }
                if let Some(url) = upstream_url {
                    body.insert("upstream_url".into(), json!(url));
                }
            }
            _ => {}
        }

        Value::Object(body)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal { detail, .. } = self {
            error!("Internal error: {}", detail);
        }
        HttpResponse::build(self.status_code()).json(self.body())
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidRequest(message) => ApiError::bad_request(message),
            QueryError::NotFound => ApiError::NotFound("No data".to_string()),
            QueryError::Store(err) => ApiError::internal(err),
        }
    }
}

fn store_failure(err: DatabaseError) -> ApiError {
    ApiError::Internal {
        detail: format!("store write failed: {}", err),
        hint: Some("Check DATABASE_URL and that the database file is writable".to_string()),
    }
}

impl From<CollectError> for ApiError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::Upstream(UpstreamError::Status(status)) => ApiError::BadGateway {
                status: Some(status),
                upstream_url: None,
            },
            CollectError::Upstream(_) => ApiError::BadGateway {
                status: None,
                upstream_url: None,
            },
            CollectError::NoData => ApiError::NotFound("No data from Hazemon".to_string()),
            CollectError::Store(err) => store_failure(err),
        }
    }
}
