//! HTTP error rendering.
//!
//! Errors render as `{success: false, message}`. The error's debug chain is
//! attached as an [`ErrorDetails`] response extension and only copied into
//! the body by [`expose_details`] outside production.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coordination::directory::DirectoryError;
use coordination::intake::IntakeError;
use coordination::response::ResponseError;
use coordination::store::StoreError;
use serde::Serialize;

use super::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("too many requests")]
    RateLimited,

    /// The inner message is never shown in production.
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            StoreError::InvalidState(msg) | StoreError::ClaimLost(msg) => Self::Conflict(msg),
            other => Self::Internal(format!("{other:?}")),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        match e {
            IntakeError::Invalid(msg) => Self::BadRequest(msg),
            IntakeError::NotFound(_) => Self::NotFound(e.to_string()),
            IntakeError::Store(inner) => inner.into(),
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Invalid(msg) => Self::BadRequest(msg),
            DirectoryError::NotFound(_) => Self::NotFound(e.to_string()),
            DirectoryError::MissingApiKey => Self::Unauthorized(e.to_string()),
            DirectoryError::InvalidApiKey(_) => Self::Forbidden(e.to_string()),
            DirectoryError::Store(inner) => inner.into(),
        }
    }
}

impl From<ResponseError> for ApiError {
    fn from(e: ResponseError) -> Self {
        match e {
            ResponseError::MissingApiKey => Self::Unauthorized(e.to_string()),
            ResponseError::InvalidApiKey(_) | ResponseError::StationNotOnAlert { .. } => {
                Self::Forbidden(e.to_string())
            }
            ResponseError::AlertNotFound(_) | ResponseError::StationNotFound(_) => {
                Self::NotFound(e.to_string())
            }
            ResponseError::AlertClosed { .. } | ResponseError::IllegalTransition(_) => {
                Self::Conflict(e.to_string())
            }
            ResponseError::Store(inner) => inner.into(),
        }
    }
}

/// Message and debug chain of a failed request, carried to [`expose_details`].
#[derive(Debug, Clone)]
pub struct ErrorDetails {
    pub message: String,
    pub details: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

fn render(status: StatusCode, message: &str, details: Option<&str>) -> Response {
    let body = ErrorBody {
        success: false,
        message,
        details,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let message = self.to_string();
        let mut response = render(status, &message, None);
        response.extensions_mut().insert(ErrorDetails {
            message,
            details: format!("{self:?}"),
        });
        response
    }
}

/// Outside production, re-render error bodies with their details.
pub async fn expose_details(State(state): State<AppState>, response: Response) -> Response {
    if state.is_production() {
        return response;
    }
    let Some(error) = response.extensions().get::<ErrorDetails>().cloned() else {
        return response;
    };
    render(response.status(), &error.message, Some(&error.details))
}

pub type ApiResult<T> = Result<T, ApiError>;
