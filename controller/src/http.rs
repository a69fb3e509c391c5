use core::fmt;
use core::panic::Location;
use std::error::Error as StdError;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub struct HttpErrorBuilder {
    pub code: StatusCode,
    pub loc: &'static Location<'static>,
    pub msg: Option<String>,
}

impl HttpErrorBuilder {
    #[inline]
    #[track_caller]
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            loc: Location::caller(),
            msg: None,
        }
    }

    #[inline]
    pub fn err<T: Into<Box<dyn StdError + Sync + Send + 'static>>>(self) -> impl FnOnce(T) -> HttpError {
        move |source| HttpError {
            code: self.code,
            loc: self.loc,
            msg: self.msg,
            source: Some(source.into()),
        }
    }

    #[inline]
    pub fn msg(self, msg: impl Into<String>) -> HttpError {
        HttpError {
            code: self.code,
            loc: self.loc,
            msg: Some(msg.into()),
            source: None,
        }
    }
}

pub struct HttpError {
    pub code: StatusCode,
    pub loc: &'static Location<'static>,
    pub msg: Option<String>,
    pub source: Option<Box<dyn StdError + Sync + Send + 'static>>,
}

impl HttpError {
    #[inline]
    #[track_caller]
    pub fn not_found() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::NOT_FOUND)
    }

    #[inline]
    #[track_caller]
    pub fn already_exists() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::CONFLICT)
    }

    #[inline]
    #[track_caller]
    pub fn conflict() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::CONFLICT)
    }

    #[inline]
    #[track_caller]
    pub fn bad_request() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::BAD_REQUEST)
    }

    #[inline]
    #[track_caller]
    pub fn unauthorized() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::UNAUTHORIZED)
    }

    #[inline]
    #[track_caller]
    pub fn internal() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.code, self.loc)?;

        if let Some(msg) = &self.msg {
            write!(f, ": {msg}")?;
        }

        if let Some(source) = self.source.as_deref() {
            write!(f, " [source: {source}")?;
            for cause in anyhow::Chain::new(source).skip(1) {
                write!(f, ", because {cause}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        if self.code.is_server_error() {
            error!(error = %self);
        } else {
            debug!(error = %self);
        }

        let body = ErrorBody {
            error: self.msg.clone().unwrap_or_else(|| self.code.to_string()),
        };

        (self.code, Json(body)).into_response()
    }
}

/// Errors raised by [`crate::session::SessionService`], independent of the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("session not found")]
    NotFound,
    #[error("session already exists and is active")]
    AlreadyExists,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("conflicting concurrent update, retries exhausted")]
    Conflict,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for HttpError {
    #[track_caller]
    fn from(err: ServiceError) -> Self {
        let loc = Location::caller();
        match err {
            ServiceError::NotFound => HttpError {
                code: StatusCode::NOT_FOUND,
                loc,
                msg: Some(err.to_string()),
                source: None,
            },
            ServiceError::AlreadyExists => HttpError {
                code: StatusCode::CONFLICT,
                loc,
                msg: Some(err.to_string()),
                source: None,
            },
            ServiceError::InvalidArgument(_) | ServiceError::InvalidStatus(_) | ServiceError::InvalidTransition { .. } => {
                HttpError {
                    code: StatusCode::BAD_REQUEST,
                    loc,
                    msg: Some(err.to_string()),
                    source: None,
                }
            }
            ServiceError::Conflict => HttpError {
                code: StatusCode::CONFLICT,
                loc,
                msg: Some(err.to_string()),
                source: None,
            },
            ServiceError::Internal(source) => HttpError {
                code: StatusCode::INTERNAL_SERVER_ERROR,
                loc,
                msg: None,
                source: Some(source.into()),
            },
        }
    }
}
