use reqwest::StatusCode;
use shared::ErrorBody;

use super::REQUEST_TIMEOUT;
use crate::user_session::SessionError;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    Network,
    Server,
    Client,
    Decode,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Authentication required")]
    NotAuthenticated,
    #[error("timeout of {}ms exceeded", REQUEST_TIMEOUT.as_millis())]
    Timeout,
    #[error("{0}")]
    Transport(reqwest::Error),
    #[error("Request failed with status code {}", .status.as_u16())]
    Http {
        status: StatusCode,
        body: Option<ErrorBody>,
    },
    #[error("{message}")]
    Rejected { message: String },
    #[error("Invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Transport(error)
        }
    }
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Transport(error) => error.status(),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation(_) | ApiError::Io(_) => ErrorKind::Validation,
            ApiError::NotAuthenticated => ErrorKind::Authentication,
            ApiError::Timeout | ApiError::Transport(_) => ErrorKind::Network,
            ApiError::Http { status, .. } => match *status {
                StatusCode::UNAUTHORIZED => ErrorKind::Authentication,
                StatusCode::FORBIDDEN => ErrorKind::Authorization,
                status if status.is_server_error() => ErrorKind::Server,
                _ => ErrorKind::Client,
            },
            ApiError::Rejected { .. } => ErrorKind::Server,
            ApiError::Decode(_) => ErrorKind::Decode,
            ApiError::Endpoint(_) | ApiError::Session(_) => ErrorKind::Client,
        }
    }

    pub fn message(&self) -> String {
        error_message(self)
    }
}

/// Text to show the user for a failed call. Lookup order: backend `error`,
/// backend `message`, HTTP status text, transport message, generic fallback.
pub fn error_message(error: &ApiError) -> String {
    if let ApiError::Http { status, body } = error {
        if let Some(body) = body {
            if let Some(text) = non_empty(body.error.as_deref()) {
                return text.to_owned();
            }
            if let Some(text) = non_empty(body.message.as_deref()) {
                return text.to_owned();
            }
        }
        if let Some(reason) = status.canonical_reason() {
            return reason.to_owned();
        }
    }
    let text = error.to_string();
    if text.trim().is_empty() {
        GENERIC_ERROR_MESSAGE.to_owned()
    } else {
        text
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|text| !text.trim().is_empty())
}
