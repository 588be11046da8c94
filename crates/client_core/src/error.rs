use reqwest::StatusCode;
use shared::error::{ApiError, ApiException, ErrorCode};
use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not logged in: missing auth token")]
    MissingToken,
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned http {status}{}", status_suffix(.message))]
    Status {
        endpoint: String,
        status: StatusCode,
        message: Option<String>,
    },
    #[error("malformed response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{endpoint} accepted the request but returned no data")]
    MissingData { endpoint: String },
    #[error("server rejected request: {0}")]
    Rejected(#[from] ApiException),
    #[error("invalid api url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("local storage failed: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

fn status_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|message| format!(": {message}"))
        .unwrap_or_default()
}

impl From<anyhow::Error> for ClientError {
    fn from(value: anyhow::Error) -> Self {
        Self::Storage(value.into())
    }
}

impl ClientError {
    /// Whether the backend refused the call because the session is missing or stale.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::MissingToken => true,
            Self::Status { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        let code = match self {
            Self::MissingToken => ErrorCode::Unauthorized,
            Self::Status { .. } if self.is_unauthorized() => ErrorCode::Unauthorized,
            Self::Status { status, .. } if *status == StatusCode::NOT_FOUND => ErrorCode::NotFound,
            Self::Rejected(exception) => exception.code,
            Self::Validation(_) => ErrorCode::Validation,
            _ => ErrorCode::Internal,
        };
        ApiError::new(code, self.to_string())
    }
}
