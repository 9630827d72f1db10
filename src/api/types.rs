use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ChatMode, UserInput};

pub const UNREACHABLE_HINT: &str =
    "Unable to connect to the server. Please ensure the backend service is running.";
pub const EMPTY_BODY: &str = "Network Error!";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unable to connect to the server: {0}")]
    Unreachable(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

impl ApiError {
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            ApiError::Unreachable(err.to_string())
        } else if err.is_timeout() {
            ApiError::NetworkError("request timed out".to_string())
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }

    /// Text shown to the user when this error is surfaced as a notification.
    pub fn description(&self) -> String {
        match self {
            ApiError::Unreachable(_) => UNREACHABLE_HINT.to_string(),
            ApiError::NetworkError(message)
            | ApiError::Http { message, .. }
            | ApiError::RequestFailed(message) => message.clone(),
            ApiError::InvalidResponse(_) => EMPTY_BODY.to_string(),
        }
    }
}

/// Error codes come back as numbers from some endpoints and strings from others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrCode {
    Number(i64),
    Text(String),
}

impl ErrCode {
    /// `42` and `"42"` name the same code.
    pub fn matches(&self, other: &ErrCode) -> bool {
        self.to_string() == other.to_string()
    }
}

impl fmt::Display for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrCode::Number(n) => write!(f, "{}", n),
            ErrCode::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ErrCode {
    fn from(n: i64) -> Self {
        ErrCode::Number(n)
    }
}

impl From<&str> for ErrCode {
    fn from(s: &str) -> Self {
        ErrCode::Text(s.to_string())
    }
}

/// Which `success: false` replies are expected and must not be surfaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IgnoreCodes {
    #[default]
    None,
    All,
    Codes(Vec<ErrCode>),
}

impl IgnoreCodes {
    pub fn codes<I, C>(codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ErrCode>,
    {
        IgnoreCodes::Codes(codes.into_iter().map(Into::into).collect())
    }

    pub fn ignores(&self, code: Option<&ErrCode>) -> bool {
        match self {
            IgnoreCodes::None => false,
            IgnoreCodes::All => true,
            IgnoreCodes::Codes(codes) => {
                code.is_some_and(|code| codes.iter().any(|c| c.matches(code)))
            }
        }
    }
}

/// Standard JSON wrapper every REST endpoint replies with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub err_code: Option<ErrCode>,
    #[serde(default)]
    pub err_msg: Option<String>,
    pub data: Option<T>,
}

/// An intercepted reply: the parsed envelope plus the HTTP status it came with.
#[derive(Debug, Clone)]
pub struct ApiReply<T> {
    pub envelope: ApiEnvelope<T>,
    pub status: StatusCode,
}

impl<T> ApiReply<T> {
    pub fn is_success(&self) -> bool {
        self.envelope.success
    }

    pub fn data(&self) -> Option<&T> {
        self.envelope.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.envelope.data
    }

    /// Data or an error describing why there is none.
    pub fn require_data(self) -> Result<T, ApiError> {
        let message = self
            .envelope
            .err_msg
            .clone()
            .unwrap_or_else(|| "response carried no data".to_string());
        self.envelope.data.ok_or(ApiError::RequestFailed(message))
    }
}

/// Body posted to the chat completion stream endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub conv_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_code: Option<String>,
    pub chat_mode: ChatMode,
    pub model_name: String,
    pub user_input: UserInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select_param: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_code: Option<String>,
    pub incremental: bool,
}

/// What the transport hands the session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Event(String),
    Closed,
}
