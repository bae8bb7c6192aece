use serde::Deserialize;
use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("realtime: {0}")]
    Realtime(String),
}

/// Non-2xx response from any backend surface (REST, auth, functions).
#[derive(Debug, Clone, Error)]
#[error("backend returned {status}: {message}")]
pub struct BackendError {
    pub status: u16,
    pub message: String,
    pub code: Option<String>,
    pub hint: Option<String>,
}

/// Union of the error bodies the REST, auth and function endpoints produce.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    hint: Option<String>,
}

impl BackendError {
    pub fn from_body(status: u16, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .error_description
            .or(parsed.message)
            .or(parsed.msg)
            .or(parsed.error.clone())
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    format!("http status {status}")
                } else {
                    trimmed.to_string()
                }
            });
        let code = match parsed.code {
            Some(serde_json::Value::String(code)) => Some(code),
            Some(serde_json::Value::Number(code)) => Some(code.to_string()),
            _ => parsed.error,
        };
        Self {
            status,
            message,
            code,
            hint: parsed.hint,
        }
    }

    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Self::from_body(status, &body)
    }

    pub fn api_error(&self) -> ApiError {
        ApiError::new(ErrorCode::from_status(self.status), self.message.clone())
    }

    /// PostgREST reports a missing relation as 404 with SQLSTATE 42P01.
    pub fn is_missing_relation(&self) -> bool {
        self.status == 404 || self.code.as_deref() == Some("42P01")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_rest_error_body() {
        let err = BackendError::from_body(
            409,
            r#"{"code":"23505","details":null,"hint":"check unique","message":"duplicate key"}"#,
        );
        assert_eq!(err.message, "duplicate key");
        assert_eq!(err.code.as_deref(), Some("23505"));
        assert_eq!(err.hint.as_deref(), Some("check unique"));
        assert_eq!(err.api_error().code, ErrorCode::Conflict);
    }

    #[test]
    fn decodes_auth_error_body() {
        let err = BackendError::from_body(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(err.message, "Invalid login credentials");
        assert_eq!(err.code.as_deref(), Some("invalid_grant"));
    }

    #[test]
    fn falls_back_to_raw_body() {
        let err = BackendError::from_body(502, "bad gateway");
        assert_eq!(err.message, "bad gateway");
        let err = BackendError::from_body(500, "");
        assert_eq!(err.message, "http status 500");
    }
}
