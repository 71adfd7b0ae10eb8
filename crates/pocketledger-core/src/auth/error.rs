use serde_json::Value;
use thiserror::Error;

use crate::api::ApiError;

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed. Please try again.";
pub const REGISTRATION_FAILED_MESSAGE: &str = "Registration failed. Please try again.";
pub const MISSING_CREDENTIALS_MESSAGE: &str = "Username and password required";

/// Failures the session layer reports to its consumers.
///
/// The `Display` text of each variant is exactly what ends up in the
/// session's last-error field.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("Session expired. Please log in again.")]
    SessionExpired,

    #[error("{0}")]
    NetworkFailure(String),

    #[error("Token storage failed: {0}")]
    Storage(#[source] anyhow::Error),
}

impl SessionError {
    /// Classify a failed credential exchange.
    pub fn from_login_failure(err: &ApiError) -> Self {
        if err.is_transport() {
            return SessionError::NetworkFailure(LOGIN_FAILED_MESSAGE.to_string());
        }

        let message = err
            .body_json()
            .and_then(|body| first_non_field_error(&body))
            .unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string());

        match err {
            ApiError::BadRequest(_) | ApiError::Unauthorized | ApiError::AccessDenied(_) => {
                SessionError::InvalidCredentials(message)
            }
            _ => SessionError::NetworkFailure(message),
        }
    }

    /// Classify a failed registration, flattening any field errors.
    pub fn from_registration_failure(err: &ApiError) -> Self {
        if err.is_transport() {
            return SessionError::NetworkFailure(REGISTRATION_FAILED_MESSAGE.to_string());
        }

        let messages = err
            .body_json()
            .map(|body| flatten_field_errors(&body))
            .unwrap_or_default();

        if messages.is_empty() {
            SessionError::ValidationFailed(REGISTRATION_FAILED_MESSAGE.to_string())
        } else {
            SessionError::ValidationFailed(messages.join(". "))
        }
    }
}

fn first_non_field_error(body: &Value) -> Option<String> {
    body.get("non_field_errors")?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

/// Collect every message in a field-error payload, in response order.
///
/// Values may be plain strings, arrays of strings or nested objects
/// (`{"profile": {"phone_number": ["..."]}}`).
pub fn flatten_field_errors(body: &Value) -> Vec<String> {
    let mut messages = Vec::new();
    collect_messages(body, &mut messages);
    messages
}

fn collect_messages(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_messages(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_messages(item, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bad_request(body: Value) -> ApiError {
        ApiError::BadRequest(body.to_string())
    }

    #[test]
    fn test_flatten_field_errors_keeps_order() {
        let body = json!({
            "username": ["A user with that username already exists."],
            "password1": ["This password is too short.", "This password is too common."]
        });
        assert_eq!(
            flatten_field_errors(&body).join(". "),
            "A user with that username already exists. \
             This password is too short. \
             This password is too common."
        );
    }

    #[test]
    fn test_flatten_field_errors_nested_and_empty() {
        let body = json!({"profile": {"phone_number": ["Invalid."]}, "email": [], "code": 3});
        assert_eq!(flatten_field_errors(&body), vec!["Invalid."]);
        assert!(flatten_field_errors(&json!({})).is_empty());
    }

    #[test]
    fn test_login_failure_uses_non_field_error() {
        let err = bad_request(json!({
            "non_field_errors": ["Unable to log in with provided credentials."]
        }));
        let session_err = SessionError::from_login_failure(&err);
        assert!(matches!(session_err, SessionError::InvalidCredentials(_)));
        assert_eq!(session_err.to_string(), "Unable to log in with provided credentials.");
    }

    #[test]
    fn test_login_failure_fallback() {
        let err = bad_request(json!({"password": ["This field may not be blank."]}));
        assert_eq!(SessionError::from_login_failure(&err).to_string(), LOGIN_FAILED_MESSAGE);

        let err = ApiError::ServerError("boom".to_string());
        let session_err = SessionError::from_login_failure(&err);
        assert!(matches!(session_err, SessionError::NetworkFailure(_)));
        assert_eq!(session_err.to_string(), LOGIN_FAILED_MESSAGE);
    }

    #[test]
    fn test_registration_failure_messages() {
        let err = bad_request(json!({"username": ["A"], "password1": ["B", "C"]}));
        assert_eq!(SessionError::from_registration_failure(&err).to_string(), "A. B. C");

        let err = ApiError::BadRequest("not json".to_string());
        assert_eq!(
            SessionError::from_registration_failure(&err).to_string(),
            REGISTRATION_FAILED_MESSAGE
        );
    }

    #[test]
    fn test_session_expired_message() {
        assert_eq!(SessionError::SessionExpired.to_string(), SESSION_EXPIRED_MESSAGE);
    }
}
