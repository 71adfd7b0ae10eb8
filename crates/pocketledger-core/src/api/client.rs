//! API client for the budgeting REST API.
//!
//! `ApiClient` owns the HTTP connection pool and the attached credential.
//! Every request goes through [`ApiClient::execute`], which attaches the
//! `Authorization: Token <credential>` header when a credential is present
//! and retries rate-limited responses.

use std::time::Duration;

use anyhow::Result;
use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use crate::models::{Identity, RegistrationForm};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL, matching a locally running API server.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const LOGIN_PATH: &str = "/auth/login/";
const REGISTRATION_PATH: &str = "/auth/registration/";
const LOGOUT_PATH: &str = "/auth/logout/";
const CURRENT_USER_PATH: &str = "/users/me/";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    key: String,
}

/// API client for the budgeting backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Attach a credential to every subsequent request
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Stop attaching a credential
    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Token {}", token)).map_err(|_| {
                ApiError::InvalidResponse("credential is not a valid header value".into())
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    // ===== Session Endpoints =====

    /// Exchange a username and password for a bearer token
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
        });
        let response: TokenResponse = self.post(LOGIN_PATH, &body).await?;
        Self::require_key(response)
    }

    /// Create an account and return its bearer token
    pub async fn register(&self, form: &RegistrationForm) -> Result<String, ApiError> {
        let response: TokenResponse = self.post(REGISTRATION_PATH, form).await?;
        Self::require_key(response)
    }

    /// Ask the server to invalidate the attached credential
    pub async fn logout(&self) -> Result<(), ApiError> {
        let url = self.url(LOGOUT_PATH);
        self.execute(&url, || self.client.post(&url)).await?;
        Ok(())
    }

    /// Fetch the identity that owns the attached credential
    pub async fn current_user(&self) -> Result<Identity, ApiError> {
        self.get(CURRENT_USER_PATH).await
    }

    fn require_key(response: TokenResponse) -> Result<String, ApiError> {
        if response.key.is_empty() {
            return Err(ApiError::InvalidResponse("token response carried an empty key".into()));
        }
        Ok(response.key)
    }

    // ===== Transport =====

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self.execute(&url, || self.client.get(&url)).await?;
        Self::parse_json(&url, response).await
    }

    async fn post<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self
            .execute(&url, || self.client.post(&url).json(body))
            .await?;
        Self::parse_json(&url, response).await
    }

    async fn parse_json<T: DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            debug!(url = url, error = %e, "Response did not match the expected shape");
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request built by `build`, rebuilding it for each rate-limit retry.
    async fn execute<F>(&self, url: &str, build: F) -> Result<reqwest::Response, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().headers(self.auth_headers()?).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(
                        url = url,
                        retry = retries,
                        backoff_ms = backoff_ms,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new("http://localhost:8000/api/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = client();
        assert_eq!(api.base_url(), "http://localhost:8000/api");
        assert_eq!(api.url(LOGIN_PATH), "http://localhost:8000/api/auth/login/");
    }

    #[test]
    fn test_auth_headers_follow_token() {
        let mut api = client();
        assert!(api.auth_headers().unwrap().get(header::AUTHORIZATION).is_none());

        api.set_token("abc123".to_string());
        let headers = api.auth_headers().unwrap();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Token abc123");

        api.clear_token();
        assert!(!api.has_token());
        assert!(api.auth_headers().unwrap().is_empty());
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = ApiClient::require_key(TokenResponse { key: String::new() });
        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }
}
