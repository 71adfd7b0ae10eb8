//! REST API client module for the budgeting backend.
//!
//! This module provides the `ApiClient` for talking to the remote
//! authentication and user endpoints.
//!
//! The API uses token authentication: every request made while a
//! credential is attached carries `Authorization: Token <credential>`.

pub mod client;
pub mod error;

pub use client::{ApiClient, DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
