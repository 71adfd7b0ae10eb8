//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionStore`: the session state machine and single writer of session state
//! - `TokenStore`: durable storage for the bearer token (file, OS keychain, memory)
//! - `SessionError`: failure taxonomy surfaced as display strings
//!
//! The server decides when a token expires; the client learns about it
//! when identity verification fails.

pub mod error;
pub mod session;
pub mod token_store;

pub use error::SessionError;
pub use session::{SessionStatus, SessionStore, SessionView};
pub use token_store::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
