//! Session core for the pocketledger budgeting client.
//!
//! The crate owns the client side of authentication against the budgeting
//! API: exchanging credentials for a token, keeping that token in durable
//! storage, attaching it to outgoing requests and recovering when the
//! server stops accepting it.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! let config = pocketledger_core::Config::load()?;
//! let mut session = config.session_store()?;
//! session.start().await;
//! if !session.is_authenticated() && !session.login("alice", "pw").await {
//!     eprintln!("{}", session.last_error().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{SessionError, SessionStatus, SessionStore, SessionView, TokenStore};
pub use config::{Config, TokenBackend};
pub use models::{Identity, RegistrationForm};
