//! Data models exchanged with the budgeting API.
//!
//! - `Identity`: the authenticated user's profile payload
//! - `RegistrationForm`: the account-creation request body

pub mod registration;
pub mod user;

pub use registration::RegistrationForm;
pub use user::Identity;
