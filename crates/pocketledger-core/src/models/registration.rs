use serde::{Deserialize, Serialize};

/// Body of `POST /auth/registration/`.
///
/// Field names follow the registration endpoint. Callers are expected to
/// check [`RegistrationForm::passwords_match`] before submitting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RegistrationForm {
    pub username: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl RegistrationForm {
    pub fn new(username: &str, email: &str, password: &str, confirmation: &str) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            password1: password.to_string(),
            password2: confirmation.to_string(),
            first_name: None,
            last_name: None,
        }
    }

    pub fn passwords_match(&self) -> bool {
        self.password1 == self.password2
    }
}
