//! DTOs exchanged with the issuing authority

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AccessToken, LoginId, Password, RefreshToken};

/// Credentials for the login flow
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// The user's login identifier
    pub user_login_id: LoginId,

    /// The user's password
    pub password: Password,
}

impl LoginRequest {
    /// Constructs a new login request
    pub fn new(user_login_id: impl Into<LoginId>, password: impl Into<Password>) -> Self {
        Self {
            user_login_id: user_login_id.into(),
            password: password.into(),
        }
    }
}

/// A postal address attached to a signup profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Street and number
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// City
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// State or region
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Postal code
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Country
    pub country: Option<String>,
}

/// The profile submitted when creating a new account
///
/// A successful signup logs the new user in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupProfile {
    /// Given name
    pub user_first_name: String,
    /// Family name
    pub user_last_name: String,
    /// Contact email address
    pub user_email: String,
    /// Contact phone number
    pub user_phone_number: String,
    /// ISO 8601 calendar date (`YYYY-MM-DD`)
    pub user_date_of_birth: String,
    #[serde(rename = "addressClass", default, skip_serializing_if = "Vec::is_empty")]
    /// Postal addresses, possibly none
    pub addresses: Vec<Address>,
    /// The login identifier to register
    pub user_login_id: LoginId,
    /// The initial password
    pub user_password: Password,
}

fn bearer() -> String {
    String::from("Bearer")
}

/// Tokens issued by the authority after a login, signup, or renewal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTokens {
    /// The new access token
    pub access_token: AccessToken,

    /// The new refresh token
    ///
    /// The authority rotates refresh tokens on every issuance.
    pub refresh_token: RefreshToken,

    /// Lifetime of the access token, in milliseconds
    #[serde(default)]
    pub expires_in: u64,

    /// The token scheme, normally `Bearer`
    #[serde(default = "bearer")]
    pub token_type: String,

    /// A human-readable status from the authority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IssuedTokens {
    /// The lifetime of the access token as stated by the authority
    #[inline]
    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.expires_in)
    }
}

/// The body the authority sends alongside an error status
#[cfg_attr(not(feature = "http"), allow(dead_code))]
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg_attr(not(feature = "http"), allow(dead_code))]
impl ErrorBody {
    /// Extracts the human-readable reason, falling back to the raw body
    pub(crate) fn reason(raw: &str) -> String {
        serde_json::from_str::<ErrorBody>(raw)
            .ok()
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_else(|| raw.trim().to_owned())
    }
}
