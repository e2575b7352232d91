//! Request and response bodies for the auth endpoints. Caller-facing types keep
//! passwords and tokens in `SecretString`; the borrowed wire structs expose them
//! only for the duration of serialization.

use crate::session::{Role, User};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: SecretString,
}

impl LoginCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterData {
    pub username: String,
    pub email: String,
    pub password: SecretString,
    pub password_confirm: SecretString,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub specialty: Option<String>,
    pub year: Option<String>,
    pub phone_number: Option<String>,
}

/// Result of a refresh exchange. `refresh` is set when the backend rotated it.
#[derive(Debug, Clone)]
pub struct TokenRefresh {
    pub access: SecretString,
    pub refresh: Option<SecretString>,
}

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub(crate) username: &'a str,
    pub(crate) password: &'a str,
}

impl<'a> From<&'a LoginCredentials> for LoginRequest<'a> {
    fn from(credentials: &'a LoginCredentials) -> Self {
        Self {
            username: &credentials.username,
            password: credentials.password.expose_secret(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
    password2: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    specialty: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_number: Option<&'a str>,
}

impl<'a> From<&'a RegisterData> for RegisterRequest<'a> {
    fn from(data: &'a RegisterData) -> Self {
        Self {
            username: &data.username,
            email: &data.email,
            password: data.password.expose_secret(),
            password2: data.password_confirm.expose_secret(),
            first_name: &data.first_name,
            last_name: &data.last_name,
            role: data.role,
            specialty: data.specialty.as_deref(),
            year: data.year.as_deref(),
            phone_number: data.phone_number.as_deref(),
        }
    }
}

/// Body of both the refresh exchange and the logout notification.
#[derive(Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub(crate) refresh: &'a str,
}

#[derive(Serialize)]
pub(crate) struct VerifyRequest<'a> {
    pub(crate) token: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct LoginResponse {
    pub(crate) user: User,
    pub(crate) access: String,
    pub(crate) refresh: String,
}

#[derive(Deserialize)]
pub(crate) struct TokenPairResponse {
    pub(crate) access: String,
    pub(crate) refresh: String,
}

#[derive(Deserialize)]
pub(crate) struct RegisterResponse {
    pub(crate) user: User,
    pub(crate) tokens: TokenPairResponse,
}

#[derive(Deserialize)]
pub(crate) struct RefreshResponse {
    pub(crate) access: String,
    #[serde(default)]
    pub(crate) refresh: Option<String>,
}

impl From<RefreshResponse> for TokenRefresh {
    fn from(response: RefreshResponse) -> Self {
        Self {
            access: SecretString::from(response.access),
            refresh: response.refresh.map(SecretString::from),
        }
    }
}
