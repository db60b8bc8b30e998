use serde::{Deserialize, Serialize};

use crate::auth::repo_types::User;

/// Request body for signup. Fields are optional so absence is a 400, not a parse failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Signup fields after the presence check.
#[derive(Debug)]
pub struct SignupFields {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl SignupRequest {
    /// `None` unless all four fields are present and non-empty.
    pub fn into_fields(self) -> Option<SignupFields> {
        Some(SignupFields {
            first_name: present(self.first_name)?,
            last_name: present(self.last_name)?,
            email: present(self.email)?,
            password: present(self.password)?,
        })
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl LoginRequest {
    /// `(email, password)` when both are present and non-empty.
    pub fn into_credentials(self) -> Option<(String, String)> {
        Some((present(self.email)?, present(self.password)?))
    }
}

fn present(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
        }
    }
}
