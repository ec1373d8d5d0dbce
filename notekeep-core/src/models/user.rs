use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conventional prefix for stored profile picture references.
pub const PROFILE_PICTURE_DIR: &str = "profile_pictures/";

/// An account identity.
///
/// Authentication (passwords, sessions, login tracking) lives in an external
/// identity component; this record only carries the profile fields the note
/// store needs. `username` and `email` are each unique across all users.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Whether the email address has been confirmed.
    pub is_verified: bool,
    pub is_active: bool,
    /// Relative reference to an uploaded image, usually under
    /// [`PROFILE_PICTURE_DIR`].
    pub profile_picture: Option<String>,
    pub bio: String,
    pub date_joined: DateTime<Utc>,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// Input for registering a new user.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateUserInput {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub bio: String,
    pub profile_picture: Option<String>,
}

/// Input for profile updates. All fields are optional for partial updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UpdateUserInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub is_verified: Option<bool>,
    pub is_active: Option<bool>,
}

/// Lowercases the domain part of an email address, leaving the local part as
/// given. Addresses without `@` are returned trimmed and otherwise untouched
/// so the storage check can reject them.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email_lowercases_domain_only() {
        assert_eq!(normalize_email("Jane.Doe@Example.COM"), "Jane.Doe@example.com");
    }

    #[test]
    fn test_normalize_email_trims_and_keeps_invalid_input() {
        assert_eq!(normalize_email("  not-an-email "), "not-an-email");
    }
}
