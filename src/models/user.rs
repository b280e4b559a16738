//! Volunteer account and impact stats.

use serde::{Deserialize, Serialize};

/// A volunteer with their cumulative impact. The password hash is never part of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub missions_completed: i64,
    #[serde(default)]
    pub hours_volunteered: i64,
    #[serde(default)]
    pub trees_planted: i64,
}

/// Request body for creating an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body for signing in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Avatar generated from the user's name for new accounts.
pub fn default_avatar(name: &str) -> String {
    let seed: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("https://api.dicebear.com/7.x/avataaars/png?seed={}", seed)
}
