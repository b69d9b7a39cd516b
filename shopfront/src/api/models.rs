//! Request and response payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::UserRow;
use crate::types::{TenantId, UserId};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Public view of a user account. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl From<UserRow> for UserSummary {
    fn from(user: UserRow) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserSummary,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// The caller's view of their own request context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: Option<UserId>,
    pub identity: Option<String>,
    pub is_guest: bool,
    pub created_at: DateTime<Utc>,
    pub tenant_id: Option<TenantId>,
    pub permissions: Vec<String>,
}
