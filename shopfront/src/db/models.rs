//! Row models for the relational store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{TenantId, UserId};

/// A user account row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRow {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Absent for accounts provisioned without a password (e.g. federated).
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A tenant row. Tenant identifiers are immutable once minted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantRow {
    pub id: TenantId,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Request payload for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
}
