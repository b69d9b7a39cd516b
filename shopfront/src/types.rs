//! Common type definitions.
//!
//! Entity identifiers are UUIDs wrapped in type aliases. Session identifiers
//! are opaque random strings (they are cache keys, not database rows) and get
//! their own alias to keep signatures readable.

use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type TenantId = Uuid;

/// Opaque session identifier: a 256-bit random token, base64url without
/// padding. Never stored inside the session record itself.
pub type SessionId = String;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Abbreviate a session token for logging. Full tokens are credentials and
/// must never reach the logs.
pub fn abbrev_token(token: &str) -> String {
    token.chars().take(8).collect()
}
