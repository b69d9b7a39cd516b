//! Authentication and session system.
//!
//! Sessions are opaque server-side records in the key-value store, looked up
//! by a random token carried in an HTTP-only cookie. Nothing about the
//! principal is encoded client-side, so logout and rotation take effect
//! immediately across every instance.
//!
//! # Modules
//!
//! - [`accounts`]: registration and credential verification
//! - [`middleware`]: tenant/session/permission request hydration
//! - [`password`]: Argon2id hashing with the explicit encoded-hash contract
//! - [`session`]: session record lifecycle (create, read, rotate, delete)
//! - [`tokens`]: session token generation
//!
//! # Cookie contract
//!
//! The cookie name is a fixed constant. Its 60-minute expiry deliberately
//! outlives the 30-minute record TTL: the record's TTL slides forward on
//! every read, so an active user's cookie stays valid while an idle user's
//! record quietly expires out of the store first.

pub mod accounts;
pub mod middleware;
pub mod password;
pub mod session;
pub mod tokens;

use std::time::Duration;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "shopfront_session";

/// Session cookie Max-Age.
pub const SESSION_COOKIE_TTL: Duration = Duration::from_secs(60 * 60);
