//! Key schema and lifetimes for everything this service stores in Valkey.
//!
//! Keys are `:`-namespaced strings. These are purpose-built for the three use
//! cases below (sessions, tenant resolution, permission sets) and are not a
//! general cache vocabulary; the TTLs are part of the contract and therefore
//! constants, not configuration.

use std::time::Duration;

/// Session records live 30 minutes, slid forward on every read.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Grace window during which a rotated-away session id still redirects to
/// its replacement.
pub const ROTATION_GRACE_TTL: Duration = Duration::from_secs(30);

/// Tenant slug/UUID resolution entries, positive and negative alike.
pub const RESOLUTION_TTL: Duration = Duration::from_secs(5 * 60);

/// Permission set snapshots.
pub const PERMISSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Cached value marking a verified negative: the slug was looked up in the
/// authoritative store and definitively does not exist.
pub const NEGATIVE_SENTINEL: &str = "nil";

/// Maps a session id -> serialized session record.
///
/// `sess:<session_id>`
pub fn session(session_id: &str) -> String {
    format!("sess:{session_id}")
}

/// Maps a user id -> set of that user's currently-valid session ids. No TTL;
/// membership is maintained manually on create/delete and only ever used for
/// enumeration, never authorization.
///
/// `uidx:<user_id>`
pub fn user_index(user_id: &str) -> String {
    format!("uidx:{user_id}")
}

/// Maps a tenant slug -> tenant UUID string, or [`NEGATIVE_SENTINEL`].
///
/// `tenants:slug:<slug>`
pub fn tenant_slug(slug: &str) -> String {
    format!("tenants:slug:{slug}")
}

/// Maps a tenant UUID -> `"true"`/`"false"` existence marker.
///
/// `tenants:uuid:<uuid>`
pub fn tenant_uuid(uuid: &str) -> String {
    format!("tenants:uuid:{uuid}")
}

/// Maps a (tenant, user) pair -> set of permission strings.
///
/// `perms:<tenant_id>:<user_id>`
pub fn permissions(tenant_id: &str, user_id: &str) -> String {
    format!("perms:{tenant_id}:{user_id}")
}
