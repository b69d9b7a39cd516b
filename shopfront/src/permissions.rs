//! Per-(tenant, user) permission set resolution.
//!
//! Permission sets are cached as full snapshots in a key-value store set and
//! refilled with a single delete-add-expire write, so a reader observes the
//! old set, the new set, or nothing - never a merge. A verified-empty result
//! ("this user has no grants here") is a meaningful cache hit and must not
//! look like a miss; since SMEMBERS of an absent key and of an empty set are
//! indistinguishable, an empty snapshot is cached as a single reserved
//! marker member that readers strip back out.
//!
//! A failed database load is propagated and caches nothing: the next request
//! retries the store rather than trusting an ambiguous failure as "no
//! permissions".

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{KeyValue, keys};
use crate::db::Directory;
use crate::errors::Result;
use crate::types::{TenantId, UserId, abbrev_uuid};

/// Reserved set member marking a verified-empty permission set. Permission
/// strings are `resource:action` shaped, so the marker cannot collide.
const VERIFIED_EMPTY: &str = "__none__";

/// Permission resolution cache.
#[derive(Clone)]
pub struct Permissions {
    kv: Arc<dyn KeyValue>,
    directory: Arc<dyn Directory>,
}

impl Permissions {
    pub fn new(kv: Arc<dyn KeyValue>, directory: Arc<dyn Directory>) -> Self {
        Self { kv, directory }
    }

    /// The set of permission strings `user_id` holds within `tenant_id`.
    /// An empty set is a valid answer, served from cache like any other.
    pub async fn for_user(&self, user_id: UserId, tenant_id: TenantId) -> Result<HashSet<String>> {
        let key = keys::permissions(&tenant_id.to_string(), &user_id.to_string());

        match self.kv.set_members(&key).await {
            Ok(members) if !members.is_empty() => {
                return Ok(members.into_iter().filter(|m| m != VERIFIED_EMPTY).collect());
            }
            Ok(_) => {}
            Err(e) => {
                debug!(key, error = %e, "permission cache read failed, falling through to store");
            }
        }

        let granted = self.directory.permissions_for(user_id, tenant_id).await?;

        let snapshot: Vec<String> = if granted.is_empty() {
            vec![VERIFIED_EMPTY.to_string()]
        } else {
            granted.clone()
        };
        if let Err(e) = self.kv.replace_set(&key, &snapshot, keys::PERMISSION_TTL).await {
            // The caller already has the authoritative answer; a refill
            // failure only costs the next request a database query.
            warn!(
                user_id = %abbrev_uuid(&user_id),
                tenant_id = %abbrev_uuid(&tenant_id),
                error = %e,
                "permission cache refill failed"
            );
        }

        Ok(granted.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::PERMISSION_TTL;
    use crate::test_utils::{FakeDirectory, MemoryKv};
    use uuid::Uuid;

    fn ids() -> (UserId, TenantId) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_cold_cache_loads_and_fills_exact_snapshot() {
        let kv = Arc::new(MemoryKv::new());
        let directory = Arc::new(FakeDirectory::new());
        let (user, tenant) = ids();
        directory.grant(tenant, user, &["catalog:read", "catalog:write"]);
        let permissions = Permissions::new(kv.clone(), directory.clone());

        let granted = permissions.for_user(user, tenant).await.unwrap();
        assert_eq!(
            granted,
            HashSet::from(["catalog:read".to_string(), "catalog:write".to_string()])
        );

        // The cache holds exactly the two members, armed with the 1-hour TTL
        let key = keys::permissions(&tenant.to_string(), &user.to_string());
        let mut cached = kv.set_members(&key).await.unwrap();
        cached.sort();
        assert_eq!(cached, vec!["catalog:read".to_string(), "catalog:write".to_string()]);
        assert_eq!(kv.ttl_of(&key), Some(PERMISSION_TTL));

        // A second call is a pure cache hit
        let again = permissions.for_user(user, tenant).await.unwrap();
        assert_eq!(again, granted);
        assert_eq!(directory.permissions_calls(), 1);
    }

    #[tokio::test]
    async fn test_verified_empty_is_a_hit_not_a_miss() {
        let kv = Arc::new(MemoryKv::new());
        let directory = Arc::new(FakeDirectory::new());
        let (user, tenant) = ids();
        let permissions = Permissions::new(kv.clone(), directory.clone());

        assert!(permissions.for_user(user, tenant).await.unwrap().is_empty());

        // The empty result is represented in the cache and the second call
        // does not re-query the store
        assert!(permissions.for_user(user, tenant).await.unwrap().is_empty());
        assert_eq!(directory.permissions_calls(), 1);
    }

    #[tokio::test]
    async fn test_query_error_propagates_and_caches_nothing() {
        let kv = Arc::new(MemoryKv::new());
        let directory = Arc::new(FakeDirectory::new());
        directory.fail_queries(true);
        let (user, tenant) = ids();
        let permissions = Permissions::new(kv.clone(), directory.clone());

        assert!(permissions.for_user(user, tenant).await.is_err());

        let key = keys::permissions(&tenant.to_string(), &user.to_string());
        assert!(kv.set_members(&key).await.unwrap().is_empty());

        // The very next request retries the database
        directory.fail_queries(false);
        directory.grant(tenant, user, &["orders:read"]);
        let granted = permissions.for_user(user, tenant).await.unwrap();
        assert_eq!(granted, HashSet::from(["orders:read".to_string()]));
        assert_eq!(directory.permissions_calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_outage_still_answers_from_store() {
        let kv = Arc::new(MemoryKv::failing());
        let directory = Arc::new(FakeDirectory::new());
        let (user, tenant) = ids();
        directory.grant(tenant, user, &["orders:read"]);
        let permissions = Permissions::new(kv, directory);

        let granted = permissions.for_user(user, tenant).await.unwrap();
        assert_eq!(granted, HashSet::from(["orders:read".to_string()]));
    }

    #[tokio::test]
    async fn test_refill_replaces_rather_than_merges() {
        let kv = Arc::new(MemoryKv::new());
        let directory = Arc::new(FakeDirectory::new());
        let (user, tenant) = ids();
        let key = keys::permissions(&tenant.to_string(), &user.to_string());

        // Stale snapshot from an earlier grant set
        kv.replace_set(&key, &["legacy:permission".to_string()], PERMISSION_TTL)
            .await
            .unwrap();
        kv.expire_now(&key);

        directory.grant(tenant, user, &["orders:read"]);
        let permissions = Permissions::new(kv.clone(), directory);

        let granted = permissions.for_user(user, tenant).await.unwrap();
        assert_eq!(granted, HashSet::from(["orders:read".to_string()]));
        assert_eq!(kv.set_members(&key).await.unwrap(), vec!["orders:read".to_string()]);
    }
}
