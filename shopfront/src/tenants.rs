//! Tenant identity resolution with negative caching.
//!
//! Slugs come off the wire on every request, so both directions (slug -> UUID
//! and UUID -> existence) are cache-aside over the key-value store with a
//! five-minute TTL. Verified negatives are cached too: repeated lookups of a
//! nonexistent slug - typos, expired links, probing - must not each cost a
//! database round trip. Tenant ids are immutable once minted, which is what
//! makes the negative safe to cache for the TTL window; a tenant created
//! after a negative was cached becomes visible when the entry expires.

use std::sync::Arc;

use uuid::Uuid;

use crate::cache::{self, KeyValue, keys};
use crate::db::Directory;
use crate::errors::{Error, Result};
use crate::types::TenantId;

/// Tenant resolution cache.
#[derive(Clone)]
pub struct Tenants {
    kv: Arc<dyn KeyValue>,
    directory: Arc<dyn Directory>,
}

impl Tenants {
    pub fn new(kv: Arc<dyn KeyValue>, directory: Arc<dyn Directory>) -> Self {
        Self { kv, directory }
    }

    /// Resolve a slug to its tenant UUID, or `None` if the slug maps to no
    /// tenant (a result that may itself come from the cache's negative
    /// sentinel without touching the database).
    pub async fn resolve_slug(&self, slug: &str) -> Result<Option<TenantId>> {
        let key = keys::tenant_slug(slug);

        let resolved = cache::lookup_with_negative(
            self.kv.as_ref(),
            &key,
            keys::RESOLUTION_TTL,
            keys::NEGATIVE_SENTINEL,
            async {
                self.directory
                    .tenant_by_slug(slug)
                    .await
                    .map(|tenant| tenant.map(|t| t.id.to_string()))
            },
        )
        .await?;

        match resolved {
            Some(raw) => {
                let id = Uuid::parse_str(&raw).map_err(|_| Error::Corrupt {
                    kind: "tenant resolution entry",
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Whether the given id denotes an existing tenant. Existence and
    /// non-existence are both cached; an ambiguous query failure is
    /// propagated and cached as neither.
    pub async fn exists(&self, tenant_id: TenantId) -> Result<bool> {
        let id = tenant_id.to_string();
        let key = keys::tenant_uuid(&id);

        let found = cache::lookup_with_negative(self.kv.as_ref(), &key, keys::RESOLUTION_TTL, "false", async {
            self.directory
                .tenant_by_id(tenant_id)
                .await
                .map(|tenant| tenant.map(|_| "true".to_string()))
        })
        .await?;

        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::RESOLUTION_TTL;
    use crate::test_utils::{FakeDirectory, MemoryKv};

    fn resolver(kv: Arc<MemoryKv>, directory: Arc<FakeDirectory>) -> Tenants {
        Tenants::new(kv, directory)
    }

    #[tokio::test]
    async fn test_unknown_slug_caches_negative_sentinel() {
        let kv = Arc::new(MemoryKv::new());
        let directory = Arc::new(FakeDirectory::new());
        let tenants = resolver(kv.clone(), directory.clone());

        assert_eq!(tenants.resolve_slug("acme").await.unwrap(), None);

        let key = keys::tenant_slug("acme");
        assert_eq!(kv.get(&key).await.unwrap(), Some(keys::NEGATIVE_SENTINEL.to_string()));
        assert_eq!(kv.ttl_of(&key), Some(RESOLUTION_TTL));

        // Second lookup inside the TTL window never reaches the store
        assert_eq!(tenants.resolve_slug("acme").await.unwrap(), None);
        assert_eq!(directory.tenant_by_slug_calls(), 1);
    }

    #[tokio::test]
    async fn test_known_slug_caches_uuid_and_skips_store_on_repeat() {
        let kv = Arc::new(MemoryKv::new());
        let directory = Arc::new(FakeDirectory::new());
        let tenant = directory.add_tenant("acme", "Acme Fresh Goods");
        let tenants = resolver(kv.clone(), directory.clone());

        assert_eq!(tenants.resolve_slug("acme").await.unwrap(), Some(tenant.id));
        assert_eq!(
            kv.get(&keys::tenant_slug("acme")).await.unwrap(),
            Some(tenant.id.to_string())
        );

        assert_eq!(tenants.resolve_slug("acme").await.unwrap(), Some(tenant.id));
        assert_eq!(directory.tenant_by_slug_calls(), 1);
    }

    #[tokio::test]
    async fn test_query_error_propagates_and_caches_nothing() {
        let kv = Arc::new(MemoryKv::new());
        let directory = Arc::new(FakeDirectory::new());
        directory.fail_queries(true);
        let tenants = resolver(kv.clone(), directory.clone());

        assert!(tenants.resolve_slug("acme").await.is_err());
        // An ambiguous failure must not become a verified negative
        assert_eq!(kv.get(&keys::tenant_slug("acme")).await.unwrap(), None);

        // Once the store recovers, the next lookup goes through
        directory.fail_queries(false);
        let tenant = directory.add_tenant("acme", "Acme Fresh Goods");
        assert_eq!(tenants.resolve_slug("acme").await.unwrap(), Some(tenant.id));
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_an_error() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(&keys::tenant_slug("acme"), "not-a-uuid", RESOLUTION_TTL).await.unwrap();
        let tenants = resolver(kv, Arc::new(FakeDirectory::new()));

        assert!(matches!(
            tenants.resolve_slug("acme").await.unwrap_err(),
            Error::Corrupt { .. }
        ));
    }

    #[tokio::test]
    async fn test_exists_caches_both_outcomes() {
        let kv = Arc::new(MemoryKv::new());
        let directory = Arc::new(FakeDirectory::new());
        let tenant = directory.add_tenant("acme", "Acme Fresh Goods");
        let missing = Uuid::new_v4();
        let tenants = resolver(kv.clone(), directory.clone());

        assert!(tenants.exists(tenant.id).await.unwrap());
        assert!(!tenants.exists(missing).await.unwrap());

        assert_eq!(
            kv.get(&keys::tenant_uuid(&tenant.id.to_string())).await.unwrap(),
            Some("true".to_string())
        );
        let negative_key = keys::tenant_uuid(&missing.to_string());
        assert_eq!(kv.get(&negative_key).await.unwrap(), Some("false".to_string()));
        assert_eq!(kv.ttl_of(&negative_key), Some(RESOLUTION_TTL));

        // Repeats are served from the cache
        assert!(tenants.exists(tenant.id).await.unwrap());
        assert!(!tenants.exists(missing).await.unwrap());
        assert_eq!(directory.tenant_by_id_calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_outage_falls_through_to_store() {
        let kv = Arc::new(MemoryKv::failing());
        let directory = Arc::new(FakeDirectory::new());
        let tenant = directory.add_tenant("acme", "Acme Fresh Goods");
        let tenants = resolver(kv, directory);

        // Reads fail open to the authoritative store
        assert_eq!(tenants.resolve_slug("acme").await.unwrap(), Some(tenant.id));
        assert!(tenants.exists(tenant.id).await.unwrap());
    }
}
