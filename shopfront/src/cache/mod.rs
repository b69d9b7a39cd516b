//! Key-value store access.
//!
//! All shared low-latency state (session records, tenant resolution entries,
//! permission sets) lives in an external Valkey/Redis instance. Nothing is
//! cached in-process: horizontally scaled instances observe the same cache
//! without coordination, and the only atomicity primitive anywhere is the
//! store's conditional set on a single key.
//!
//! The [`KeyValue`] trait is the collaborator seam. Production uses the
//! [`Valkey`](valkey::Valkey) client; tests use the in-process fake from
//! `test_utils`.

pub mod keys;
pub mod valkey;

pub use valkey::Valkey;

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::db;

/// Errors from the key-value store. Both variants are transient from the
/// caller's perspective: writes fail closed, cache reads fall through to the
/// authoritative store.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The operation did not complete within its deadline
    #[error("key-value store operation timed out")]
    Timeout,

    /// Connection or protocol failure
    #[error("key-value store unavailable")]
    Unavailable(#[source] anyhow::Error),
}

/// Type alias for key-value operation results
pub type Result<T> = std::result::Result<T, CacheError>;

/// The key-value collaborator: a remote string/set-oriented store with
/// per-key TTLs. Conditional sets (`set_if_absent`, `set_if_present`) are the
/// concurrency-control primitive for the whole service.
#[async_trait::async_trait]
pub trait KeyValue: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional write with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write only if the key does not exist. Returns whether the write
    /// happened; `Ok(false)` means the key was already present.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Write only if the key already exists (used to slide a TTL forward).
    /// Returns whether the write happened.
    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set; an absent key yields an empty list.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    /// Replace the whole set under `key` with `members` and arm the TTL, as a
    /// single multi-step write (delete, add, expire). A partial failure
    /// leaves the key fully old, fully new, or absent - never a merge. An
    /// empty `members` just deletes the key.
    async fn replace_set(&self, key: &str, members: &[String], ttl: Duration) -> Result<()>;
}

/// Cache-aside lookup with negative caching over a string-valued entry.
///
/// Checks `key` first: a cached `sentinel` is a verified negative and returns
/// `None` without touching the loader; any other cached value is a hit. On a
/// miss (or a cache read error, which is treated as a miss), the loader runs
/// against the authoritative store. A definitive `None` from the loader is
/// cached as the sentinel, a hit is cached as its value - both best-effort,
/// with `ttl`. A loader error is propagated and never cached: ambiguous
/// failures must not become negatives.
pub(crate) async fn lookup_with_negative<F>(
    kv: &dyn KeyValue,
    key: &str,
    ttl: Duration,
    sentinel: &str,
    load: F,
) -> std::result::Result<Option<String>, db::DbError>
where
    F: Future<Output = std::result::Result<Option<String>, db::DbError>> + Send,
{
    match kv.get(key).await {
        Ok(Some(cached)) if cached == sentinel => return Ok(None),
        Ok(Some(cached)) => return Ok(Some(cached)),
        Ok(None) => {}
        Err(e) => {
            debug!(key, error = %e, "cache read failed, falling through to store");
        }
    }

    let loaded = load.await?;

    let cache_value = loaded.as_deref().unwrap_or(sentinel);
    if let Err(e) = kv.set(key, cache_value, ttl).await {
        debug!(key, error = %e, "cache refill failed");
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryKv;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_miss_loads_and_caches_value() {
        let kv = MemoryKv::new();

        let result = lookup_with_negative(&kv, "k", TTL, "nil", async { Ok(Some("v".to_string())) })
            .await
            .unwrap();

        assert_eq!(result, Some("v".to_string()));
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(kv.ttl_of("k"), Some(TTL));
    }

    #[tokio::test]
    async fn test_miss_caches_negative_sentinel() {
        let kv = MemoryKv::new();

        let result = lookup_with_negative(&kv, "k", TTL, "nil", async { Ok(None) })
            .await
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(kv.get("k").await.unwrap(), Some("nil".to_string()));
    }

    #[tokio::test]
    async fn test_cached_sentinel_short_circuits_loader() {
        let kv = MemoryKv::new();
        kv.set("k", "nil", TTL).await.unwrap();

        // A loader that would blow up if polled.
        let result = lookup_with_negative(&kv, "k", TTL, "nil", async {
            panic!("loader must not run on a cached negative")
        })
        .await
        .unwrap();

        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_caches_nothing() {
        let kv = MemoryKv::new();

        let result = lookup_with_negative(&kv, "k", TTL, "nil", async {
            Err(db::DbError::Other(anyhow::anyhow!("connection refused")))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_read_error_falls_through_to_loader() {
        let kv = MemoryKv::failing();

        let result = lookup_with_negative(&kv, "k", TTL, "nil", async { Ok(Some("v".to_string())) })
            .await
            .unwrap();

        // Loader result is returned even though neither read nor refill worked.
        assert_eq!(result, Some("v".to_string()));
    }
}
