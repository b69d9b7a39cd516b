//! Relational store access.
//!
//! The authoritative store is PostgreSQL, but everything above this module
//! depends only on the [`Directory`] trait: the five queries the rest of the
//! system needs. The trait object is constructed once at startup and injected
//! into the services that use it, which is what lets tests substitute an
//! in-process fake with call counters.
//!
//! # Usage
//!
//! ```ignore
//! use shopfront::db::{Directory, PgDirectory};
//!
//! let directory: std::sync::Arc<dyn Directory> = std::sync::Arc::new(PgDirectory::new(pool));
//! let tenant = directory.tenant_by_slug("acme").await?;
//! ```

pub mod errors;
pub mod models;
pub mod postgres;

pub use errors::{DbError, Result};
pub use models::{NewUser, TenantRow, UserRow};
pub use postgres::PgDirectory;

use crate::types::{TenantId, UserId};

/// The authoritative relational store, reduced to the queries this service
/// performs. All methods return `Ok(None)` (or an empty list) for definitive
/// absence; errors mean the query itself failed.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Look up a user account by email address.
    async fn user_by_email(&self, email: &str) -> Result<Option<UserRow>>;

    /// Insert a new user account. Duplicate emails surface as
    /// [`DbError::UniqueViolation`].
    async fn create_user(&self, user: &NewUser) -> Result<UserRow>;

    /// Look up a tenant by its human-readable slug.
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<TenantRow>>;

    /// Look up a tenant by primary key.
    async fn tenant_by_id(&self, id: TenantId) -> Result<Option<TenantRow>>;

    /// All permission strings granted to a user within a tenant. An empty
    /// list is a definitive "no grants", not an error.
    async fn permissions_for(&self, user_id: UserId, tenant_id: TenantId) -> Result<Vec<String>>;
}
