//! PostgreSQL-backed [`Directory`] implementation.

use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{Directory, NewUser, Result, TenantRow, UserRow};
use crate::types::{TenantId, UserId, abbrev_uuid};

/// The production directory: a thin wrapper over a connection pool. Queries
/// are runtime-checked so the crate builds without a live database.
#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Directory for PgDirectory {
    #[instrument(skip(self, email), err)]
    async fn user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let user = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self, user), fields(email = %user.email), err)]
    async fn create_user(&self, user: &NewUser) -> Result<UserRow> {
        // Always generate a new ID for users
        let user_id = Uuid::new_v4();

        let created = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, name, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, email, password_hash, created_at
            "#,
        )
        .bind(user_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    #[instrument(skip(self), err)]
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<TenantRow>> {
        let tenant = sqlx::query_as::<_, TenantRow>(
            "SELECT id, slug, name, created_at FROM tenants WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&id)), err)]
    async fn tenant_by_id(&self, id: TenantId) -> Result<Option<TenantRow>> {
        let tenant = sqlx::query_as::<_, TenantRow>(
            "SELECT id, slug, name, created_at FROM tenants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    #[instrument(
        skip(self),
        fields(user_id = %abbrev_uuid(&user_id), tenant_id = %abbrev_uuid(&tenant_id)),
        err
    )]
    async fn permissions_for(&self, user_id: UserId, tenant_id: TenantId) -> Result<Vec<String>> {
        let permissions = sqlx::query_scalar::<_, String>(
            "SELECT permission FROM permission_grants WHERE user_id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(permissions)
    }
}
