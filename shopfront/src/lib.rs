//! # shopfront: multi-tenant storefront backend
//!
//! `shopfront` serves many tenant storefronts from one horizontally scaled
//! deployment. Its core is a cache-aside resolution and session-lifecycle
//! layer that keeps an authoritative PostgreSQL store and a shared
//! Valkey/Redis cache consistent under concurrent access.
//!
//! ## Overview
//!
//! Every inbound request is resolved through three layers before any handler
//! runs. The host's subdomain slug is resolved to a tenant UUID through a
//! negatively-cached lookup ([`tenants`]); the session cookie is resolved to
//! a session record, transparently following the redirect stub a recent
//! rotation may have left behind ([`auth::session`]); and the principal's
//! permission set for the tenant is resolved from a cached full-set snapshot
//! ([`permissions`]). Visitors without a valid session get an in-memory
//! guest record - anonymous traffic never writes to the cache.
//!
//! No instance holds authoritative state of its own. All shared state lives
//! in the two external stores, and the key-value store's conditional set on
//! a single key is the only concurrency-control primitive in the system,
//! which is what makes running any number of replicas safe without
//! coordination.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); persistence
//! is PostgreSQL via `sqlx` behind the [`db::Directory`] interface; shared
//! cache state is Valkey via `fred` behind the [`cache::KeyValue`]
//! interface. Both interfaces are constructed once at startup and injected,
//! so tests run the full stack against in-process fakes.
//!
//! ## Quick start
//!
//! ```no_run
//! use clap::Parser;
//! use shopfront::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = shopfront::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     shopfront::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod permissions;
pub mod telemetry;
pub mod tenants;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod test;

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use bon::Builder;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use crate::auth::accounts::Accounts;
use crate::auth::session::Sessions;
use crate::cache::{KeyValue, Valkey};
use crate::db::{Directory, PgDirectory};
use crate::permissions::Permissions;
use crate::tenants::Tenants;

pub use config::Config;
pub use types::{SessionId, TenantId, UserId};

/// Application state shared across all request handlers: the two injected
/// store clients and the services built over them. Everything here is cheap
/// to clone (Arcs all the way down).
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub directory: Arc<dyn Directory>,
    pub kv: Arc<dyn KeyValue>,
    pub accounts: Accounts,
    pub sessions: Sessions,
    pub tenants: Tenants,
    pub permissions: Permissions,
}

impl AppState {
    /// Wire up the service layer over a pair of store clients.
    pub fn from_stores(config: Config, directory: Arc<dyn Directory>, kv: Arc<dyn KeyValue>) -> Self {
        AppState::builder()
            .config(config)
            .accounts(Accounts::new(directory.clone()))
            .sessions(Sessions::new(kv.clone()))
            .tenants(Tenants::new(kv.clone(), directory.clone()))
            .permissions(Permissions::new(kv.clone(), directory.clone()))
            .directory(directory)
            .kv(kv)
            .build()
    }
}

/// Get the shopfront database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Build the application router: handlers, the tenant/session/permission
/// hydration chain, and tracing.
pub fn build_router(state: &AppState) -> Router {
    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/auth/register", post(api::handlers::auth::register))
        .route("/auth/login", post(api::handlers::auth::login))
        .route("/auth/logout", post(api::handlers::auth::logout))
        .route("/auth/logout-all", post(api::handlers::auth::logout_all))
        .route("/auth/refresh", post(api::handlers::auth::refresh))
        .route("/auth/session", get(api::handlers::auth::current_session))
        // Hydration order is tenant -> session -> permissions; layers run
        // outermost-first, so they are added innermost-first here.
        .layer(from_fn_with_state(state.clone(), auth::middleware::permission_context))
        .layer(from_fn_with_state(state.clone(), auth::middleware::session_context))
        .layer(from_fn_with_state(state.clone(), auth::middleware::tenant_context))
        .with_state(state.clone());

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Main application struct that owns all resources and lifecycle:
/// connect and migrate the stores, build the router, serve, and shut down
/// gracefully (draining in-flight TTL-slide work before closing the pools).
pub struct Application {
    router: Router,
    state: AppState,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(config.database.acquire_timeout)
            .connect(&config.database.url)
            .await?;
        migrator().run(&pool).await?;

        let kv = Valkey::connect(&config.cache.url, config.cache.command_timeout).await?;

        let directory: Arc<dyn Directory> = Arc::new(PgDirectory::new(pool.clone()));
        let kv: Arc<dyn KeyValue> = Arc::new(kv);

        let state = AppState::from_stores(config.clone(), directory, kv);
        let router = build_router(&state);

        Ok(Self {
            router,
            state,
            config,
            pool,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Storefront backend listening on http://{bind_addr}");

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Let outstanding fire-and-forget work (session TTL slides) finish
        self.state.sessions.drain().await;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
