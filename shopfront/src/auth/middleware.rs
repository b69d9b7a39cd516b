//! Request context middleware: tenant, session, and permission hydration.
//!
//! Every request passes through three layers in order:
//!
//! 1. [`tenant_context`] tags the request with the tenant resolved from the
//!    host's subdomain slug (apex and unknown hosts carry no tenant).
//! 2. [`session_context`] resolves the session cookie, following a rotation
//!    redirect one hop; anything that fails to resolve becomes a synthesized
//!    in-memory guest record, never an error.
//! 3. [`permission_context`] resolves the principal's permission set for the
//!    tenant. Resolution failure degrades to an empty set - a flaky cache
//!    must not turn every request into a 500, and an empty set denies
//!    everything anyway.

use std::collections::HashSet;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::AppState;
use crate::auth::SESSION_COOKIE;
use crate::auth::session::SessionRecord;
use crate::errors::{Error, Result};
use crate::types::{SessionId, TenantId, abbrev_uuid};

/// The tenant the request was addressed to, if any.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Option<TenantId>,
}

/// The resolved session. `id` is the cookie token when a stored session
/// backs this request; guests have no id because guest records are never
/// persisted.
#[derive(Debug, Clone)]
pub struct RequestSession {
    pub id: Option<SessionId>,
    pub record: SessionRecord,
}

/// The permission strings the principal holds within the request's tenant.
#[derive(Debug, Clone, Default)]
pub struct GrantedPermissions(pub HashSet<String>);

impl GrantedPermissions {
    pub fn require(&self, permission: &str) -> Result<()> {
        if self.0.contains(permission) {
            Ok(())
        } else {
            Err(Error::InsufficientPermissions {
                permission: permission.to_string(),
            })
        }
    }
}

/// Pull the session cookie's value out of the request headers.
fn session_cookie_value(request: &Request) -> Option<String> {
    let cookie_str = request.headers().get(header::COOKIE)?.to_str().ok()?;

    for cookie in cookie_str.split(';') {
        if let Some((name, value)) = cookie.trim().split_once('=') {
            if name == SESSION_COOKIE {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// The subdomain slug for `host` under the configured root domain. Only a
/// single-label subdomain counts; deeper or unrelated hosts carry no tenant.
fn tenant_slug_from_host(host: &str, root_domain: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    let slug = host.strip_suffix(root_domain)?.strip_suffix('.')?;

    if slug.is_empty() || slug.contains('.') {
        return None;
    }
    Some(slug.to_string())
}

pub async fn tenant_context(State(state): State<AppState>, mut request: Request, next: Next) -> std::result::Result<Response, Error> {
    let slug = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|host| tenant_slug_from_host(host, &state.config.root_domain));

    let tenant_id = match slug {
        Some(slug) => state.tenants.resolve_slug(&slug).await?,
        None => None,
    };

    request.extensions_mut().insert(TenantContext { tenant_id });
    Ok(next.run(request).await)
}

pub async fn session_context(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let context = match session_cookie_value(&request) {
        Some(token) => match state.sessions.resolve(&token).await {
            Ok(Some(record)) => RequestSession {
                id: Some(token),
                record,
            },
            // Absent, expired, or corrupt: the visitor is a guest. The guest
            // record lives only in this request.
            _ => RequestSession {
                id: None,
                record: SessionRecord::guest(),
            },
        },
        None => RequestSession {
            id: None,
            record: SessionRecord::guest(),
        },
    };

    request.extensions_mut().insert(context);
    next.run(request).await
}

pub async fn permission_context(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let principal = request
        .extensions()
        .get::<RequestSession>()
        .and_then(|session| session.record.user_id);
    let tenant = request
        .extensions()
        .get::<TenantContext>()
        .and_then(|context| context.tenant_id);

    let grants = match (principal, tenant) {
        (Some(user_id), Some(tenant_id)) => match state.permissions.for_user(user_id, tenant_id).await {
            Ok(granted) => GrantedPermissions(granted),
            Err(e) => {
                warn!(
                    user_id = %abbrev_uuid(&user_id),
                    tenant_id = %abbrev_uuid(&tenant_id),
                    error = %e,
                    "permission resolution failed, continuing with none"
                );
                GrantedPermissions::default()
            }
        },
        _ => GrantedPermissions::default(),
    };

    request.extensions_mut().insert(grants);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_slug_from_host() {
        let root = "shopfront.app";

        assert_eq!(tenant_slug_from_host("acme.shopfront.app", root), Some("acme".to_string()));
        assert_eq!(tenant_slug_from_host("ACME.shopfront.app:8443", root), Some("acme".to_string()));
        assert_eq!(tenant_slug_from_host("shopfront.app", root), None);
        assert_eq!(tenant_slug_from_host("a.b.shopfront.app", root), None);
        assert_eq!(tenant_slug_from_host("evil-shopfront.app", root), None);
        assert_eq!(tenant_slug_from_host("example.com", root), None);
    }

    #[test]
    fn test_require_permission() {
        let grants = GrantedPermissions(HashSet::from(["orders:read".to_string()]));

        assert!(grants.require("orders:read").is_ok());
        assert!(matches!(
            grants.require("orders:write").unwrap_err(),
            Error::InsufficientPermissions { .. }
        ));
    }
}
