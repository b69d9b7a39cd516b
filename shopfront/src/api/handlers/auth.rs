//! Authentication handlers: registration, login, logout, session refresh.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::AppendHeaders,
};
use axum::extract::Extension;

use crate::{
    AppState,
    api::models::{AuthResponse, LoginRequest, MessageResponse, RegisterRequest, SessionResponse, UserSummary},
    auth::{SESSION_COOKIE, SESSION_COOKIE_TTL, middleware::{GrantedPermissions, RequestSession, TenantContext}, session::SessionRecord},
    config::Config,
    errors::Error,
};

type SetCookie = AppendHeaders<[(header::HeaderName, String); 1]>;

/// Register a new user account and sign them in.
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, SetCookie, Json<AuthResponse>), Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    if request.password.len() < state.config.auth.password_min_length {
        return Err(Error::BadRequest {
            message: format!(
                "Password must be at least {} characters",
                state.config.auth.password_min_length
            ),
        });
    }

    let user = state.accounts.register(&request.name, &request.email, &request.password).await?;
    let session_id = state.sessions.create(&SessionRecord::for_user(&user)).await?;

    Ok((
        StatusCode::CREATED,
        set_session_cookie(&state.config, &session_id),
        Json(AuthResponse {
            user: UserSummary::from(user),
            message: "Registration successful".to_string(),
        }),
    ))
}

/// Login with email and password.
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<(SetCookie, Json<AuthResponse>), Error> {
    let user = state.accounts.verify_credentials(&request.email, &request.password).await?;
    let session_id = state.sessions.create(&SessionRecord::for_user(&user)).await?;

    Ok((
        set_session_cookie(&state.config, &session_id),
        Json(AuthResponse {
            user: UserSummary::from(user),
            message: "Login successful".to_string(),
        }),
    ))
}

/// Logout: drop the stored session (if any) and clear the cookie.
#[tracing::instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
) -> Result<(SetCookie, Json<MessageResponse>), Error> {
    if let Some(session_id) = &session.id {
        state.sessions.delete(session_id).await?;
    }

    Ok((
        clear_session_cookie(&state.config),
        Json(MessageResponse {
            message: "Logout successful".to_string(),
        }),
    ))
}

/// Logout everywhere: drop every session in the caller's device index.
#[tracing::instrument(skip_all)]
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
) -> Result<(SetCookie, Json<MessageResponse>), Error> {
    let user_id = session.record.user_id.ok_or(Error::Unauthenticated { message: None })?;

    let dropped = state.sessions.destroy_all_for_user(user_id).await?;

    Ok((
        clear_session_cookie(&state.config),
        Json(MessageResponse {
            message: format!("Logged out {dropped} active sessions"),
        }),
    ))
}

/// Rotate the caller's session to a fresh id, leaving the grace-period
/// redirect behind for requests still in flight with the old cookie.
#[tracing::instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
) -> Result<(SetCookie, Json<MessageResponse>), Error> {
    let session_id = session.id.as_deref().ok_or(Error::Unauthenticated { message: None })?;

    let new_id = state.sessions.rotate(session_id).await?.ok_or(Error::Unauthenticated {
        message: Some("Session expired".to_string()),
    })?;

    Ok((
        set_session_cookie(&state.config, &new_id),
        Json(MessageResponse {
            message: "Session refreshed".to_string(),
        }),
    ))
}

/// The caller's resolved request context: who they are, which tenant the
/// request addressed, and what they may do there.
#[tracing::instrument(skip_all)]
pub async fn current_session(
    Extension(session): Extension<RequestSession>,
    Extension(tenant): Extension<TenantContext>,
    Extension(grants): Extension<GrantedPermissions>,
) -> Json<SessionResponse> {
    let mut permissions: Vec<String> = grants.0.into_iter().collect();
    permissions.sort();

    Json(SessionResponse {
        user_id: session.record.user_id,
        identity: session.record.identity,
        is_guest: session.record.is_guest,
        created_at: session.record.created_at,
        tenant_id: tenant.tenant_id,
        permissions,
    })
}

/// Build the session cookie. Expiry deliberately outlives the record TTL;
/// domain and secure come from deployment configuration.
fn session_cookie(config: &Config, value: &str, max_age_secs: u64) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if let Some(domain) = &config.cookie.domain {
        cookie.push_str(&format!("; Domain={domain}"));
    }
    if config.cookie.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn set_session_cookie(config: &Config, session_id: &str) -> SetCookie {
    AppendHeaders([(header::SET_COOKIE, session_cookie(config, session_id, SESSION_COOKIE_TTL.as_secs()))])
}

fn clear_session_cookie(config: &Config) -> SetCookie {
    AppendHeaders([(header::SET_COOKIE, session_cookie(config, "", 0))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;

    #[test]
    fn test_session_cookie_attributes() {
        let mut config = create_test_config();
        config.cookie.domain = Some("shopfront.app".to_string());
        config.cookie.secure = true;

        let cookie = session_cookie(&config, "tok", 3600);

        assert!(cookie.starts_with("shopfront_session=tok; "));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("Domain=shopfront.app"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn test_clear_cookie_zeroes_max_age() {
        let config = create_test_config();
        let cookie = session_cookie(&config, "", 0);

        assert!(cookie.starts_with("shopfront_session=; "));
        assert!(cookie.contains("Max-Age=0"));
        assert!(!cookie.contains("Secure"));
    }
}
