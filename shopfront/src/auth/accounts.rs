//! Account registration and credential verification.

use std::sync::Arc;

use tracing::instrument;

use crate::auth::password;
use crate::db::{Directory, NewUser, UserRow};
use crate::errors::{CredentialFailure, Error, Result};

/// Account service over the relational store. Password hashing runs on a
/// blocking thread; Argon2id at these parameters is far too slow for an
/// async worker.
#[derive(Clone)]
pub struct Accounts {
    directory: Arc<dyn Directory>,
}

impl Accounts {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Check an email/password pair against the stored account.
    ///
    /// Failures are classified ([`CredentialFailure`]) so callers can log and
    /// meter them distinctly; the HTTP boundary collapses them to a single
    /// message. A stored hash that no longer parses is a hard error - corrupt
    /// credential data must never silently authenticate.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<UserRow> {
        let user = self
            .directory
            .user_by_email(email)
            .await?
            .ok_or(Error::Credentials(CredentialFailure::UnknownUser))?;

        let Some(stored_hash) = user.password_hash.clone() else {
            return Err(Error::Credentials(CredentialFailure::MissingPassword));
        };

        let candidate = password.to_string();
        let matched = tokio::task::spawn_blocking(move || password::verify(&stored_hash, &candidate))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password verification task: {e}"),
            })?
            .map_err(|_| Error::Corrupt { kind: "credential hash" })?;

        if !matched {
            return Err(Error::Credentials(CredentialFailure::WrongPassword));
        }

        Ok(user)
    }

    /// Register a new account. The password is hashed here; duplicate emails
    /// surface as a conflict from the store's unique constraint.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<UserRow> {
        let candidate = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || password::hash(&candidate))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password hashing task: {e}"),
            })?
            .map_err(|e| Error::Internal {
                operation: format!("hash password: {e}"),
            })?;

        let user = self
            .directory
            .create_user(&NewUser {
                name: name.to_string(),
                email: email.to_string(),
                password_hash: Some(password_hash),
            })
            .await?;

        Ok(user)
    }
}
