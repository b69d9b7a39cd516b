//! Session lifecycle management.
//!
//! Session records live in the key-value store under opaque random ids; the
//! id is the cache key, never an attribute of the record. The manager holds
//! no state of its own, so any number of instances across any number of
//! processes can serve the same session population - the store's
//! set-if-absent write is the only concurrency control anywhere.
//!
//! Rotation never invalidates the old id outright: the old key is reduced to
//! a short-lived stub pointing at the replacement, so requests already in
//! flight with the stale token are redirected instead of logged out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::auth::tokens::{SecureTokens, TokenSource};
use crate::cache::{KeyValue, keys};
use crate::db::UserRow;
use crate::errors::{Error, Result};
use crate::types::{SessionId, UserId, abbrev_token, abbrev_uuid};

/// Creation retries before giving up on finding an unused id. With 256-bit
/// tokens, exhausting these means the token source or the store is broken,
/// not bad luck.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Open extension point on a session record. The one key the system itself
/// understands, the rotation pointer, gets a typed field; anything else a
/// future revision stores rides along in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Set on a post-rotation stub: the id of the replacement session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_to: Option<SessionId>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An ephemeral session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: Option<UserId>,
    /// Human-readable principal label (display name or email).
    pub identity: Option<String>,
    #[serde(default, rename = "meta")]
    pub metadata: SessionMetadata,
    pub is_guest: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A synthesized guest record. Guests are never written to the store -
    /// persisting a record per anonymous visit (read: per crawler hit) would
    /// bloat the cache for no benefit.
    pub fn guest() -> Self {
        Self {
            user_id: None,
            identity: None,
            metadata: SessionMetadata::default(),
            is_guest: true,
            created_at: Utc::now(),
        }
    }

    /// The record created on successful login or registration.
    pub fn for_user(user: &UserRow) -> Self {
        Self {
            user_id: Some(user.id),
            identity: Some(user.email.clone()),
            metadata: SessionMetadata::default(),
            is_guest: false,
            created_at: Utc::now(),
        }
    }
}

/// Session lifecycle manager.
#[derive(Clone)]
pub struct Sessions {
    kv: Arc<dyn KeyValue>,
    tokens: Arc<dyn TokenSource>,
    side_effects: TaskTracker,
}

impl Sessions {
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self::with_token_source(kv, Arc::new(SecureTokens))
    }

    pub fn with_token_source(kv: Arc<dyn KeyValue>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            kv,
            tokens,
            side_effects: TaskTracker::new(),
        }
    }

    /// Store `record` under a fresh session id and return the id.
    ///
    /// The write is a set-if-absent: an id that is already taken (a token
    /// collision) triggers a retry with a fresh token, any other write
    /// failure aborts immediately. Exhausting all attempts is reported as
    /// [`Error::SessionIdExhausted`]. On success the id is also added to the
    /// owning user's session index; that update is an optimization, not a
    /// correctness requirement, so its failure does not fail the creation.
    pub async fn create(&self, record: &SessionRecord) -> Result<SessionId> {
        let payload = serde_json::to_string(record).map_err(|e| Error::Internal {
            operation: format!("serialize session record: {e}"),
        })?;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = self.tokens.session_token();
            let key = keys::session(&id);

            if !self.kv.set_if_absent(&key, &payload, keys::SESSION_TTL).await? {
                // Id already taken, try a fresh token
                continue;
            }

            if let Some(user_id) = record.user_id {
                let index_key = keys::user_index(&user_id.to_string());
                if let Err(e) = self.kv.set_add(&index_key, std::slice::from_ref(&id)).await {
                    debug!(user_id = %abbrev_uuid(&user_id), error = %e, "session index update failed");
                }
            }

            return Ok(id);
        }

        Err(Error::SessionIdExhausted)
    }

    /// Fetch a session record and slide its TTL forward.
    ///
    /// The slide is dispatched without the caller waiting on it, and a slide
    /// failure is nobody's problem but the next expiry. A store failure on
    /// the read itself degrades to "no session" - sessions fail open to
    /// guest, never to a 500. A record that no longer deserializes is
    /// reported as [`Error::Corrupt`]; consumers treat it as absent.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let Some((raw, record)) = self.fetch(session_id).await? else {
            return Ok(None);
        };

        // Slide the expiry, re-writing the exact value just read. set-if-present
        // so a concurrent delete is not resurrected.
        let key = keys::session(session_id);
        let kv = self.kv.clone();
        self.side_effects.spawn(async move {
            if let Err(e) = kv.set_if_present(&key, &raw, keys::SESSION_TTL).await {
                debug!(error = %e, "session TTL slide failed");
            }
        });

        Ok(Some(record))
    }

    /// Read and decode a record without touching its TTL.
    async fn fetch(&self, session_id: &str) -> Result<Option<(String, SessionRecord)>> {
        let key = keys::session(session_id);

        let raw = match self.kv.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!(session = %abbrev_token(session_id), error = %e, "session read failed");
                return Ok(None);
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some((raw, record))),
            Err(e) => {
                warn!(session = %abbrev_token(session_id), error = %e, "session record failed to decode");
                Err(Error::Corrupt { kind: "session record" })
            }
        }
    }

    /// Resolve a cookie value to the session it currently denotes, following
    /// a rotation stub one hop.
    pub async fn resolve(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let Some(record) = self.get(session_id).await? else {
            return Ok(None);
        };

        if let Some(next) = record.metadata.rotated_to.clone() {
            return self.get(&next).await;
        }

        Ok(Some(record))
    }

    /// Best-effort delete. The record is read first to recover the owning
    /// user for index cleanup, but deletion proceeds (and reports success)
    /// regardless - deleting something already gone is not an error.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let key = keys::session(session_id);

        let owner = match self.kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str::<SessionRecord>(&raw).ok().and_then(|r| r.user_id),
            _ => None,
        };

        if let Err(e) = self.kv.delete(&key).await {
            debug!(session = %abbrev_token(session_id), error = %e, "session delete failed");
        }

        if let Some(user_id) = owner {
            let index_key = keys::user_index(&user_id.to_string());
            if let Err(e) = self.kv.set_remove(&index_key, session_id).await {
                debug!(user_id = %abbrev_uuid(&user_id), error = %e, "session index cleanup failed");
            }
        }

        Ok(())
    }

    /// Rotate a session: write its data under a fresh id and reduce the old
    /// key to a 30-second redirect stub so in-flight requests holding the
    /// stale token land on the replacement.
    ///
    /// Rotating a session that does not exist (or no longer decodes) is a
    /// silent no-op - there is nothing to rotate to.
    pub async fn rotate(&self, session_id: &str) -> Result<Option<SessionId>> {
        // Plain read: the old key is about to be overwritten, sliding its
        // TTL here would race the stub write.
        let record = match self.fetch(session_id).await {
            Ok(Some((_, record))) => record,
            _ => return Ok(None),
        };

        let new_id = self.create(&record).await?;

        let stub = SessionRecord {
            user_id: None,
            identity: None,
            metadata: SessionMetadata {
                rotated_to: Some(new_id.clone()),
                extra: serde_json::Map::new(),
            },
            is_guest: false,
            created_at: Utc::now(),
        };

        // The canonical record is already the new one; losing the stub only
        // shortens the grace window.
        match serde_json::to_string(&stub) {
            Ok(payload) => {
                if let Err(e) = self
                    .kv
                    .set(&keys::session(session_id), &payload, keys::ROTATION_GRACE_TTL)
                    .await
                {
                    debug!(session = %abbrev_token(session_id), error = %e, "failed to leave rotation stub");
                }
            }
            Err(e) => debug!(error = %e, "failed to serialize rotation stub"),
        }

        Ok(Some(new_id))
    }

    /// Delete every session in a user's index ("log out all devices") and the
    /// index itself. Returns how many sessions were dropped.
    pub async fn destroy_all_for_user(&self, user_id: UserId) -> Result<usize> {
        let index_key = keys::user_index(&user_id.to_string());
        let members = self.kv.set_members(&index_key).await?;

        let mut dropped = 0;
        for id in &members {
            match self.kv.delete(&keys::session(id)).await {
                Ok(()) => dropped += 1,
                Err(e) => debug!(session = %abbrev_token(id), error = %e, "session delete failed"),
            }
        }

        if let Err(e) = self.kv.delete(&index_key).await {
            debug!(user_id = %abbrev_uuid(&user_id), error = %e, "session index delete failed");
        }

        Ok(dropped)
    }

    /// Wait for outstanding fire-and-forget work (TTL slides) to finish.
    /// Called at shutdown, and by tests that need deterministic ordering.
    pub async fn drain(&self) {
        self.side_effects.close();
        self.side_effects.wait().await;
        self.side_effects.reopen();
    }
}
