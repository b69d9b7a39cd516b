//! Test utilities: in-process store fakes and state builders.
//!
//! [`MemoryKv`] and [`FakeDirectory`] stand in for the Valkey and PostgreSQL
//! collaborators. Both record what was asked of them - the fake KV keeps an
//! operation log (so tests can assert "exactly one TTL-slide write
//! happened"), the fake directory counts queries (so tests can assert "the
//! second lookup never reached the store").

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use uuid::Uuid;

use crate::auth::session::SessionRecord;
use crate::auth::tokens::{SecureTokens, TokenSource};
use crate::cache::{CacheError, KeyValue, Result as CacheResult};
use crate::config::Config;
use crate::db::{DbError, Directory, NewUser, Result as DbResult, TenantRow, UserRow};
use crate::types::{TenantId, UserId};
use crate::{AppState, build_router};

/// One key-value operation kind, for log assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Set,
    SetIfAbsent,
    SetIfPresent,
    Delete,
    SetAdd,
    SetRemove,
    SetMembers,
    SetContains,
    ReplaceSet,
}

/// A logged key-value operation. `value` is recorded for writes only.
#[derive(Debug, Clone)]
pub struct OpRecord {
    pub op: Op,
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
enum Kind {
    Value(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Stored {
    kind: Kind,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Stored {
    fn value(value: &str, ttl: Duration) -> Self {
        Self {
            kind: Kind::Value(value.to_string()),
            ttl: Some(ttl),
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn set(members: &[String], ttl: Option<Duration>) -> Self {
        Self {
            kind: Kind::Set(members.iter().cloned().collect()),
            ttl,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }
}

/// In-process [`KeyValue`] fake with real TTL bookkeeping and an operation
/// log. `failing()` builds a variant where every operation errors (after
/// being logged), to exercise store-outage paths.
pub struct MemoryKv {
    entries: DashMap<String, Stored>,
    log: Mutex<Vec<OpRecord>>,
    fail: bool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            log: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }

    /// The TTL a key was last written with (not the remaining time).
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.get(key).and_then(|e| e.ttl)
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Force a key to lapse, as if its TTL had run out.
    pub fn expire_now(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn log_contains(&self, op: Op) -> bool {
        self.log.lock().unwrap().iter().any(|r| r.op == op)
    }

    pub fn log_entries(&self, op: Op) -> Vec<OpRecord> {
        self.log.lock().unwrap().iter().filter(|r| r.op == op).cloned().collect()
    }

    fn record(&self, op: Op, key: &str, value: Option<&str>) {
        self.log.lock().unwrap().push(OpRecord {
            op,
            key: key.to_string(),
            value: value.map(|v| v.to_string()),
        });
    }

    fn fail_check(&self) -> CacheResult<()> {
        if self.fail {
            Err(CacheError::Unavailable(anyhow::anyhow!("injected store failure")))
        } else {
            Ok(())
        }
    }

    fn purge_expired(&self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.expires_at.is_some_and(|at| Instant::now() >= at))
            .unwrap_or(false);
        if expired {
            self.entries.remove(key);
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type() -> CacheError {
    CacheError::Unavailable(anyhow::anyhow!("WRONGTYPE operation against a key holding the wrong kind of value"))
}

#[async_trait::async_trait]
impl KeyValue for MemoryKv {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.record(Op::Get, key, None);
        self.fail_check()?;
        self.purge_expired(key);

        match self.entries.get(key).map(|e| e.kind.clone()) {
            None => Ok(None),
            Some(Kind::Value(value)) => Ok(Some(value)),
            Some(Kind::Set(_)) => Err(wrong_type()),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.record(Op::Set, key, Some(value));
        self.fail_check()?;
        self.entries.insert(key.to_string(), Stored::value(value, ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.record(Op::SetIfAbsent, key, Some(value));
        self.fail_check()?;
        self.purge_expired(key);

        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(slot) => {
                slot.insert(Stored::value(value, ttl));
                Ok(true)
            }
        }
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.record(Op::SetIfPresent, key, Some(value));
        self.fail_check()?;
        self.purge_expired(key);

        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut slot) => {
                slot.insert(Stored::value(value, ttl));
                Ok(true)
            }
            MapEntry::Vacant(_) => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.record(Op::Delete, key, None);
        self.fail_check()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, members: &[String]) -> CacheResult<()> {
        self.record(Op::SetAdd, key, None);
        self.fail_check()?;

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Stored::set(&[], None));
        match &mut entry.kind {
            Kind::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            Kind::Value(_) => Err(wrong_type()),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<()> {
        self.record(Op::SetRemove, key, Some(member));
        self.fail_check()?;

        if let Some(mut entry) = self.entries.get_mut(key) {
            match &mut entry.kind {
                Kind::Set(set) => {
                    set.remove(member);
                }
                Kind::Value(_) => return Err(wrong_type()),
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.record(Op::SetMembers, key, None);
        self.fail_check()?;
        self.purge_expired(key);

        match self.entries.get(key).map(|e| e.kind.clone()) {
            None => Ok(Vec::new()),
            Some(Kind::Set(set)) => Ok(set.into_iter().collect()),
            Some(Kind::Value(_)) => Err(wrong_type()),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.record(Op::SetContains, key, Some(member));
        self.fail_check()?;
        self.purge_expired(key);

        match self.entries.get(key).map(|e| e.kind.clone()) {
            None => Ok(false),
            Some(Kind::Set(set)) => Ok(set.contains(member)),
            Some(Kind::Value(_)) => Err(wrong_type()),
        }
    }

    async fn replace_set(&self, key: &str, members: &[String], ttl: Duration) -> CacheResult<()> {
        self.record(Op::ReplaceSet, key, Some(&members.join(",")));
        self.fail_check()?;

        if members.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries.insert(key.to_string(), Stored::set(members, Some(ttl)));
        }
        Ok(())
    }
}

/// A [`TokenSource`] that plays back a scripted sequence of tokens, falling
/// back to random ones when the script runs out. Counts how many tokens it
/// was asked for.
pub struct SeqTokens {
    scripted: Mutex<VecDeque<String>>,
    issued: AtomicUsize,
}

impl SeqTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripted: Mutex::new(tokens.into_iter().map(Into::into).collect()),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

impl TokenSource for SeqTokens {
    fn session_token(&self) -> String {
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| SecureTokens.session_token())
    }
}

/// In-process [`Directory`] fake with query counters and an injectable
/// failure mode.
pub struct FakeDirectory {
    users: Mutex<Vec<UserRow>>,
    tenants: Mutex<Vec<TenantRow>>,
    grants: Mutex<HashMap<(TenantId, UserId), Vec<String>>>,
    fail: AtomicBool,
    user_by_email_queries: AtomicUsize,
    tenant_by_slug_queries: AtomicUsize,
    tenant_by_id_queries: AtomicUsize,
    permissions_queries: AtomicUsize,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(Vec::new()),
            tenants: Mutex::new(Vec::new()),
            grants: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            user_by_email_queries: AtomicUsize::new(0),
            tenant_by_slug_queries: AtomicUsize::new(0),
            tenant_by_id_queries: AtomicUsize::new(0),
            permissions_queries: AtomicUsize::new(0),
        }
    }

    /// Make every query fail (or recover) from here on.
    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn add_user(&self, email: &str, password_hash: Option<&str>) -> UserRow {
        let user = UserRow {
            id: Uuid::new_v4(),
            name: "Test User".to_string(),
            email: email.to_string(),
            password_hash: password_hash.map(|h| h.to_string()),
            created_at: Utc::now(),
        };
        self.users.lock().unwrap().push(user.clone());
        user
    }

    pub fn add_tenant(&self, slug: &str, name: &str) -> TenantRow {
        let tenant = TenantRow {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.tenants.lock().unwrap().push(tenant.clone());
        tenant
    }

    pub fn grant(&self, tenant_id: TenantId, user_id: UserId, permissions: &[&str]) {
        self.grants
            .lock()
            .unwrap()
            .insert((tenant_id, user_id), permissions.iter().map(|p| p.to_string()).collect());
    }

    pub fn tenant_by_slug_calls(&self) -> usize {
        self.tenant_by_slug_queries.load(Ordering::SeqCst)
    }

    pub fn tenant_by_id_calls(&self) -> usize {
        self.tenant_by_id_queries.load(Ordering::SeqCst)
    }

    pub fn permissions_calls(&self) -> usize {
        self.permissions_queries.load(Ordering::SeqCst)
    }

    fn fail_check(&self) -> DbResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(DbError::Other(anyhow::anyhow!("injected database failure")))
        } else {
            Ok(())
        }
    }
}

impl Default for FakeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Directory for FakeDirectory {
    async fn user_by_email(&self, email: &str) -> DbResult<Option<UserRow>> {
        self.user_by_email_queries.fetch_add(1, Ordering::SeqCst);
        self.fail_check()?;
        Ok(self.users.lock().unwrap().iter().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: &NewUser) -> DbResult<UserRow> {
        self.fail_check()?;

        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == user.email) {
            return Err(DbError::UniqueViolation {
                constraint: Some("users_email_unique".to_string()),
                table: Some("users".to_string()),
                message: "duplicate key value violates unique constraint".to_string(),
            });
        }

        let created = UserRow {
            id: Uuid::new_v4(),
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            created_at: Utc::now(),
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn tenant_by_slug(&self, slug: &str) -> DbResult<Option<TenantRow>> {
        self.tenant_by_slug_queries.fetch_add(1, Ordering::SeqCst);
        self.fail_check()?;
        Ok(self.tenants.lock().unwrap().iter().find(|t| t.slug == slug).cloned())
    }

    async fn tenant_by_id(&self, id: TenantId) -> DbResult<Option<TenantRow>> {
        self.tenant_by_id_queries.fetch_add(1, Ordering::SeqCst);
        self.fail_check()?;
        Ok(self.tenants.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    async fn permissions_for(&self, user_id: UserId, tenant_id: TenantId) -> DbResult<Vec<String>> {
        self.permissions_queries.fetch_add(1, Ordering::SeqCst);
        self.fail_check()?;
        Ok(self
            .grants
            .lock()
            .unwrap()
            .get(&(tenant_id, user_id))
            .cloned()
            .unwrap_or_default())
    }
}

/// A signed-in user's session record with fresh random ids.
pub fn test_user_record() -> SessionRecord {
    SessionRecord {
        user_id: Some(Uuid::new_v4()),
        identity: Some("avery@example.com".to_string()),
        metadata: Default::default(),
        is_guest: false,
        created_at: Utc::now(),
    }
}

pub fn create_test_config() -> Config {
    Config {
        root_domain: "shopfront.test".to_string(),
        ..Default::default()
    }
}

/// Full application state over in-process fakes.
pub fn create_test_state(directory: std::sync::Arc<FakeDirectory>, kv: std::sync::Arc<MemoryKv>) -> AppState {
    AppState::from_stores(create_test_config(), directory, kv)
}

/// A router over fake stores, ready for `axum_test::TestServer`.
pub fn create_test_router(directory: std::sync::Arc<FakeDirectory>, kv: std::sync::Arc<MemoryKv>) -> axum::Router {
    build_router(&create_test_state(directory, kv))
}
