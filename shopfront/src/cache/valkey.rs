//! Valkey-backed [`KeyValue`] implementation using the `fred` client.

use std::time::Duration;

use fred::prelude::{Builder, Client, ClientLike, Config as ValkeyConfig, KeysInterface, SetsInterface};
use fred::types::{Expiration, SetOptions, Value};
use tracing::info;

use crate::cache::{CacheError, KeyValue, Result};

/// Production key-value store client. Every command is bounded by the
/// configured deadline; a missed deadline surfaces as [`CacheError::Timeout`]
/// and is handled exactly like any other transient store failure.
#[derive(Clone)]
pub struct Valkey {
    client: Client,
    command_timeout: Duration,
}

impl Valkey {
    /// Connect and wait for the first successful handshake.
    pub async fn connect(url: &str, command_timeout: Duration) -> anyhow::Result<Self> {
        let config = ValkeyConfig::from_url(url)?;
        let client = Builder::from_config(config).build()?;
        client.init().await?;

        info!("Connected to key-value store");
        Ok(Self { client, command_timeout })
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, fred::error::Error>>,
    {
        match tokio::time::timeout(self.command_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Unavailable(e.into())),
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

fn expire_seconds(ttl: Duration) -> i64 {
    // Zero-second expiries are rejected by the server; clamp up.
    (ttl.as_secs() as i64).max(1)
}

#[async_trait::async_trait]
impl KeyValue for Valkey {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(self.client.get::<Option<String>, _>(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.run(self.client.set::<(), _, _>(
            key,
            value.to_owned(),
            Some(Expiration::EX(expire_seconds(ttl))),
            None,
            false,
        ))
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        // SET NX replies OK when the write happened, nil when the key existed.
        let reply = self
            .run(self.client.set::<Option<String>, _, _>(
                key,
                value.to_owned(),
                Some(Expiration::EX(expire_seconds(ttl))),
                Some(SetOptions::NX),
                false,
            ))
            .await?;

        Ok(reply.is_some())
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let reply = self
            .run(self.client.set::<Option<String>, _, _>(
                key,
                value.to_owned(),
                Some(Expiration::EX(expire_seconds(ttl))),
                Some(SetOptions::XX),
                false,
            ))
            .await?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.run(self.client.del::<u64, _>(key)).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.run(self.client.sadd::<u64, _, _>(key, members.to_vec())).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        self.run(self.client.srem::<u64, _, _>(key, member.to_owned())).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.run(self.client.smembers::<Vec<String>, _>(key)).await
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        self.run(self.client.sismember::<bool, _, _>(key, member.to_owned())).await
    }

    async fn replace_set(&self, key: &str, members: &[String], ttl: Duration) -> Result<()> {
        if members.is_empty() {
            return self.delete(key).await;
        }

        // DEL + SADD + EXPIRE as one pipelined write: a failure leaves the key
        // fully old, fully new, or absent - never a merge of old and new.
        let seconds = expire_seconds(ttl);
        self.run(async {
            let pipeline = self.client.pipeline();
            let _: () = pipeline.del(key).await?;
            let _: () = pipeline.sadd(key, members.to_vec()).await?;
            let _: () = pipeline.expire(key, seconds, None).await?;
            let _: Vec<Value> = pipeline.all().await?;
            Ok(())
        })
        .await
    }
}
