use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::info;

use crate::store::KeyedStore;

const KEY_PREFIX: &str = "parley:";

/// Redis-backed keyed store. Maps become Redis hashes, so entries are shared
/// by every server process and survive any single process's restart.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to open redis connection")?;

        info!("Connected to redis at {}", url);
        Ok(Self { conn })
    }

    fn map_key(map: &str) -> String {
        format!("{}{}", KEY_PREFIX, map)
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get(&self, map: &str, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .hget(Self::map_key(map), key)
            .await
            .context("failed to read hash field")?;
        Ok(value)
    }

    async fn set(&self, map: &str, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .hset(Self::map_key(map), key, value)
            .await
            .context("failed to write hash field")?;
        Ok(())
    }

    async fn delete(&self, map: &str, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .hdel(Self::map_key(map), key)
            .await
            .context("failed to delete hash field")?;
        Ok(())
    }

    async fn entries(&self, map: &str) -> Result<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let all: std::collections::HashMap<String, String> = conn
            .hgetall(Self::map_key(map))
            .await
            .context("failed to read hash")?;
        Ok(all.into_iter().collect())
    }
}
