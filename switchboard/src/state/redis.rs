use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{RedisError, cmd};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use tracing::{error, info};

use super::error::{StateError, StateResult};
use super::store::StateStore;

/// Redis-backed shared store, reached through a `deadpool-redis` pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Build a pool for the given URL. Connections are opened lazily, so an
    /// unreachable server surfaces on first use as `Unavailable`.
    pub fn connect(url: &str) -> StateResult<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StateError::Unavailable(e.to_string()))?;
        info!(%url, "redis pool created");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StateResult<Connection> {
        self.pool.get().await.map_err(|e| {
            error!(error = %e, "failed to get redis connection");
            StateError::Unavailable(e.to_string())
        })
    }
}

fn map_redis_error(e: RedisError) -> StateError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        StateError::Unavailable(e.to_string())
    } else {
        StateError::Store(e.to_string())
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StateResult<()> {
        let mut conn = self.conn().await?;
        let mut command = cmd("SET");
        command.arg(key).arg(value);
        if let Some(ttl) = ttl {
            command.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = command
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let data: Option<Vec<u8>> = cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(data)
    }

    async fn delete(&self, key: &str) -> StateResult<()> {
        let mut conn = self.conn().await?;
        let _: () = cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> StateResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = cmd("SADD")
            .arg(key)
            .arg(members)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> StateResult<()> {
        let mut conn = self.conn().await?;
        let _: () = cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StateResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(members)
    }

    async fn is_set_member(&self, key: &str, member: &str) -> StateResult<bool> {
        let mut conn = self.conn().await?;
        let is_member: bool = cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(is_member)
    }

    async fn push_list(&self, key: &str, items: &[String]) -> StateResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = cmd("LPUSH")
            .arg(key)
            .arg(items)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn trim_list(&self, key: &str, start: isize, stop: isize) -> StateResult<()> {
        let mut conn = self.conn().await?;
        let _: () = cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn range_list(&self, key: &str, start: isize, stop: isize) -> StateResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let items: Vec<String> = cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(items)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(reply.is_some())
    }
}
