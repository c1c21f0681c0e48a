//! Redis-backed implementation of the worker queue (RPUSH / BLPOP).

use crate::Queue;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

#[derive(Clone)]
pub struct RedisQueue {
    manager: redis::aio::ConnectionManager,
}

impl RedisQueue {
    /// Connect and hold a reconnecting connection manager.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn push(&self, name: &str, payloads: &[Vec<u8>]) -> crate::Result<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        // RPUSH appends the arguments in order, matching the trait contract.
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(name, payloads).await?;
        Ok(())
    }

    async fn blocking_pop(&self, name: &str, timeout: Duration) -> crate::Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let reply: Option<(String, Vec<u8>)> = conn.blpop(name, timeout.as_secs_f64()).await?;
        Ok(reply.map(|(_queue, payload)| payload))
    }
}
