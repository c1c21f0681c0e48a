//! Shared core contracts for the CREEP scheduler.
//!
//! This crate defines the cross-crate contracts consumed by the engine and the
//! `creepd` binary: the worker-queue capability, the asset/task data model with
//! resource-hint matching, and the vendor adapter contract.
//!
//! # API notes
//! `creep-core` is an internal crate (`publish = false`). Its public API uses a
//! few third-party types (`chrono::DateTime<Utc>`, `serde_json::Value`) as part
//! of the scheduler contract.

use async_trait::async_trait;
use std::{fmt, time::Duration};

pub mod adapter;
pub mod memory_queue;
pub mod models;
pub mod redis_queue;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    inner: anyhow::Error,
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            inner: anyhow::anyhow!(message.into()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self { inner: value }
    }
}

impl From<redis::RedisError> for Error {
    fn from(value: redis::RedisError) -> Self {
        Self {
            inner: anyhow::Error::from(value),
        }
    }
}

/// Named FIFO of opaque payloads shared by loaders and workers.
///
/// A payload must only become visible to consumers once the producer's
/// database transaction has committed; the Loader therefore publishes
/// strictly after commit.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Append payloads at the tail of the named queue, preserving argument
    /// order.
    async fn push(&self, name: &str, payloads: &[Vec<u8>]) -> Result<()>;

    /// Dequeue the head of the named queue, waiting up to `timeout`.
    ///
    /// Returns `None` only on timeout.
    async fn blocking_pop(&self, name: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;
}
