//! In-process implementation of the worker queue for tests and local runs.

use crate::Queue;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, name: &str) -> Option<Vec<u8>> {
        let mut queues = self.queues.lock().expect("memory queue poisoned");
        queues.get_mut(name).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, name: &str, payloads: &[Vec<u8>]) -> crate::Result<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        {
            let mut queues = self.queues.lock().expect("memory queue poisoned");
            let queue = queues.entry(name.to_string()).or_default();
            queue.extend(payloads.iter().cloned());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(&self, name: &str, timeout: Duration) -> crate::Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a concurrent push between
            // the check and the wait still wakes us.
            let notified = self.notify.notified();

            if let Some(payload) = self.try_pop(name) {
                return Ok(Some(payload));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }
}
