//! Blocking read side of the worker queue.

use creep_core::Queue;
use std::sync::Arc;
use std::time::Duration;

pub struct Dispenser {
    queue: Arc<dyn Queue>,
    queue_name: String,
    timeout: Duration,
}

impl Dispenser {
    pub fn new(queue: Arc<dyn Queue>, queue_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            timeout,
        }
    }

    /// Pop one payload, waiting up to the configured timeout.
    ///
    /// `None` means timeout (or an undecodable payload that was dropped); the
    /// caller is expected to sleep its poll interval before retrying.
    pub async fn acquire(&self) -> anyhow::Result<Option<String>> {
        let Some(raw) = self.queue.blocking_pop(&self.queue_name, self.timeout).await? else {
            return Ok(None);
        };

        match String::from_utf8(raw) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) => {
                tracing::error!(
                    event = "creep.dispenser.undecodable",
                    queue = %self.queue_name,
                    error = %err,
                    "dropping undecodable payload"
                );
                Ok(None)
            }
        }
    }
}
