//! Publisher wrapper that rejects messages on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use spentify_core::bus::{BusError, MessagePublisher};
use spentify_core::envelope::BusMessage;

/// Rejects the next `n` publishes, then forwards to the wrapped publisher.
pub struct FlakyPublisher {
    inner: Arc<dyn MessagePublisher>,
    remaining_failures: AtomicU32,
}

impl FlakyPublisher {
    /// Wraps `inner`, failing the first `failures` publishes.
    #[must_use]
    pub fn new(inner: Arc<dyn MessagePublisher>, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl MessagePublisher for FlakyPublisher {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        let fail = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(BusError::Rejected("broker unavailable".into()));
        }
        self.inner.publish(topic, message).await
    }
}
