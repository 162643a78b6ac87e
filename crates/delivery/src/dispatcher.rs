//! Transport dispatcher port — fire-and-forget enqueue of built messages.

use std::sync::Arc;

use dripline_core::config::DeliveryConfig;
use parking_lot::Mutex;
use tracing::info;

use crate::message::OutboundMessage;

/// Accepts a fully-built communication and either sends immediately or
/// schedules it for `future_send_at`. Returns nothing synchronously;
/// dispatch after a flow's commit is at-least-once, so implementations must
/// tolerate duplicate enqueues of the same message id.
pub trait TransportDispatcher: Send + Sync {
    fn enqueue(&self, message: &OutboundMessage);
}

/// No-op dispatcher for tests and dry runs.
pub struct NoopDispatcher;

impl TransportDispatcher for NoopDispatcher {
    fn enqueue(&self, _message: &OutboundMessage) {}
}

/// In-memory dispatcher that captures enqueued messages for testing.
#[derive(Default)]
pub struct RecordingDispatcher {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().len()
    }
}

impl TransportDispatcher for RecordingDispatcher {
    fn enqueue(&self, message: &OutboundMessage) {
        self.messages.lock().push(message.clone());
    }
}

/// Dispatcher that logs each enqueue and bumps per-channel counters; stands
/// in for the real transport in the runner binary.
pub struct LoggingDispatcher {
    config: DeliveryConfig,
}

impl LoggingDispatcher {
    pub fn new(config: DeliveryConfig) -> Self {
        info!(
            from = %config.from_email,
            sms_sender = %config.sms_sender,
            "Logging dispatcher initialized"
        );
        Self { config }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }
}

impl TransportDispatcher for LoggingDispatcher {
    fn enqueue(&self, message: &OutboundMessage) {
        metrics::counter!(
            "delivery.enqueued",
            "channel" => format!("{:?}", message.channel)
        )
        .increment(1);

        info!(
            message_id = %message.id,
            channel = ?message.channel,
            recipients = message.audience.len(),
            scheduled = message.future_send_at.is_some(),
            "Communication enqueued for transport"
        );
    }
}

/// Convenience: a no-op dispatcher handle.
pub fn noop_dispatcher() -> Arc<dyn TransportDispatcher> {
    Arc::new(NoopDispatcher)
}

/// Convenience: a recording dispatcher handle for tests.
pub fn recording_dispatcher() -> Arc<RecordingDispatcher> {
    Arc::new(RecordingDispatcher::new())
}
