use crate::types::ProgressEvent;
use async_trait::async_trait;
use tracing::debug;

/// Push-channel seam: delivers a progress event to one client session.
///
/// Fire-and-forget with no delivery guarantee; implementations log
/// their own failures and must never fail the job.
#[async_trait]
pub trait SessionNotifier {
    async fn send_to_session(&self, session_id: &str, event: &ProgressEvent);
}

/// Notifier for callers without a push channel; events are still
/// observable through the per-job subscription.
pub struct NullNotifier;

#[async_trait]
impl SessionNotifier for NullNotifier {
    async fn send_to_session(&self, session_id: &str, event: &ProgressEvent) {
        debug!(session_id, job = %event.id, "No push channel configured, dropping event");
    }
}
