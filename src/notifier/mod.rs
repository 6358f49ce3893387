// Outbound signal delivery
pub mod telegram;

pub use telegram::TelegramNotifier;

use crate::models::SignalNotification;

/// Best-effort delivery seam. Implementations swallow their own failures;
/// a missed notification never blocks or rolls back persisted state.
pub trait Notify: Send + Sync {
    fn notify(
        &self,
        notification: &SignalNotification,
    ) -> impl std::future::Future<Output = ()> + Send;
}

/// Used when no delivery channel is configured (e.g. one-shot CLI scans)
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notify for NullNotifier {
    async fn notify(&self, _notification: &SignalNotification) {}
}
