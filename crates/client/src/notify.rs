//! User-visible notifications.
//!
//! Fetch and submit failures end here as a [`Toast`] and go no further.

use referral_core::PortalError;
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct Notifier {
    tx: broadcast::Sender<Toast>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Toast {
            level: ToastLevel::Info,
            message: message.into(),
        });
    }

    /// Log `err` and show its user-facing message.
    pub fn error(&self, err: &PortalError) {
        tracing::warn!(error = %err, "operation failed");
        self.push(Toast {
            level: ToastLevel::Error,
            message: err.user_message(),
        });
    }

    fn push(&self, toast: Toast) {
        // Nobody listening (headless use) is fine.
        let _ = self.tx.send(toast);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_become_user_messages() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();
        notifier.error(&PortalError::Network("connection reset".into()));
        let toast = rx.try_recv().unwrap();
        assert_eq!(toast.level, ToastLevel::Error);
        assert_eq!(toast.message, "Unable to reach the server. Please try again.");
    }

    #[test]
    fn conflicts_show_the_server_message() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();
        notifier.error(&PortalError::Conflict(
            "file is already being reviewed by another professional".into(),
        ));
        assert_eq!(
            rx.try_recv().unwrap().message,
            "file is already being reviewed by another professional"
        );
    }
}
