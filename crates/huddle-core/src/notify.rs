//! Notification seam for turn handoffs.
//!
//! The coordinator never talks to a delivery channel directly; it dispatches
//! through this trait. Delivery is best-effort: the coordinator logs and
//! discards notifier failures, so implementations should not retry
//! internally either.

use async_trait::async_trait;

use crate::Result;

/// Delivery priority hint passed through to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPriority {
    /// Background information
    Low,
    /// Default priority for turn handoffs
    Normal,
    /// Needs immediate attention
    High,
}

impl NotifyPriority {
    /// Wire string for channels that take priorities as text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// A channel that can deliver a message to a named agent.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message to `recipient`.
    async fn notify(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        priority: NotifyPriority,
    ) -> Result<()>;
}

/// Notifier that delivers nothing and always succeeds. The default when no
/// channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        _recipient: &str,
        _subject: &str,
        _body: &str,
        _priority: NotifyPriority,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_notifier_always_succeeds() -> Result<()> {
        NoopNotifier
            .notify("builder-1", "subject", "body", NotifyPriority::Normal)
            .await
    }

    #[test]
    fn priority_wire_strings_are_lowercase() {
        assert_eq!(NotifyPriority::Low.as_str(), "low");
        assert_eq!(NotifyPriority::Normal.as_str(), "normal");
        assert_eq!(NotifyPriority::High.as_str(), "high");
    }
}
