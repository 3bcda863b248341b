// Outbound award notifications.
//
// Delivery (push, email, templating) lives outside this crate. The engine
// hands batches to a `Notifier` and never lets a delivery failure undo or
// fail an award.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::metrics;
use crate::model::{BadgeTier, PlayerId, TrophyType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    BadgeUnlocked {
        player_id: PlayerId,
        badge_id: String,
        achievement_id: String,
        tier: BadgeTier,
    },
    TrophyAwarded {
        player_id: PlayerId,
        trophy_id: String,
        competition_id: String,
        trophy_type: TrophyType,
        rank: u32,
    },
}

impl Notification {
    pub fn player_id(&self) -> &str {
        match self {
            Self::BadgeUnlocked { player_id, .. } | Self::TrophyAwarded { player_id, .. } => {
                player_id
            }
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, batch: &[Notification]) -> Result<()>;
}

/// Default notifier: writes each notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, batch: &[Notification]) -> Result<()> {
        for n in batch {
            tracing::info!(player_id = n.player_id(), notification = ?n, "Notification dispatched");
        }
        Ok(())
    }
}

/// Keeps every batch in memory; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, batch: &[Notification]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Dependency("notification channel down".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(batch.iter().cloned());
        Ok(())
    }
}

/// Send a batch, swallowing failures. Empty batches are not sent.
pub async fn dispatch(notifier: &dyn Notifier, batch: &[Notification]) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = notifier.notify(batch).await {
        metrics::NOTIFICATION_FAILURES_TOTAL.inc();
        tracing::warn!(count = batch.len(), "Notification dispatch failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trophy_note() -> Notification {
        Notification::TrophyAwarded {
            player_id: "p1".into(),
            trophy_id: "cup_p1_winner".into(),
            competition_id: "cup".into(),
            trophy_type: TrophyType::Winner,
            rank: 1,
        }
    }

    #[tokio::test]
    async fn test_dispatch_records() {
        let notifier = RecordingNotifier::new();
        dispatch(&notifier, &[trophy_note()]).await;
        assert_eq!(notifier.sent(), vec![trophy_note()]);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);
        let before = metrics::NOTIFICATION_FAILURES_TOTAL.get();
        dispatch(&notifier, &[trophy_note()]).await;
        assert!(notifier.sent().is_empty());
        assert!(metrics::NOTIFICATION_FAILURES_TOTAL.get() > before);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(trophy_note()).unwrap();
        assert_eq!(json["kind"], "trophy_awarded");
        assert_eq!(json["trophy_type"], "winner");
    }
}
