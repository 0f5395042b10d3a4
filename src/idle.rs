//! Unsolicited messages into the most recently active group.
//!
//! The speaker only talks into a room that was active within the activity
//! window, no more than once per cooldown, and then only on a lucky roll.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionState, GroupActivity};
use crate::config::IdleConfig;
use crate::platform::ChatSender;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AutoMessageState {
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum IdleOutcome {
    NoActiveGroup,
    Stale,
    CoolingDown,
    Damped,
    NoPhrases,
    Spoke { chat_id: i64, phrase: String },
}

pub struct IdleSpeaker {
    config: IdleConfig,
    admission: Arc<Mutex<AdmissionState>>,
    auto: Mutex<AutoMessageState>,
    sender: Arc<dyn ChatSender>,
}

impl IdleSpeaker {
    pub fn new(
        config: IdleConfig,
        admission: Arc<Mutex<AdmissionState>>,
        sender: Arc<dyn ChatSender>,
    ) -> Self {
        Self {
            config,
            admission,
            auto: Mutex::new(AutoMessageState::default()),
            sender,
        }
    }

    pub async fn tick(&self) -> IdleOutcome {
        self.tick_at(Utc::now(), rand::random::<f64>, |phrases| {
            phrases.choose(&mut rand::thread_rng()).cloned()
        })
        .await
    }

    /// One timer tick. `roll` is drawn only once both time gates pass;
    /// `pick` chooses the phrase.
    pub async fn tick_at<R, P>(&self, now: DateTime<Utc>, roll: R, pick: P) -> IdleOutcome
    where
        R: FnOnce() -> f64 + Send,
        P: FnOnce(&[String]) -> Option<String> + Send,
    {
        let activity = self.admission.lock().await.activity.clone();

        let target = {
            let mut auto = self.auto.lock().await;
            match self.evaluate(&activity, &auto, now, roll, pick) {
                Ok((chat_id, phrase)) => {
                    // set before sending; a failed send keeps the cooldown
                    auto.last_sent_at = Some(now);
                    (chat_id, phrase)
                }
                Err(outcome) => {
                    debug!("Idle tick: {:?}", outcome);
                    return outcome;
                }
            }
        };

        let (chat_id, phrase) = target;
        info!("Idle message to group {}: {}", chat_id, phrase);
        if let Err(e) = self.sender.send_text(chat_id, &phrase).await {
            warn!("Failed to send idle message to group {}: {:#}", chat_id, e);
        }

        IdleOutcome::Spoke { chat_id, phrase }
    }

    fn evaluate<R, P>(
        &self,
        activity: &GroupActivity,
        auto: &AutoMessageState,
        now: DateTime<Utc>,
        roll: R,
        pick: P,
    ) -> Result<(i64, String), IdleOutcome>
    where
        R: FnOnce() -> f64,
        P: FnOnce(&[String]) -> Option<String>,
    {
        let (Some(chat_id), Some(active_at)) =
            (activity.last_active_group, activity.last_activity_at)
        else {
            return Err(IdleOutcome::NoActiveGroup);
        };

        if elapsed(active_at, now) > self.config.activity_window() {
            return Err(IdleOutcome::Stale);
        }

        if let Some(sent_at) = auto.last_sent_at {
            if elapsed(sent_at, now) < self.config.cooldown() {
                return Err(IdleOutcome::CoolingDown);
            }
        }

        if roll() >= self.config.probability {
            return Err(IdleOutcome::Damped);
        }

        match pick(&self.config.phrases) {
            Some(phrase) => Ok((chat_id, phrase)),
            None => Err(IdleOutcome::NoPhrases),
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeDelta;

    #[derive(Default)]
    struct RecordingSender {
        sent: std::sync::Mutex<Vec<(i64, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatSender for RecordingSender {
        async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            if self.fail {
                anyhow::bail!("forbidden: bot was kicked");
            }
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn first(phrases: &[String]) -> Option<String> {
        phrases.first().cloned()
    }

    fn never() -> f64 {
        panic!("roll should not be drawn")
    }

    fn speaker_with(
        activity_age: Option<TimeDelta>,
        sender: Arc<RecordingSender>,
    ) -> IdleSpeaker {
        let mut state = AdmissionState::default();
        if let Some(age) = activity_age {
            state.activity.touch(-100, t0() - age);
        }
        IdleSpeaker::new(IdleConfig::default(), Arc::new(Mutex::new(state)), sender)
    }

    #[tokio::test]
    async fn test_speaks_into_recently_active_group() {
        let sender = Arc::new(RecordingSender::default());
        let speaker = speaker_with(Some(TimeDelta::minutes(30)), sender.clone());
        speaker.auto.lock().await.last_sent_at = Some(t0() - TimeDelta::hours(3));

        let outcome = speaker
            .tick_at(t0(), || 0.05, |p| p.choose(&mut rand::thread_rng()).cloned())
            .await;

        let (chat_id, phrase) = match outcome {
            IdleOutcome::Spoke { chat_id, phrase } => (chat_id, phrase),
            other => panic!("expected a message, got {:?}", other),
        };
        assert_eq!(chat_id, -100);
        assert!(IdleConfig::default().phrases.contains(&phrase));
        assert_eq!(speaker.auto.lock().await.last_sent_at, Some(t0()));
        assert_eq!(sender.sent.lock().unwrap().clone(), vec![(-100, phrase)]);
    }

    #[tokio::test]
    async fn test_no_group_ever_active() {
        let sender = Arc::new(RecordingSender::default());
        let speaker = speaker_with(None, sender.clone());

        assert_eq!(
            speaker.tick_at(t0(), never, first).await,
            IdleOutcome::NoActiveGroup
        );
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_group_is_left_alone() {
        let sender = Arc::new(RecordingSender::default());
        let speaker = speaker_with(Some(TimeDelta::minutes(61)), sender.clone());

        // even a winning roll does not matter
        assert_eq!(speaker.tick_at(t0(), never, first).await, IdleOutcome::Stale);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_tick_without_previous_send() {
        let sender = Arc::new(RecordingSender::default());
        let speaker = speaker_with(Some(TimeDelta::minutes(5)), sender);

        let outcome = speaker.tick_at(t0(), || 0.0, first).await;
        assert!(matches!(outcome, IdleOutcome::Spoke { .. }));
    }

    #[tokio::test]
    async fn test_losing_roll_stays_quiet() {
        let sender = Arc::new(RecordingSender::default());
        let speaker = speaker_with(Some(TimeDelta::minutes(5)), sender.clone());

        assert_eq!(speaker.tick_at(t0(), || 0.15, first).await, IdleOutcome::Damped);
        assert_eq!(speaker.auto.lock().await.last_sent_at, None);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_never_twice_within_cooldown() {
        let sender = Arc::new(RecordingSender::default());
        let speaker = speaker_with(Some(TimeDelta::minutes(1)), sender.clone());

        let mut spoke = 0;
        // tick every minute for 3 hours while the group keeps chatting
        for minute in 0..180 {
            let now = t0() + TimeDelta::minutes(minute);
            speaker.admission.lock().await.activity.touch(-100, now);
            if let IdleOutcome::Spoke { .. } = speaker.tick_at(now, || 0.0, first).await {
                spoke += 1;
            }
        }

        // at t0, t0+2h
        assert_eq!(spoke, 2);
        assert_eq!(sender.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_cooldown() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let speaker = speaker_with(Some(TimeDelta::minutes(5)), sender.clone());

        let outcome = speaker.tick_at(t0(), || 0.0, first).await;
        assert!(matches!(outcome, IdleOutcome::Spoke { .. }));
        assert_eq!(speaker.auto.lock().await.last_sent_at, Some(t0()));

        let later = t0() + TimeDelta::minutes(10);
        assert_eq!(
            speaker.tick_at(later, never, first).await,
            IdleOutcome::CoolingDown
        );
    }

    #[tokio::test]
    async fn test_empty_phrase_set() {
        let mut state = AdmissionState::default();
        state.activity.touch(-100, t0());
        let config = IdleConfig {
            phrases: Vec::new(),
            ..IdleConfig::default()
        };
        let speaker = IdleSpeaker::new(
            config,
            Arc::new(Mutex::new(state)),
            Arc::new(RecordingSender::default()),
        );

        assert_eq!(
            speaker.tick_at(t0(), || 0.0, first).await,
            IdleOutcome::NoPhrases
        );
        assert_eq!(speaker.auto.lock().await.last_sent_at, None);
    }
}
