//! Per-event reply admission.
//!
//! Every inbound message goes through [`AdmissionEngine::decide`], which
//! records group activity and then runs a fixed chain of gates: chat kind,
//! addressing, random damping and per-user cooldown. Only an `Engage`
//! outcome touches the cooldown table.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::AdmissionConfig;
use crate::platform::{ChatKind, InboundEvent, MentionTarget};

/// The bot's own account, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: u64,
    pub username: String,
}

/// Why a message did not get a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedChat,
    NotAddressed,
    Damped,
    CoolingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Engage,
    Skip(SkipReason),
}

/// Last engaged reply per user. Grows with every distinct user, never evicted.
#[derive(Debug, Default)]
pub struct CooldownTable {
    last_engaged: HashMap<u64, DateTime<Utc>>,
}

impl CooldownTable {
    pub fn last_engaged(&self, user_id: u64) -> Option<DateTime<Utc>> {
        self.last_engaged.get(&user_id).copied()
    }

    pub fn is_cooling_down(&self, user_id: u64, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_engaged(user_id) {
            Some(last) => elapsed(last, now) < window,
            None => false,
        }
    }

    fn mark(&mut self, user_id: u64, now: DateTime<Utc>) {
        let entry = self.last_engaged.entry(user_id).or_insert(now);
        // clock steps backwards must not rewind a user's cooldown
        if now > *entry {
            *entry = now;
        }
    }

    pub fn len(&self) -> usize {
        self.last_engaged.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.last_engaged.is_empty()
    }
}

/// The single most recently active group
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupActivity {
    pub last_active_group: Option<i64>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl GroupActivity {
    pub fn touch(&mut self, chat_id: i64, now: DateTime<Utc>) {
        self.last_active_group = Some(chat_id);
        self.last_activity_at = Some(now);
    }
}

/// Mutable state shared between the reply path and the idle speaker
#[derive(Debug, Default)]
pub struct AdmissionState {
    pub cooldowns: CooldownTable,
    pub activity: GroupActivity,
}

pub struct AdmissionEngine {
    config: AdmissionConfig,
    bot: Option<BotIdentity>,
}

impl AdmissionEngine {
    pub fn new(config: AdmissionConfig, bot: Option<BotIdentity>) -> Self {
        Self { config, bot }
    }

    /// Decide whether `event` gets a reply. `roll` yields a uniform value in
    /// [0, 1) and is only called when the damping gate is reached.
    pub fn decide<R>(
        &self,
        event: &InboundEvent,
        state: &mut AdmissionState,
        now: DateTime<Utc>,
        roll: R,
    ) -> Decision
    where
        R: FnOnce() -> f64,
    {
        if event.chat_kind == ChatKind::Group && !event.sender_is_bot {
            state.activity.touch(event.chat_id, now);
        }

        let mentioned = match event.chat_kind {
            ChatKind::Private => false,
            ChatKind::Group => {
                if !self.is_addressed(event) {
                    return Decision::Skip(SkipReason::NotAddressed);
                }
                true
            }
            ChatKind::Other => return Decision::Skip(SkipReason::UnsupportedChat),
        };

        if !mentioned && roll() > self.config.reply_probability {
            return Decision::Skip(SkipReason::Damped);
        }

        if state
            .cooldowns
            .is_cooling_down(event.sender_id, now, self.config.cooldown())
        {
            return Decision::Skip(SkipReason::CoolingDown);
        }

        state.cooldowns.mark(event.sender_id, now);
        Decision::Engage
    }

    /// Whether a group message is directed at the bot. Always false while
    /// the bot identity is unknown.
    pub fn is_addressed(&self, event: &InboundEvent) -> bool {
        let Some(bot) = &self.bot else {
            return false;
        };

        let handle = format!("@{}", bot.username).to_lowercase();
        if !bot.username.is_empty() && event.text.to_lowercase().contains(&handle) {
            return true;
        }

        let by_entity = event.mention_spans.iter().any(|span| match span.target {
            MentionTarget::Username => span
                .covered_text(&event.text)
                .is_some_and(|covered| covered.to_lowercase() == handle),
            MentionTarget::User(id) => id == bot.id,
        });

        by_entity || event.replied_to_sender_id == Some(bot.id)
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
