use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionEngine, AdmissionState, Decision};
use crate::config::AdmissionConfig;
use crate::llm::Generator;
use crate::platform::{ChatSender, InboundEvent};

/// Routes admitted messages through the generator and back into the chat.
/// Platform-agnostic — receives InboundEvent, talks through ChatSender.
pub struct Relay {
    engine: AdmissionEngine,
    state: Arc<Mutex<AdmissionState>>,
    generator: Arc<dyn Generator>,
    sender: Arc<dyn ChatSender>,
    persona: String,
    fallback_reply: String,
}

impl Relay {
    pub fn new(
        engine: AdmissionEngine,
        state: Arc<Mutex<AdmissionState>>,
        generator: Arc<dyn Generator>,
        sender: Arc<dyn ChatSender>,
        persona: String,
        config: &AdmissionConfig,
    ) -> Self {
        Self {
            engine,
            state,
            generator,
            sender,
            persona,
            fallback_reply: config.fallback_reply.clone(),
        }
    }

    /// Handle one inbound event using the wall clock and a fresh random draw
    pub async fn handle(&self, event: &InboundEvent) -> Decision {
        self.handle_at(event, Utc::now(), rand::random::<f64>).await
    }

    pub async fn handle_at<R>(&self, event: &InboundEvent, now: DateTime<Utc>, roll: R) -> Decision
    where
        R: FnOnce() -> f64 + Send,
    {
        // the lock only covers the decision, never the backend call
        let decision = {
            let mut state = self.state.lock().await;
            let decision = self.engine.decide(event, &mut state, now, roll);
            if decision == Decision::Engage {
                debug!("Cooldown table now tracks {} user(s)", state.cooldowns.len());
            }
            decision
        };

        match decision {
            Decision::Engage => {
                info!(
                    "Engaging with user {} in chat {}",
                    event.sender_id, event.chat_id
                );
                self.engage(event).await;
            }
            Decision::Skip(reason) => {
                debug!(
                    "Skipping message from {} in chat {}: {:?}",
                    event.sender_id, event.chat_id, reason
                );
            }
        }

        decision
    }

    /// Generate and send a reply. Every failure ends in the fallback phrase;
    /// nothing propagates to the caller.
    async fn engage(&self, event: &InboundEvent) {
        let chat_id = event.chat_id;

        self.sender.send_typing(chat_id).await.ok();

        let reply = match self.generator.generate(&self.persona, &event.text).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("Generator returned an empty reply for chat {}", chat_id);
                self.send_fallback(chat_id).await;
                return;
            }
            Err(e) => {
                error!("Error generating reply for chat {}: {:#}", chat_id, e);
                self.send_fallback(chat_id).await;
                return;
            }
        };

        if let Err(e) = self.sender.send_text(chat_id, reply.trim()).await {
            error!("Failed to send reply to chat {}: {:#}", chat_id, e);
            self.send_fallback(chat_id).await;
        }
    }

    async fn send_fallback(&self, chat_id: i64) {
        if let Err(e) = self.sender.send_text(chat_id, &self.fallback_reply).await {
            error!(
                marker = "fallback_send_failed",
                "Failed to send fallback reply to chat {}: {:#}", chat_id, e
            );
        }
    }
}
