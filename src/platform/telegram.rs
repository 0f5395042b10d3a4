use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageEntityKind};
use tracing::{debug, info, warn};

use crate::admission::BotIdentity;
use crate::platform::{ChatKind, ChatSender, InboundEvent, MentionSpan, MentionTarget};
use crate::relay::Relay;

/// Telegram rejects messages above 4096 chars; keep some headroom
const MAX_MESSAGE_LEN: usize = 4000;

const SHUTDOWN_RETRY_DELAY: Duration = Duration::from_millis(100);
const SHUTDOWN_RETRIES: u32 = 100;

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

#[async_trait]
impl ChatSender for Bot {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            self.send_message(ChatId(chat_id), chunk).await?;
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await?;
        Ok(())
    }
}

/// Look up the bot's own account. A failure leaves the identity unresolved,
/// which means group messages are never treated as addressed.
pub async fn resolve_identity(bot: &Bot) -> Option<BotIdentity> {
    match bot.get_me().await {
        Ok(me) => {
            let username = me.user.username.clone().unwrap_or_default();
            info!("Bot authenticated: @{} (ID: {})", username, me.user.id);
            Some(BotIdentity {
                id: me.user.id.0,
                username,
            })
        }
        Err(e) => {
            warn!(
                "Failed to resolve bot identity: {} (group mentions will be ignored)",
                e
            );
            None
        }
    }
}

/// Build a platform-agnostic event from a text message
fn inbound_event(msg: &Message) -> Option<InboundEvent> {
    let user = msg.from.as_ref()?;
    let text = msg.text()?;

    let chat_kind = if msg.chat.is_private() {
        ChatKind::Private
    } else if msg.chat.is_group() || msg.chat.is_supergroup() {
        ChatKind::Group
    } else {
        ChatKind::Other
    };

    let mention_spans = msg
        .entities()
        .unwrap_or_default()
        .iter()
        .filter_map(|entity| {
            let target = match &entity.kind {
                MessageEntityKind::Mention => MentionTarget::Username,
                MessageEntityKind::TextMention { user } => MentionTarget::User(user.id.0),
                _ => return None,
            };
            Some(MentionSpan {
                offset: entity.offset,
                length: entity.length,
                target,
            })
        })
        .collect();

    let replied_to_sender_id = msg
        .reply_to_message()
        .and_then(|reply| reply.from.as_ref())
        .map(|sender| sender.id.0);

    Some(InboundEvent {
        chat_id: msg.chat.id.0,
        chat_kind,
        sender_id: user.id.0,
        sender_is_bot: user.is_bot,
        text: text.to_string(),
        mention_spans,
        replied_to_sender_id,
    })
}

/// Run the Telegram platform until SIGINT/SIGTERM
pub async fn run(relay: Arc<Relay>, bot: Bot) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_edited_message().endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping dispatcher...");
        // a signal can land before dispatch() has started; keep asking
        // until the dispatcher is running
        match retry_until_ok(|| shutdown.shutdown(), SHUTDOWN_RETRY_DELAY, SHUTDOWN_RETRIES).await
        {
            Some(done) => done.await,
            None => warn!("Dispatcher never started, giving up on graceful shutdown"),
        }
    });

    dispatcher.dispatch().await;

    info!("Telegram platform stopped");
    Ok(())
}

/// Call `attempt` until it succeeds, sleeping `delay` between tries.
/// Returns `None` once `max_attempts` have all failed.
async fn retry_until_ok<T, E, F>(mut attempt: F, delay: Duration, max_attempts: u32) -> Option<T>
where
    F: FnMut() -> std::result::Result<T, E>,
    E: std::fmt::Display,
{
    for n in 1..=max_attempts {
        match attempt() {
            Ok(value) => return Some(value),
            Err(e) => {
                debug!("Attempt {}/{} failed: {}", n, max_attempts, e);
                if n < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    None
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn handle_message(msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    let Some(event) = inbound_event(&msg) else {
        return Ok(());
    };

    info!(
        "Telegram message from {} in chat {} ({:?}): {}",
        event.sender_id, event.chat_id, event.chat_kind, event.text
    );

    relay.handle(&event).await;
    Ok(())
}
