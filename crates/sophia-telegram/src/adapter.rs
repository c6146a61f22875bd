//! Telegram channel adapter.
//!
//! Long polling via a teloxide `Dispatcher`; no public URL required.
//! Incoming messages become USER_DIRECT events on the shared bus; the
//! processor's response handler sends replies back chunked to the chat.

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{info, warn};

use sophia_core::config::TelegramConfig;
use sophia_events::processor::ChatError;
use sophia_events::{Event, EventBus, EventPriority, ResponseHandler};

use crate::allow::is_allowed;
use crate::send::split_chunks;

pub struct TelegramAdapter {
    bus: Arc<EventBus>,
    config: TelegramConfig,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig, bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            config: config.clone(),
        }
    }

    /// Build the bot used for outbound replies.
    pub fn bot(&self) -> Bot {
        Bot::new(&self.config.token)
    }

    /// Connect to Telegram and drive the long-polling loop.
    ///
    /// Never returns; runs for the lifetime of the process.
    pub async fn run(self) {
        let bot = Bot::new(&self.config.token);
        info!("telegram: starting long-polling dispatcher");

        let bus = Arc::clone(&self.bus);
        let config = self.config.clone();
        let handler = Update::filter_message().endpoint(handle_message);

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![bus, config])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    bus: Arc<EventBus>,
    config: TelegramConfig,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    if !is_allowed(&config.allowed_chat_ids, chat_id) {
        warn!(chat_id, "blocked message from disallowed chat");
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text == "/start" {
        bot.send_message(msg.chat.id, "Hi! Send me a message.").await?;
        return Ok(());
    }

    let session_id = format!("telegram_{chat_id}");
    let mut event = Event::chat_message(session_id, text, EventPriority::UserDirect, "telegram");
    event.reply_to = Some(chat_id.to_string());

    info!(chat_id, "telegram message received ({} chars)", text.len());
    bus.put_threadsafe(event);
    Ok(())
}

/// Routes agent responses back to the originating Telegram chat.
pub struct TelegramResponder {
    bot: Bot,
}

impl TelegramResponder {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ResponseHandler for TelegramResponder {
    async fn handle(&self, event: &Event, response: &str) -> Result<(), ChatError> {
        let chat_id: i64 = event
            .reply_to
            .as_deref()
            .ok_or("telegram event has no reply_to chat id")?
            .parse()
            .map_err(|_| "telegram reply_to is not a chat id")?;

        for chunk in split_chunks(response) {
            self.bot.send_message(ChatId(chat_id), chunk).await?;
        }
        info!(chat_id, "telegram response sent");
        Ok(())
    }
}
