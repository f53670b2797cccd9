//! # Telegram Bot Integration
//!
//! Wires the matcher, the entry store and the reply assembler to teloxide:
//! one message handler for inbound traffic and a textual dispatcher for
//! the admin command surface.

pub mod commands;
pub mod message_handler;

use crate::config::AppConfig;
use crate::images::ImageStore;
use crate::matcher::Matcher;
use crate::store::SharedStore;
use teloxide::prelude::*;
use tracing::warn;

pub use message_handler::message_handler;

/// Shared dependencies of every bot handler
pub struct BotContext {
    pub config: AppConfig,
    pub store: SharedStore,
    pub matcher: Matcher,
    pub images: ImageStore,
    pub http: reqwest::Client,
    /// Bot username, for at-mention invocation detection
    pub username: String,
}

impl BotContext {
    /// Assemble the handler context
    pub fn new(
        config: AppConfig,
        store: SharedStore,
        images: ImageStore,
        http: reqwest::Client,
        username: String,
    ) -> Self {
        let matcher = Matcher::new(config.matching.clone());
        Self {
            config,
            store,
            matcher,
            images,
            http,
            username,
        }
    }
}

/// Whether the sender may run admin commands: configured allow-list first,
/// then the platform-native admin flag for group chats. Private chats rely
/// on the allow-list alone.
pub async fn is_operator(bot: &Bot, msg: &Message, ctx: &BotContext) -> bool {
    let Some(user) = msg.from.as_ref() else {
        return false;
    };

    if ctx.config.bot.admin_ids.contains(&user.id.0) {
        return true;
    }

    if msg.chat.is_group() || msg.chat.is_supergroup() {
        match bot.get_chat_member(msg.chat.id, user.id).await {
            Ok(member) => return member.is_privileged(),
            Err(e) => {
                warn!(chat_id = %msg.chat.id, user_id = %user.id, error = %e, "Chat member lookup failed");
                return false;
            }
        }
    }

    false
}
