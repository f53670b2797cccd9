//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ReplyParameters};
use tracing::{debug, warn};

use crate::matcher::MatchContext;
use crate::observability;
use crate::reply::{build_reply, Attachment, OutboundMessage};
use crate::store::EntryKind;

use super::{commands, BotContext};

/// Handle one inbound Telegram message.
///
/// Management commands are dispatched first and never reach the matcher.
/// A message carrying the wake prefix (or a leading at-mention of the bot)
/// is treated as a command invocation and matched against the
/// command-triggered collection; everything else runs through auto-detect.
pub async fn message_handler(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }

    debug!(chat_id = %msg.chat.id, message_length = text.len(), "Received message");

    // Admin command surface takes precedence over any matching
    if commands::try_handle(&bot, &msg, text, &ctx).await? {
        observability::record_chat_message("admin_command");
        return Ok(());
    }

    let group_id = (msg.chat.is_group() || msg.chat.is_supergroup())
        .then(|| msg.chat.id.0.to_string());
    let sender_id = msg
        .from
        .as_ref()
        .map(|u| u.id.0.to_string())
        .unwrap_or_else(|| msg.chat.id.0.to_string());

    let (invocation_text, is_command_invocation) = strip_invocation(text, &ctx);
    let match_ctx = MatchContext {
        group_id,
        sender_id,
        is_command_invocation,
    };

    let hit = {
        let store = ctx.store.read();
        ctx.matcher
            .match_command(
                invocation_text,
                &match_ctx,
                store.entries(EntryKind::CommandTriggered),
            )
            .map(|hit| (hit, false))
            .or_else(|| {
                ctx.matcher
                    .match_auto(invocation_text, &match_ctx, store.entries(EntryKind::AutoDetect))
                    .map(|hit| (hit, true))
            })
    };

    let Some(((entry, variant), from_auto_detect)) = hit else {
        observability::record_chat_message("no_match");
        return Ok(());
    };

    // Auto-detect replies quote the trigger when configured
    let quote = from_auto_detect && ctx.config.bot.quote_replies;
    match build_reply(&variant, &ctx.images, quote) {
        Some(outbound) => {
            observability::record_chat_message("matched");
            send_outbound(&bot, &msg, &outbound).await?;
        }
        None => {
            warn!(keyword = %entry.keyword, "Matched reply assembled to nothing");
            observability::record_chat_message("empty_reply");
        }
    }
    Ok(())
}

/// Detect a command invocation and strip its prefix.
///
/// Recognized forms: the configured wake prefix (`!menu`) and a leading
/// at-mention (`@botname menu`). Everything else is passed through
/// unchanged for auto-detect matching.
fn strip_invocation<'a>(text: &'a str, ctx: &BotContext) -> (&'a str, bool) {
    if let Some(stripped) = text.strip_prefix(&ctx.config.bot.wake_prefix) {
        let stripped = stripped.trim_start();
        if !stripped.is_empty() {
            return (stripped, true);
        }
    }
    let mention = format!("@{}", ctx.username);
    if let Some(stripped) = text.strip_prefix(&mention) {
        let stripped = stripped.trim_start();
        if !stripped.is_empty() {
            return (stripped, true);
        }
    }
    (text, false)
}

/// Send an assembled reply: text first, then each image attachment
pub async fn send_outbound(bot: &Bot, msg: &Message, outbound: &OutboundMessage) -> Result<()> {
    if let Some(text) = &outbound.text {
        let mut request = bot.send_message(msg.chat.id, text);
        if outbound.quote {
            request = request.reply_parameters(ReplyParameters::new(msg.id));
        }
        request.await?;
    }

    for attachment in &outbound.attachments {
        let input = match attachment {
            Attachment::File(path) => InputFile::file(path.clone()),
            Attachment::Url(url) => match reqwest::Url::parse(url) {
                Ok(parsed) => InputFile::url(parsed),
                Err(e) => {
                    warn!(url = %url, error = %e, "Skipping unparseable image URL");
                    continue;
                }
            },
        };
        let mut request = bot.send_photo(msg.chat.id, input);
        if outbound.quote && outbound.text.is_none() {
            request = request.reply_parameters(ReplyParameters::new(msg.id));
        }
        request.await?;
    }
    Ok(())
}
