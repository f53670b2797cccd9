//! # Admin Chat Commands
//!
//! Textual command surface for managing the two entry collections from
//! chat. Both collections share one implementation: `/kw_*` commands work
//! on the command-triggered collection, `/dt_*` on auto-detect.
//!
//! Mutating commands require operator authorization (platform admin flag
//! or the configured allow-list). Validation failures answer with a usage
//! message and mutate nothing.

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::reply::build_reply;
use crate::selector::resolve_selector;
use crate::store::{AccessMode, Entry, EntryKind, ImageRef, ReplyVariant};
use crate::validation::{check_pattern_safety, validate_group_id, validate_reply};

use super::message_handler::send_outbound;
use super::{is_operator, BotContext};

/// Management operations shared by both collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdminOp {
    Add,
    Edit,
    Delete,
    Enable,
    Disable,
    List,
    View,
    AddReply,
    EditReply,
    DeleteReply,
}

/// Map a leading token like `/dt_add` (optionally `@botname`-suffixed) to
/// its collection and operation
fn parse_command(token: &str, username: &str) -> Option<(EntryKind, AdminOp)> {
    let mention = format!("@{}", username);
    let token = token.strip_suffix(mention.as_str()).unwrap_or(token);

    let (kind, op_name) = if let Some(rest) = token.strip_prefix("/kw_") {
        (EntryKind::CommandTriggered, rest)
    } else if let Some(rest) = token.strip_prefix("/dt_") {
        (EntryKind::AutoDetect, rest)
    } else {
        return None;
    };

    let op = match op_name {
        "add" => AdminOp::Add,
        "edit" => AdminOp::Edit,
        "del" => AdminOp::Delete,
        "enable" => AdminOp::Enable,
        "disable" => AdminOp::Disable,
        "list" => AdminOp::List,
        "view" => AdminOp::View,
        "add_reply" => AdminOp::AddReply,
        "edit_reply" => AdminOp::EditReply,
        "del_reply" => AdminOp::DeleteReply,
        _ => return None,
    };
    Some((kind, op))
}

/// Dispatch a management command. Returns `Ok(false)` when the text is not
/// a management command at all, `Ok(true)` once it has been handled
/// (successfully or with an error reply).
pub async fn try_handle(bot: &Bot, msg: &Message, text: &str, ctx: &Arc<BotContext>) -> Result<bool> {
    let Some(first) = text.split_whitespace().next() else {
        return Ok(false);
    };
    let Some((kind, op)) = parse_command(first, &ctx.username) else {
        return Ok(false);
    };
    let args = text[first.len()..].trim();

    // Listing and viewing are open; everything else is operator-only
    let mutating = !matches!(op, AdminOp::List | AdminOp::View);
    if mutating && !is_operator(bot, msg, ctx).await {
        reply(bot, msg, "Permission denied.").await?;
        return Ok(true);
    }

    let outcome = match op {
        AdminOp::Add => add_entry(bot, msg, ctx, kind, args).await,
        AdminOp::Edit => edit_entry(ctx, kind, args),
        AdminOp::Delete => delete_entries(ctx, kind, args),
        AdminOp::Enable => toggle_entries(msg, ctx, kind, args, true),
        AdminOp::Disable => toggle_entries(msg, ctx, kind, args, false),
        AdminOp::List => list_entries(ctx, kind),
        AdminOp::View => {
            view_entry(bot, msg, ctx, kind, args).await?;
            return Ok(true);
        }
        AdminOp::AddReply => add_reply(bot, msg, ctx, kind, args).await,
        AdminOp::EditReply => edit_reply(bot, msg, ctx, kind, args).await,
        AdminOp::DeleteReply => delete_reply(ctx, kind, args),
    };

    match outcome {
        Ok(response) => reply(bot, msg, &response).await?,
        Err(e) => reply(bot, msg, &user_message(&e)).await?,
    }
    Ok(true)
}

/// Turn an [`AppError`] into the chat-facing error line
fn user_message(error: &AppError) -> String {
    match error {
        AppError::Validation(msg) | AppError::NotFound(msg) => msg.clone(),
        other => format!("Operation failed: {}", other),
    }
}

async fn reply(bot: &Bot, msg: &Message, text: &str) -> Result<()> {
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Group id of the chat, when it is a group chat
fn chat_group_id(msg: &Message) -> Option<String> {
    (msg.chat.is_group() || msg.chat.is_supergroup()).then(|| msg.chat.id.0.to_string())
}

/// Split a leading `-r` flag off the argument text
fn split_regex_flag(args: &str) -> (bool, &str) {
    match args.strip_prefix("-r") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
            (true, rest.trim_start())
        }
        _ => (false, args),
    }
}

/// Download an attached photo (largest size) into the image store and
/// return its reference
async fn collect_images(bot: &Bot, msg: &Message, ctx: &BotContext) -> AppResult<Vec<ImageRef>> {
    let Some(photos) = msg.photo() else {
        return Ok(Vec::new());
    };
    let Some(largest) = photos.last() else {
        return Ok(Vec::new());
    };
    let path = download_photo(bot, ctx, &largest.file.id).await?;
    Ok(vec![ImageRef::Local { path }])
}

async fn download_photo(bot: &Bot, ctx: &BotContext, file_id: &FileId) -> AppResult<String> {
    let file = bot
        .get_file(file_id.clone())
        .await
        .map_err(|e| AppError::Network(format!("File lookup failed: {}", e)))?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file.path
    );
    let response = ctx.http.get(&url).send().await?;
    let bytes = response.bytes().await?;
    // Telegram serves photos as JPEG
    ctx.images.store_bytes("photo.jpg", &bytes)
}

async fn add_entry(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    kind: EntryKind,
    args: &str,
) -> AppResult<String> {
    let label = kind.label();
    let (is_regex, rest) = split_regex_flag(args);
    if rest.is_empty() {
        return Err(AppError::Validation(format!(
            "Usage: /{}_add [-r] <keyword> <reply content>",
            prefix(kind)
        )));
    }

    let (keyword, remaining) = match rest.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim_start()),
        None => (rest, ""),
    };

    if is_regex {
        check_pattern_safety(keyword)?;
    }

    let images = collect_images(bot, msg, ctx).await?;
    let variant = ReplyVariant {
        text: remaining.to_string(),
        images,
    };
    validate_reply(&variant)?;

    let group_id = chat_group_id(msg);
    let mut store = ctx.store.write();
    let status = match store.find_by_keyword(kind, keyword) {
        Some(idx) => {
            let entry = &mut store.entries_mut(kind)[idx];
            entry.replies.push(variant);
            entry.is_regex = is_regex;
            format!(
                "Added a reply to existing {} '{}' ({} replies now).",
                label,
                keyword,
                entry.replies.len()
            )
        }
        None => {
            let mut entry = Entry::new(keyword, is_regex, variant);
            let status = match &group_id {
                Some(gid) => {
                    entry.groups = vec![gid.clone()];
                    format!("Added {} '{}', enabled in this group.", label, keyword)
                }
                None => {
                    entry.enabled = false;
                    format!(
                        "Added {} '{}'. Created outside a group chat, so it starts disabled.",
                        label, keyword
                    )
                }
            };
            store.add_entry(kind, entry);
            status
        }
    };
    store.save();
    info!(kind = label, keyword = %keyword, "Entry added from chat");
    Ok(status)
}

fn edit_entry(ctx: &BotContext, kind: EntryKind, args: &str) -> AppResult<String> {
    let (is_regex, rest) = split_regex_flag(args);
    let mut parts = rest.split_whitespace();
    let (Some(selector), Some(new_keyword)) = (parts.next(), parts.next()) else {
        return Err(AppError::Validation(format!(
            "Usage: /{}_edit [-r] <index or keyword> <new keyword>",
            prefix(kind)
        )));
    };

    if is_regex {
        check_pattern_safety(new_keyword)?;
    }

    let mut store = ctx.store.write();
    let indices = resolve_selector(selector, store.entries(kind));
    let Some(&idx) = indices.first() else {
        return Err(AppError::NotFound(format!(
            "No {} matches '{}'.",
            kind.label(),
            selector
        )));
    };

    let entry = &mut store.entries_mut(kind)[idx];
    let old_keyword = std::mem::replace(&mut entry.keyword, new_keyword.to_string());
    entry.is_regex = is_regex;
    store.save();
    info!(kind = kind.label(), old = %old_keyword, new = %new_keyword, "Entry edited from chat");
    Ok(format!(
        "Updated {} '{}' to '{}'.",
        kind.label(),
        old_keyword,
        new_keyword
    ))
}

fn delete_entries(ctx: &BotContext, kind: EntryKind, args: &str) -> AppResult<String> {
    if args.is_empty() {
        return Err(AppError::Validation(format!(
            "Usage: /{}_del <index, range or keyword>",
            prefix(kind)
        )));
    }

    let mut store = ctx.store.write();
    let mut indices = resolve_selector(args, store.entries(kind));
    if indices.is_empty() {
        return Err(AppError::NotFound(format!(
            "No {} matches '{}'.",
            kind.label(),
            args
        )));
    }

    // Delete back-to-front so earlier indices stay valid
    indices.sort_unstable_by(|a, b| b.cmp(a));
    let mut deleted = Vec::new();
    for idx in indices {
        if let Some(entry) = store.remove_entry(kind, idx) {
            deleted.push(entry.keyword);
        }
    }
    deleted.reverse();
    store.save();
    info!(kind = kind.label(), keywords = ?deleted, "Entries deleted from chat");
    Ok(format!("Deleted {}: {}.", kind.label(), deleted.join(", ")))
}

fn toggle_entries(
    msg: &Message,
    ctx: &BotContext,
    kind: EntryKind,
    args: &str,
    enable: bool,
) -> AppResult<String> {
    let verb = if enable { "enable" } else { "disable" };
    let mut parts = args.split_whitespace();
    let Some(selector) = parts.next() else {
        return Err(AppError::Validation(format!(
            "Usage: /{}_{} <index or keyword> [global | group id...]",
            prefix(kind),
            verb
        )));
    };
    let group_args: Vec<&str> = parts.collect();
    for gid in &group_args {
        if *gid != "global" {
            validate_group_id(gid)?;
        }
    }

    let current_group = chat_group_id(msg);
    let mut store = ctx.store.write();
    let indices = resolve_selector(selector, store.entries(kind));
    if indices.is_empty() {
        return Err(AppError::NotFound(format!(
            "No {} matches '{}'.",
            kind.label(),
            selector
        )));
    }

    let mut lines = Vec::new();
    for &idx in &indices {
        let entry = &mut store.entries_mut(kind)[idx];
        let scope = apply_toggle(entry, enable, &group_args, current_group.as_deref())?;
        lines.push(format!("{} '{}' {}d {}.", capitalize(kind.label()), entry.keyword, verb, scope));
    }
    store.save();
    info!(kind = kind.label(), selector = %selector, enable, "Entry scope changed from chat");
    Ok(lines.join("\n"))
}

/// Apply one enable/disable operation to an entry, returning a
/// human-readable scope description.
fn apply_toggle(
    entry: &mut Entry,
    enable: bool,
    group_args: &[&str],
    current_group: Option<&str>,
) -> AppResult<String> {
    if enable {
        match group_args {
            [] => match current_group {
                Some(gid) => {
                    // In a blacklist, enabling here means removing the ban;
                    // in a whitelist it means listing the group.
                    if entry.mode == AccessMode::Blacklist {
                        entry.groups.retain(|g| g != gid);
                    } else if !entry.groups.iter().any(|g| g == gid) {
                        entry.groups.push(gid.to_string());
                    }
                    entry.enabled = true;
                    Ok(format!("in this group ({})", gid))
                }
                None => Err(AppError::Validation(
                    "Not in a group chat; pass group ids or 'global'.".to_string(),
                )),
            },
            ["global"] => {
                entry.enabled = true;
                entry.mode = AccessMode::Blacklist;
                entry.groups.clear();
                Ok("globally (all groups)".to_string())
            }
            gids => {
                if entry.mode != AccessMode::Whitelist {
                    entry.mode = AccessMode::Whitelist;
                    entry.groups.clear();
                }
                for gid in gids {
                    if !entry.groups.iter().any(|g| g == gid) {
                        entry.groups.push(gid.to_string());
                    }
                }
                entry.enabled = true;
                Ok(format!("in groups {}", gids.join(", ")))
            }
        }
    } else {
        match group_args {
            [] => match current_group {
                Some(gid) => {
                    if entry.mode != AccessMode::Blacklist {
                        entry.mode = AccessMode::Blacklist;
                        entry.groups.clear();
                    }
                    if !entry.groups.iter().any(|g| g == gid) {
                        entry.groups.push(gid.to_string());
                    }
                    entry.enabled = true;
                    Ok(format!("in this group ({})", gid))
                }
                None => {
                    entry.enabled = false;
                    Ok("globally".to_string())
                }
            },
            ["global"] => {
                entry.enabled = false;
                Ok("globally".to_string())
            }
            gids => {
                if entry.mode != AccessMode::Blacklist {
                    entry.mode = AccessMode::Blacklist;
                    entry.groups.clear();
                }
                for gid in gids {
                    if !entry.groups.iter().any(|g| g == gid) {
                        entry.groups.push(gid.to_string());
                    }
                }
                entry.enabled = true;
                Ok(format!("in groups {}", gids.join(", ")))
            }
        }
    }
}

fn entry_state_line(entry: &Entry) -> String {
    if !entry.enabled {
        return "[disabled]".to_string();
    }
    match (entry.mode, entry.groups.is_empty()) {
        (AccessMode::Blacklist, true) => "[enabled everywhere]".to_string(),
        (AccessMode::Blacklist, false) => format!("[blacklist: {}]", entry.groups.join(",")),
        (AccessMode::Whitelist, true) => "[no groups enabled]".to_string(),
        (AccessMode::Whitelist, false) => format!("[whitelist: {}]", entry.groups.join(",")),
    }
}

fn list_entries(ctx: &BotContext, kind: EntryKind) -> AppResult<String> {
    let store = ctx.store.read();
    let entries = store.entries(kind);
    let mut out = format!("{} list:\n", capitalize(kind.label()));
    if entries.is_empty() {
        out.push_str("(none)\n");
    }
    for (i, entry) in entries.iter().enumerate() {
        let regex_tag = if entry.is_regex { " [regex]" } else { "" };
        out.push_str(&format!(
            "{}. {}{} {}\n",
            i + 1,
            entry.keyword,
            regex_tag,
            entry_state_line(entry)
        ));
        for (j, variant) in entry.replies.iter().enumerate() {
            let image_tags = "[image]".repeat(variant.images.len());
            let mut content = format!("{}{}", variant.text, image_tags);
            if content.chars().count() > 50 {
                content = format!("{}...", content.chars().take(50).collect::<String>());
            }
            out.push_str(&format!("  - {}. {}\n", j + 1, content.replace('\n', " ")));
        }
    }
    Ok(out.trim_end().to_string())
}

async fn view_entry(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    kind: EntryKind,
    args: &str,
) -> Result<()> {
    let mut parts = args.split_whitespace();
    let Some(selector) = parts.next() else {
        reply(
            bot,
            msg,
            &format!("Usage: /{}_view <index or keyword> [reply index]", prefix(kind)),
        )
        .await?;
        return Ok(());
    };
    let reply_idx: Option<usize> = parts.next().and_then(|p| p.parse::<usize>().ok());

    let found = {
        let store = ctx.store.read();
        let indices = resolve_selector(selector, store.entries(kind));
        indices
            .first()
            .map(|&idx| (idx, store.entries(kind)[idx].clone()))
    };
    let Some((idx, entry)) = found else {
        reply(
            bot,
            msg,
            &format!("No {} matches '{}'.", kind.label(), selector),
        )
        .await?;
        return Ok(());
    };

    match reply_idx {
        Some(n) => {
            let Some(variant) = n.checked_sub(1).and_then(|i| entry.replies.get(i)) else {
                reply(bot, msg, "Invalid reply index.").await?;
                return Ok(());
            };
            reply(
                bot,
                msg,
                &format!("Reply {} of {} '{}':", n, kind.label(), entry.keyword),
            )
            .await?;
            match build_reply(variant, &ctx.images, false) {
                Some(outbound) => send_outbound(bot, msg, &outbound).await?,
                None => reply(bot, msg, "(reply content is empty)").await?,
            }
        }
        None => {
            let mut out = format!(
                "[{}] {}: {}\nType: {}\nState: {}\nReplies: {}\n",
                idx + 1,
                capitalize(kind.label()),
                entry.keyword,
                if entry.is_regex { "regex match" } else { "literal match" },
                entry_state_line(&entry),
                entry.replies.len()
            );
            for (j, variant) in entry.replies.iter().enumerate() {
                let image_tag = if variant.images.is_empty() { "" } else { " [image]" };
                let mut text = variant.text.replace('\n', " ");
                if text.chars().count() > 30 {
                    text = format!("{}...", text.chars().take(30).collect::<String>());
                }
                out.push_str(&format!("{}. {}{}\n", j + 1, text, image_tag));
            }
            out.push_str(&format!(
                "\nUse /{}_view {} <reply index> for the full content.",
                prefix(kind),
                idx + 1
            ));
            reply(bot, msg, out.trim_end()).await?;
        }
    }
    Ok(())
}

async fn add_reply(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    kind: EntryKind,
    args: &str,
) -> AppResult<String> {
    let (selector, content) = match args.split_once(char::is_whitespace) {
        Some((s, c)) => (s, c.trim_start()),
        None if !args.is_empty() => (args, ""),
        None => {
            return Err(AppError::Validation(format!(
                "Usage: /{}_add_reply <index or keyword> <reply content>",
                prefix(kind)
            )))
        }
    };

    let images = collect_images(bot, msg, ctx).await?;
    let variant = ReplyVariant {
        text: content.to_string(),
        images,
    };
    validate_reply(&variant)?;

    let mut store = ctx.store.write();
    let indices = resolve_selector(selector, store.entries(kind));
    let Some(&idx) = indices.first() else {
        return Err(AppError::NotFound(format!(
            "No {} matches '{}'.",
            kind.label(),
            selector
        )));
    };

    let entry = &mut store.entries_mut(kind)[idx];
    entry.replies.push(variant);
    let keyword = entry.keyword.clone();
    let count = entry.replies.len();
    store.save();
    Ok(format!(
        "Added a reply to {} '{}' ({} replies now).",
        kind.label(),
        keyword,
        count
    ))
}

async fn edit_reply(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    kind: EntryKind,
    args: &str,
) -> AppResult<String> {
    let usage = || {
        AppError::Validation(format!(
            "Usage: /{}_edit_reply <index or keyword> [reply index] <new content>",
            prefix(kind)
        ))
    };
    let (selector, rest) = args.split_once(char::is_whitespace).ok_or_else(usage)?;
    let rest = rest.trim_start();

    let images = collect_images(bot, msg, ctx).await?;

    let mut store = ctx.store.write();
    let indices = resolve_selector(selector, store.entries(kind));
    let Some(&idx) = indices.first() else {
        return Err(AppError::NotFound(format!(
            "No {} matches '{}'.",
            kind.label(),
            selector
        )));
    };

    let entry = &mut store.entries_mut(kind)[idx];
    // With several replies the index is mandatory; a single reply may be
    // edited without one.
    let (reply_idx, content) = if entry.replies.len() == 1 {
        match rest.split_once(char::is_whitespace) {
            Some((first, tail)) if first == "1" => (0, tail.trim_start()),
            _ => (0, rest),
        }
    } else {
        let (idx_str, tail) = rest
            .split_once(char::is_whitespace)
            .map(|(i, t)| (i, t.trim_start()))
            .unwrap_or((rest, ""));
        let n: usize = idx_str
            .parse()
            .map_err(|_| AppError::Validation("Reply index must be a number.".to_string()))?;
        if n == 0 || n > entry.replies.len() {
            return Err(AppError::Validation(format!(
                "Invalid reply index; expected 1-{}.",
                entry.replies.len()
            )));
        }
        (n - 1, tail)
    };

    let variant = ReplyVariant {
        text: content.to_string(),
        images,
    };
    validate_reply(&variant)?;

    entry.replies[reply_idx] = variant;
    let keyword = entry.keyword.clone();
    store.save();
    Ok(format!(
        "Updated reply {} of {} '{}'.",
        reply_idx + 1,
        kind.label(),
        keyword
    ))
}

fn delete_reply(ctx: &BotContext, kind: EntryKind, args: &str) -> AppResult<String> {
    let mut parts = args.split_whitespace();
    let Some(selector) = parts.next() else {
        return Err(AppError::Validation(format!(
            "Usage: /{}_del_reply <index or keyword> [reply index]",
            prefix(kind)
        )));
    };

    let mut store = ctx.store.write();
    let indices = resolve_selector(selector, store.entries(kind));
    let Some(&idx) = indices.first() else {
        return Err(AppError::NotFound(format!(
            "No {} matches '{}'.",
            kind.label(),
            selector
        )));
    };

    let entry = &mut store.entries_mut(kind)[idx];
    let reply_idx = match parts.next() {
        Some(n) => n
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .ok_or_else(|| AppError::Validation("Reply index must be a number.".to_string()))?,
        None if entry.replies.len() == 1 => 0,
        None => {
            return Err(AppError::Validation(format!(
                "This {} has {} replies; pass the reply index to delete.",
                kind.label(),
                entry.replies.len()
            )))
        }
    };
    if reply_idx >= entry.replies.len() {
        return Err(AppError::Validation("Invalid reply index.".to_string()));
    }

    entry.replies.remove(reply_idx);
    let keyword = entry.keyword.clone();
    let now_empty = entry.replies.is_empty();
    if now_empty {
        // An entry without replies never fires; drop it entirely
        store.remove_entry(kind, idx);
    }
    store.save();
    info!(kind = kind.label(), keyword = %keyword, reply_idx, "Reply deleted from chat");
    Ok(if now_empty {
        format!(
            "Deleted the last reply of {} '{}'; the entry was removed.",
            kind.label(),
            keyword
        )
    } else {
        format!("Deleted reply {} of {} '{}'.", reply_idx + 1, kind.label(), keyword)
    })
}

/// Command prefix for a collection (`kw` or `dt`)
fn prefix(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::CommandTriggered => "kw",
        EntryKind::AutoDetect => "dt",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
