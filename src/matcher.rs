//! # Keyword Matcher
//!
//! Selects at most one entry and one of its reply variants for an inbound
//! message. Two matching styles share the same entry model:
//!
//! - **Auto-detect**: continuous listening over any message content;
//!   substring containment for literals, search semantics for regex
//!   entries, with a per-session cooldown between triggers.
//! - **Command-triggered**: fires only on explicit command invocations and
//!   compares the first whitespace-delimited token with full-match
//!   semantics; no cooldown.
//!
//! Precedence is first-match-wins in stored order, never best-match.
//! Compiled patterns are cached; the cache is keyed by pattern text and
//! case mode and does not affect precedence.

use crate::config::MatchingConfig;
use crate::store::{AccessMode, Entry, ReplyVariant};
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Where an inbound message came from, as far as matching is concerned
#[derive(Debug, Clone)]
pub struct MatchContext {
    /// Group chat id, when the message was sent in a group
    pub group_id: Option<String>,
    /// Sender id; the cooldown session key for private chats
    pub sender_id: String,
    /// True when the message was a directed command invocation
    /// (wake prefix or at-mention)
    pub is_command_invocation: bool,
}

impl MatchContext {
    /// Cooldown sessions are keyed by group id, falling back to sender id
    /// for private chats
    fn session_key(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.sender_id)
    }
}

/// Keyword matcher with per-session cooldown state
pub struct Matcher {
    config: MatchingConfig,
    last_triggered: Mutex<HashMap<String, Instant>>,
    regex_cache: Mutex<HashMap<(String, bool), Option<Regex>>>,
}

impl Matcher {
    /// Create a matcher with the given matching configuration
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            config,
            last_triggered: Mutex::new(HashMap::new()),
            regex_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Auto-detect matching over any message content.
    ///
    /// Returns the first enabled entry (in stored order) whose pattern
    /// matches, whose access rules admit the context and whose session is
    /// not cooling down, together with one reply variant chosen uniformly
    /// at random. Returns `None` for directed command invocations so the
    /// command-triggered path cannot be double-handled.
    pub fn match_auto(
        &self,
        text: &str,
        ctx: &MatchContext,
        entries: &[Entry],
    ) -> Option<(Entry, ReplyVariant)> {
        self.match_auto_at(text, ctx, entries, Instant::now())
    }

    /// Auto-detect matching with an explicit clock, for tests
    pub fn match_auto_at(
        &self,
        text: &str,
        ctx: &MatchContext,
        entries: &[Entry],
        now: Instant,
    ) -> Option<(Entry, ReplyVariant)> {
        if ctx.is_command_invocation {
            return None;
        }

        let cooldown = Duration::from_secs(self.config.cooldown_secs);
        let session = ctx.session_key();

        for entry in entries {
            if !entry.enabled || entry.replies.is_empty() {
                continue;
            }
            if !self.evaluate_contains(text, entry) {
                continue;
            }
            if !access_allowed(entry, ctx.group_id.as_deref()) {
                continue;
            }

            // Exact, non-regex matches may bypass the cooldown entirely
            let bypass_cooldown = self.config.ignore_cooldown_on_exact_match
                && !entry.is_regex
                && text == entry.keyword;

            if !bypass_cooldown && !cooldown.is_zero() {
                let last = self.last_triggered.lock().get(session).copied();
                if let Some(last) = last {
                    let elapsed = now.saturating_duration_since(last);
                    if elapsed < cooldown {
                        debug!(
                            session = %session,
                            keyword = %entry.keyword,
                            remaining_secs = (cooldown - elapsed).as_secs(),
                            "Auto-detect trigger cooling down, trying next entry"
                        );
                        continue;
                    }
                }
            }

            if !cooldown.is_zero() && !bypass_cooldown {
                self.last_triggered.lock().insert(session.to_string(), now);
            }

            info!(keyword = %entry.keyword, session = %session, "Auto-detect entry triggered");
            metrics::counter!("keyword_matches_total", "kind" => "auto_detect").increment(1);
            let variant = pick_variant(&entry.replies)?;
            return Some((entry.clone(), variant));
        }
        None
    }

    /// Command-triggered matching.
    ///
    /// Fires only for directed command invocations; the first whitespace
    /// token of the (prefix-stripped) message is compared with full-match
    /// semantics against each entry. Same enable and access checks as
    /// auto-detect, no cooldown.
    pub fn match_command(
        &self,
        text: &str,
        ctx: &MatchContext,
        entries: &[Entry],
    ) -> Option<(Entry, ReplyVariant)> {
        if !ctx.is_command_invocation {
            return None;
        }

        let token = text.split_whitespace().next()?;

        for entry in entries {
            if !entry.enabled || entry.replies.is_empty() {
                continue;
            }
            if !self.evaluate_full(token, entry) {
                continue;
            }
            if !access_allowed(entry, ctx.group_id.as_deref()) {
                continue;
            }

            info!(keyword = %entry.keyword, sender = %ctx.sender_id, "Command entry triggered");
            metrics::counter!("keyword_matches_total", "kind" => "command").increment(1);
            let variant = pick_variant(&entry.replies)?;
            return Some((entry.clone(), variant));
        }
        None
    }

    /// Search-style evaluation: regex search or substring containment
    fn evaluate_contains(&self, text: &str, entry: &Entry) -> bool {
        let case_sensitive = entry.case_sensitive.unwrap_or(self.config.case_sensitive);
        if entry.is_regex {
            match self.compiled(&entry.keyword, case_sensitive) {
                Some(re) => re.is_match(text),
                None => false,
            }
        } else if case_sensitive {
            text.contains(&entry.keyword)
        } else {
            text.to_lowercase().contains(&entry.keyword.to_lowercase())
        }
    }

    /// Full-match evaluation for command tokens
    fn evaluate_full(&self, token: &str, entry: &Entry) -> bool {
        let case_sensitive = entry.case_sensitive.unwrap_or(self.config.case_sensitive);
        if entry.is_regex {
            let anchored = format!("^(?:{})$", entry.keyword);
            match self.compiled(&anchored, case_sensitive) {
                Some(re) => re.is_match(token),
                None => false,
            }
        } else if case_sensitive {
            token == entry.keyword
        } else {
            token.to_lowercase() == entry.keyword.to_lowercase()
        }
    }

    /// Fetch a compiled pattern from the cache, compiling on first use.
    /// A pattern that fails to compile is cached as a miss and logged once.
    fn compiled(&self, pattern: &str, case_sensitive: bool) -> Option<Regex> {
        let key = (pattern.to_string(), case_sensitive);
        let mut cache = self.regex_cache.lock();
        cache
            .entry(key)
            .or_insert_with(|| {
                match RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                {
                    Ok(re) => Some(re),
                    Err(e) => {
                        error!(pattern = %pattern, error = %e, "Stored pattern failed to compile");
                        None
                    }
                }
            })
            .clone()
    }

    /// Drop cooldown state, e.g. after a store reload in tests
    pub fn reset_cooldowns(&self) {
        self.last_triggered.lock().clear();
    }
}

/// Apply an entry's group access rules to the message context.
/// Private chats (no group id) always pass.
fn access_allowed(entry: &Entry, group_id: Option<&str>) -> bool {
    let Some(group_id) = group_id else {
        return true;
    };
    let listed = entry.groups.iter().any(|g| g == group_id);
    match entry.mode {
        AccessMode::Whitelist => listed,
        AccessMode::Blacklist => !listed,
    }
}

/// Pick one reply variant uniformly at random
fn pick_variant(replies: &[ReplyVariant]) -> Option<ReplyVariant> {
    let mut rng = rand::rng();
    replies.choose(&mut rng).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ImageRef;

    fn entry(keyword: &str) -> Entry {
        Entry::new(
            keyword,
            false,
            ReplyVariant {
                text: format!("reply:{}", keyword),
                images: Vec::new(),
            },
        )
    }

    fn regex_entry(pattern: &str) -> Entry {
        let mut e = entry(pattern);
        e.is_regex = true;
        e
    }

    fn group_ctx(group: &str) -> MatchContext {
        MatchContext {
            group_id: Some(group.to_string()),
            sender_id: "u1".to_string(),
            is_command_invocation: false,
        }
    }

    fn private_ctx() -> MatchContext {
        MatchContext {
            group_id: None,
            sender_id: "u1".to_string(),
            is_command_invocation: false,
        }
    }

    fn matcher() -> Matcher {
        Matcher::new(MatchingConfig::default())
    }

    #[test]
    fn test_substring_containment_case_insensitive() {
        let entries = vec![entry("hello")];
        let m = matcher();
        assert!(m.match_auto("well HELLO there", &private_ctx(), &entries).is_some());
        assert!(m.match_auto("goodbye", &private_ctx(), &entries).is_none());
    }

    #[test]
    fn test_case_sensitive_override() {
        let mut e = entry("Hello");
        e.case_sensitive = Some(true);
        let entries = vec![e];
        let m = matcher();
        assert!(m.match_auto("say Hello now", &private_ctx(), &entries).is_some());
        assert!(m.match_auto("say hello now", &private_ctx(), &entries).is_none());
    }

    #[test]
    fn test_regex_search_semantics() {
        let entries = vec![regex_entry(r"\bping\d+\b")];
        let m = matcher();
        assert!(m.match_auto("status ping42 ok", &private_ctx(), &entries).is_some());
        assert!(m.match_auto("pingpong", &private_ctx(), &entries).is_none());
    }

    #[test]
    fn test_invalid_stored_regex_never_matches() {
        let entries = vec![regex_entry("(unclosed")];
        let m = matcher();
        assert!(m.match_auto("(unclosed", &private_ctx(), &entries).is_none());
    }

    #[test]
    fn test_disabled_entry_never_selected() {
        let mut e = entry("hello");
        e.enabled = false;
        let entries = vec![e];
        let m = matcher();
        assert!(m.match_auto("hello", &private_ctx(), &entries).is_none());
        assert!(m.match_auto("hello there", &group_ctx("g1"), &entries).is_none());
    }

    #[test]
    fn test_entry_without_replies_treated_as_absent() {
        let mut e = entry("hello");
        e.replies.clear();
        let entries = vec![e, entry("hello")];
        let m = matcher();
        // The empty entry is skipped; the later entry wins instead.
        let (won, _) = m.match_auto("hello", &private_ctx(), &entries).unwrap();
        assert_eq!(won.replies.len(), 1);
    }

    #[test]
    fn test_whitelist_group_scenario() {
        let mut e = entry("hello");
        e.mode = AccessMode::Whitelist;
        e.groups = vec!["g1".to_string()];
        let entries = vec![e];
        let m = matcher();

        let hit = m.match_auto("hello there", &group_ctx("g1"), &entries);
        assert_eq!(hit.unwrap().1.text, "reply:hello");
        assert!(m.match_auto("hello there", &group_ctx("g2"), &entries).is_none());
    }

    #[test]
    fn test_blacklist_group() {
        let mut e = entry("hello");
        e.mode = AccessMode::Blacklist;
        e.groups = vec!["g1".to_string()];
        let entries = vec![e];
        let m = matcher();
        assert!(m.match_auto("hello", &group_ctx("g1"), &entries).is_none());
        assert!(m.match_auto("hello", &group_ctx("g2"), &entries).is_some());
    }

    #[test]
    fn test_first_match_wins_in_stored_order() {
        let entries = vec![entry("hello"), entry("hell")];
        let m = matcher();
        let (won, _) = m.match_auto("hello", &private_ctx(), &entries).unwrap();
        assert_eq!(won.keyword, "hello");

        let reordered = vec![entry("hell"), entry("hello")];
        let (won, _) = m.match_auto("hello", &private_ctx(), &reordered).unwrap();
        assert_eq!(won.keyword, "hell");
    }

    #[test]
    fn test_command_invocation_skips_auto_detect() {
        let entries = vec![entry("hello")];
        let m = matcher();
        let ctx = MatchContext {
            is_command_invocation: true,
            ..private_ctx()
        };
        assert!(m.match_auto("hello", &ctx, &entries).is_none());
    }

    #[test]
    fn test_cooldown_suppresses_second_trigger() {
        let config = MatchingConfig {
            cooldown_secs: 10,
            ..Default::default()
        };
        let m = Matcher::new(config);
        let entries = vec![entry("hello")];
        let ctx = group_ctx("g");
        let mut e = entries.clone();
        e[0].mode = AccessMode::Blacklist;

        let t0 = Instant::now();
        assert!(m.match_auto_at("well hello there", &ctx, &e, t0).is_some());
        // 3 seconds later, still cooling down
        assert!(m
            .match_auto_at("well hello there", &ctx, &e, t0 + Duration::from_secs(3))
            .is_none());
        // After the window, it fires again
        assert!(m
            .match_auto_at("well hello there", &ctx, &e, t0 + Duration::from_secs(11))
            .is_some());
    }

    #[test]
    fn test_exact_match_bypasses_cooldown() {
        let config = MatchingConfig {
            cooldown_secs: 10,
            ignore_cooldown_on_exact_match: true,
            ..Default::default()
        };
        let m = Matcher::new(config);
        let mut e = entry("hello");
        e.mode = AccessMode::Blacklist;
        let entries = vec![e];
        let ctx = group_ctx("g");

        let t0 = Instant::now();
        // Non-exact substring match arms the cooldown
        assert!(m.match_auto_at("well hello there", &ctx, &entries, t0).is_some());
        // Non-exact match 3s later is suppressed
        assert!(m
            .match_auto_at("well hello there", &ctx, &entries, t0 + Duration::from_secs(3))
            .is_none());
        // Exact literal match still fires
        assert!(m
            .match_auto_at("hello", &ctx, &entries, t0 + Duration::from_secs(3))
            .is_some());
    }

    #[test]
    fn test_exact_bypass_does_not_refresh_cooldown() {
        let config = MatchingConfig {
            cooldown_secs: 10,
            ignore_cooldown_on_exact_match: true,
            ..Default::default()
        };
        let m = Matcher::new(config);
        let mut e = entry("hello");
        e.mode = AccessMode::Blacklist;
        let entries = vec![e];
        let ctx = group_ctx("g");

        let t0 = Instant::now();
        assert!(m.match_auto_at("well hello there", &ctx, &entries, t0).is_some());
        // Bypassing hit at t0+3 must not push the window forward
        assert!(m
            .match_auto_at("hello", &ctx, &entries, t0 + Duration::from_secs(3))
            .is_some());
        // t0+11 is past the original window even though the bypass fired later
        assert!(m
            .match_auto_at("well hello there", &ctx, &entries, t0 + Duration::from_secs(11))
            .is_some());
    }

    #[test]
    fn test_cooldown_sessions_are_independent() {
        let config = MatchingConfig {
            cooldown_secs: 10,
            ..Default::default()
        };
        let m = Matcher::new(config);
        let mut e = entry("hello");
        e.mode = AccessMode::Blacklist;
        let entries = vec![e];

        let t0 = Instant::now();
        assert!(m.match_auto_at("hello there", &group_ctx("g1"), &entries, t0).is_some());
        // A different group is its own session
        assert!(m
            .match_auto_at("hello there", &group_ctx("g2"), &entries, t0 + Duration::from_secs(1))
            .is_some());
    }

    #[test]
    fn test_command_full_match_literal() {
        let entries = vec![entry("menu")];
        let m = matcher();
        let ctx = MatchContext {
            is_command_invocation: true,
            ..private_ctx()
        };
        assert!(m.match_command("menu", &ctx, &entries).is_some());
        assert!(m.match_command("MENU extra args", &ctx, &entries).is_some());
        assert!(m.match_command("menus", &ctx, &entries).is_none());
        // Not a command invocation: never fires
        assert!(m.match_command("menu", &private_ctx(), &entries).is_none());
    }

    #[test]
    fn test_command_full_match_regex() {
        let entries = vec![regex_entry(r"menu\d*")];
        let m = matcher();
        let ctx = MatchContext {
            is_command_invocation: true,
            ..private_ctx()
        };
        assert!(m.match_command("menu12", &ctx, &entries).is_some());
        // Search would match, full match must not
        assert!(m.match_command("xmenu12x", &ctx, &entries).is_none());
    }

    #[test]
    fn test_variant_has_image_payload() {
        let mut e = entry("pic");
        e.replies = vec![ReplyVariant {
            text: String::new(),
            images: vec![ImageRef::Remote {
                url: "https://example.com/a.png".to_string(),
            }],
        }];
        let m = matcher();
        let (_, variant) = m.match_auto("pic", &private_ctx(), &[e]).unwrap();
        assert_eq!(variant.images.len(), 1);
    }
}
