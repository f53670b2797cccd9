//! # Input Validation
//!
//! Creation-time validation for user-supplied keyword patterns, reply
//! content and group identifiers. All checks reject before any store
//! mutation happens.
//!
//! ## Pattern safety
//!
//! User-supplied regular expressions are screened with a syntactic
//! denylist (dangerous group openers, doubled quantifiers, quantified
//! groups that contain their own quantifier, sequenced brace
//! quantifiers) plus a hard length cap. This is a best-effort ReDoS
//! mitigation heuristic, not a proof of linear-time matching.

use crate::errors::{AppError, AppResult};
use crate::store::ReplyVariant;
use lazy_static::lazy_static;
use regex::Regex;

/// Maximum accepted pattern length in characters
pub const MAX_PATTERN_LENGTH: usize = 100;

/// Minimum admin password length accepted by the console
pub const MIN_PASSWORD_LENGTH: usize = 6;

lazy_static! {
    /// Textual shapes a user-supplied pattern may not contain
    static ref DANGEROUS_PATTERNS: Vec<Regex> = vec![
        // Non-capturing / lookahead / lookbehind group openers
        Regex::new(r"\(\?:").unwrap(),
        Regex::new(r"\(\?!").unwrap(),
        Regex::new(r"\(\?<").unwrap(),
        // Doubled quantifiers
        Regex::new(r"\*\+").unwrap(),
        Regex::new(r"\+\*").unwrap(),
        Regex::new(r"\*\*").unwrap(),
        Regex::new(r"\+\+").unwrap(),
        // A quantifier applied to a group containing its own quantifier/brace
        Regex::new(r"\([^()]*[+*{][^()]*\)\s*\+").unwrap(),
        // Two brace-quantifiers in sequence
        Regex::new(r"\{[^{}]*\}[^{}]*\{[^{}]*\}").unwrap(),
    ];
}

/// Check a user-supplied regex pattern before it is stored.
///
/// Rejects patterns longer than [`MAX_PATTERN_LENGTH`], patterns matching
/// the denylist, and patterns that do not compile.
pub fn check_pattern_safety(pattern: &str) -> AppResult<()> {
    if pattern.chars().count() > MAX_PATTERN_LENGTH {
        return Err(AppError::Validation(format!(
            "Pattern is longer than {} characters",
            MAX_PATTERN_LENGTH
        )));
    }

    for dangerous in DANGEROUS_PATTERNS.iter() {
        if dangerous.is_match(pattern) {
            return Err(AppError::Validation(
                "Pattern contains constructs with pathological matching behavior; please simplify it"
                    .to_string(),
            ));
        }
    }

    Regex::new(pattern)?;
    Ok(())
}

/// Reject reply variants that carry nothing to send
pub fn validate_reply(variant: &ReplyVariant) -> AppResult<()> {
    if variant.is_empty() {
        return Err(AppError::Validation(
            "Reply content cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Group identifiers are numeric chat ids
pub fn validate_group_id(group_id: &str) -> AppResult<()> {
    if group_id.is_empty() || !group_id.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return Err(AppError::Validation(format!(
            "Invalid group id: {}",
            group_id
        )));
    }
    Ok(())
}
