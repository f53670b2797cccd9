//! # Entry Selector Resolution
//!
//! Every chat-side edit/delete/toggle/view operation addresses entries
//! through one selector string. Resolution is dual-mode: the selector is
//! first parsed as a comma-separated list of 1-based indices and inclusive
//! `a-b` ranges; when that parse fails or yields nothing in bounds, it
//! falls back to exact-string comparison against every entry keyword.

use crate::store::Entry;

/// Resolve a selector string to 0-based entry indices.
///
/// `"2"` → `[1]`; `"1,3"` → `[0, 2]`; `"2-4"` → `[1, 2, 3]`. Out-of-bounds
/// indices are dropped. A selector that is not a usable index list is
/// matched literally against entry keywords instead, returning every
/// position whose keyword equals it exactly.
pub fn resolve_selector(selector: &str, entries: &[Entry]) -> Vec<usize> {
    if entries.is_empty() {
        return Vec::new();
    }

    if let Some(indices) = parse_index_list(selector) {
        let in_bounds: Vec<usize> = indices.into_iter().filter(|&i| i < entries.len()).collect();
        if !in_bounds.is_empty() {
            return in_bounds;
        }
    }

    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.keyword == selector)
        .map(|(i, _)| i)
        .collect()
}

/// Parse `"1,3-5,8"` into 0-based indices; `None` when any part is not a
/// number or range of numbers.
fn parse_index_list(selector: &str) -> Option<Vec<usize>> {
    let mut indices = Vec::new();
    for part in selector.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.trim().parse().ok()?;
            let end: usize = end.trim().parse().ok()?;
            if start == 0 || end < start {
                return None;
            }
            indices.extend(start - 1..end);
        } else {
            let idx: usize = part.parse().ok()?;
            if idx == 0 {
                return None;
            }
            indices.push(idx - 1);
        }
    }
    Some(indices)
}
