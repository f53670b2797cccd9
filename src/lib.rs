//! # Keywords Reply Bot
//!
//! A Telegram bot that replies to configured keywords and patterns with
//! stored text and image content, managed from chat commands or a small
//! built-in HTTP admin console.

pub mod bot;
pub mod config;
pub mod errors;
pub mod images;
pub mod matcher;
pub mod observability;
pub mod reply;
pub mod selector;
pub mod store;
pub mod validation;
pub mod web;

// Re-export types for easier access
pub use matcher::{MatchContext, Matcher};
pub use store::{AccessMode, Entry, EntryKind, EntryStore, ImageRef, ReplyVariant, SharedStore};
