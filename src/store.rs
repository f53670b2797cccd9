//! # Entry Store
//!
//! In-memory representation of the two keyword collections, persisted as a
//! single pretty-printed JSON document. The store is loaded once at startup,
//! mutated by admin operations (chat commands or the web console) and
//! rewritten in full after every mutation.
//!
//! Loading and saving fail soft: a missing or corrupt file yields an empty
//! store, a failed write keeps the in-memory state and logs the error.
//! Concurrent mutators are serialized only by the surrounding `RwLock`;
//! at the file level the semantics are last-write-wins.

use crate::errors::error_logging;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Which of the two stored collections an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Matched only on explicit command invocations (full match)
    CommandTriggered,
    /// Matched passively against any message content (contains/regex search)
    AutoDetect,
}

impl EntryKind {
    /// Human-readable name used in chat responses and logs
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::CommandTriggered => "keyword",
            EntryKind::AutoDetect => "detect word",
        }
    }
}

/// Group access interpretation for an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// `groups` lists the chats the entry is active in
    #[default]
    Whitelist,
    /// `groups` lists the chats the entry is suppressed in
    Blacklist,
}

/// One image a reply variant may attach, either stored locally under the
/// image directory or referenced by URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    /// Filename relative to the image directory
    Local { path: String },
    /// Remote image reference
    Remote { url: String },
}

/// One concrete payload a matched entry may emit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyVariant {
    /// Reply text; may be empty when images are present
    #[serde(default)]
    pub text: String,
    /// Attached images, sent after the text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
}

impl ReplyVariant {
    /// A variant with neither text nor images carries nothing to send
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.images.is_empty()
    }
}

fn default_true() -> bool {
    true
}

/// A stored keyword/pattern plus its reply variants and access rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// The literal keyword or regex pattern to match
    pub keyword: String,
    /// When true, `keyword` is compiled as a regular expression
    #[serde(default)]
    pub is_regex: bool,
    /// Per-entry case sensitivity; `None` falls back to the global default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    /// Whether the entry fires at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How `groups` is interpreted
    #[serde(default)]
    pub mode: AccessMode,
    /// Group identifiers governed by `mode`
    #[serde(default)]
    pub groups: Vec<String>,
    /// Reply variants; one is chosen at random on trigger
    #[serde(default)]
    pub replies: Vec<ReplyVariant>,
}

impl Entry {
    /// Create an entry with a single reply variant and default access rules
    pub fn new(keyword: impl Into<String>, is_regex: bool, reply: ReplyVariant) -> Self {
        Self {
            keyword: keyword.into(),
            is_regex,
            case_sensitive: None,
            enabled: true,
            mode: AccessMode::Whitelist,
            groups: Vec::new(),
            replies: vec![reply],
        }
    }
}

/// The persisted document: two ordered collections of entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub command_triggered: Vec<Entry>,
    #[serde(default)]
    pub auto_detect: Vec<Entry>,
}

/// Entry store bound to its backing file
#[derive(Debug)]
pub struct EntryStore {
    path: PathBuf,
    data: StoreData,
}

impl EntryStore {
    /// Load the store from `path`. A missing or unreadable/corrupt file
    /// yields an empty store; the error is logged, never propagated.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<StoreData>(&contents) {
                Ok(data) => {
                    info!(
                        path = %path.display(),
                        keywords = data.command_triggered.len(),
                        detects = data.auto_detect.len(),
                        "Entry store loaded"
                    );
                    data
                }
                Err(e) => {
                    error_logging::log_storage_error(&e, "load", Some(&path.display().to_string()));
                    StoreData::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No entry file yet, starting empty");
                StoreData::default()
            }
            Err(e) => {
                error_logging::log_storage_error(&e, "load", Some(&path.display().to_string()));
                StoreData::default()
            }
        };
        Self { path, data }
    }

    /// Create an empty store bound to `path` without touching the disk.
    /// Used by tests and by callers that persist explicitly.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: StoreData::default(),
        }
    }

    /// Persist the full store. Fails soft: a write error is logged and the
    /// in-memory state is retained. The rewrite is atomic (temp file +
    /// rename) so readers never observe a partial document.
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            error_logging::log_storage_error(&e, "save", Some(&self.path.display().to_string()));
        }
    }

    fn try_save(&self) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries of one collection
    pub fn entries(&self, kind: EntryKind) -> &[Entry] {
        match kind {
            EntryKind::CommandTriggered => &self.data.command_triggered,
            EntryKind::AutoDetect => &self.data.auto_detect,
        }
    }

    /// Mutable entries of one collection
    pub fn entries_mut(&mut self, kind: EntryKind) -> &mut Vec<Entry> {
        match kind {
            EntryKind::CommandTriggered => &mut self.data.command_triggered,
            EntryKind::AutoDetect => &mut self.data.auto_detect,
        }
    }

    /// Append an entry to a collection
    pub fn add_entry(&mut self, kind: EntryKind, entry: Entry) {
        self.entries_mut(kind).push(entry);
    }

    /// Remove the entry at `index`, returning it when in bounds
    pub fn remove_entry(&mut self, kind: EntryKind, index: usize) -> Option<Entry> {
        let entries = self.entries_mut(kind);
        if index < entries.len() {
            Some(entries.remove(index))
        } else {
            warn!(kind = kind.label(), index, "Remove index out of bounds");
            None
        }
    }

    /// Find the index of an entry with an exactly matching keyword
    pub fn find_by_keyword(&self, kind: EntryKind, keyword: &str) -> Option<usize> {
        self.entries(kind).iter().position(|e| e.keyword == keyword)
    }
}

/// Store handle shared between the bot handlers and the admin console
pub type SharedStore = Arc<RwLock<EntryStore>>;

/// Wrap a store for sharing across tasks
pub fn shared(store: EntryStore) -> SharedStore {
    Arc::new(RwLock::new(store))
}
