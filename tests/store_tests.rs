use keywords_reply::store::{
    AccessMode, Entry, EntryKind, EntryStore, ImageRef, ReplyVariant, StoreData,
};

fn full_entry() -> Entry {
    Entry {
        keyword: "hello".to_string(),
        is_regex: false,
        case_sensitive: Some(false),
        enabled: true,
        mode: AccessMode::Whitelist,
        groups: vec!["g1".to_string()],
        replies: vec![
            ReplyVariant {
                text: "hi!".to_string(),
                images: Vec::new(),
            },
            ReplyVariant {
                text: String::new(),
                images: vec![
                    ImageRef::Local {
                        path: "0a0b.png".to_string(),
                    },
                    ImageRef::Remote {
                        url: "https://example.com/pic.jpg".to_string(),
                    },
                ],
            },
        ],
    }
}

/// save(load()) round-trips every field even though the bytes differ from
/// any handwritten source
#[test]
fn test_round_trip_preserves_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keywords.json");

    let mut store = EntryStore::empty(&path);
    store.add_entry(EntryKind::CommandTriggered, full_entry());
    let mut detect = full_entry();
    detect.keyword = r"^status\s+\d+$".to_string();
    detect.is_regex = true;
    detect.mode = AccessMode::Blacklist;
    detect.enabled = false;
    store.add_entry(EntryKind::AutoDetect, detect.clone());
    store.save();

    let reloaded = EntryStore::load(&path);
    assert_eq!(
        reloaded.entries(EntryKind::CommandTriggered),
        &[full_entry()]
    );
    assert_eq!(reloaded.entries(EntryKind::AutoDetect), &[detect]);

    // Saving the reloaded store yields a semantically identical document
    let second_path = dir.path().join("copy.json");
    let mut copy = EntryStore::empty(&second_path);
    for e in reloaded.entries(EntryKind::CommandTriggered) {
        copy.add_entry(EntryKind::CommandTriggered, e.clone());
    }
    for e in reloaded.entries(EntryKind::AutoDetect) {
        copy.add_entry(EntryKind::AutoDetect, e.clone());
    }
    copy.save();

    let a: StoreData =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let b: StoreData =
        serde_json::from_str(&std::fs::read_to_string(&second_path).unwrap()).unwrap();
    assert_eq!(a, b);
}

/// A hand-edited document with minimal fields loads with defaults applied
#[test]
fn test_human_edited_document_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keywords.json");
    std::fs::write(
        &path,
        r#"{
  "command_triggered": [
    { "keyword": "menu", "replies": [ { "text": "soup of the day" } ] }
  ],
  "auto_detect": []
}"#,
    )
    .unwrap();

    let store = EntryStore::load(&path);
    let entries = store.entries(EntryKind::CommandTriggered);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].enabled);
    assert!(!entries[0].is_regex);
    assert_eq!(entries[0].mode, AccessMode::Whitelist);
}

/// Corrupt and missing files both fail soft into an empty store
#[test]
fn test_fail_soft_loading() {
    let dir = tempfile::tempdir().unwrap();

    let store = EntryStore::load(dir.path().join("does-not-exist.json"));
    assert!(store.entries(EntryKind::CommandTriggered).is_empty());

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "]]]]").unwrap();
    let store = EntryStore::load(&corrupt);
    assert!(store.entries(EntryKind::AutoDetect).is_empty());
}

/// A failed write keeps the in-memory state intact
#[test]
fn test_save_failure_retains_memory_state() {
    let dir = tempfile::tempdir().unwrap();
    // Parent "directory" is actually a file, so persisting must fail
    let bogus_parent = dir.path().join("not-a-dir");
    std::fs::write(&bogus_parent, b"file").unwrap();

    let mut store = EntryStore::empty(bogus_parent.join("keywords.json"));
    store.add_entry(EntryKind::AutoDetect, full_entry());
    store.save();

    assert_eq!(store.entries(EntryKind::AutoDetect).len(), 1);
}

/// Mutations persist write-through across reloads
#[test]
fn test_mutation_then_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keywords.json");

    let mut store = EntryStore::empty(&path);
    store.add_entry(EntryKind::AutoDetect, full_entry());
    store.save();

    let mut store = EntryStore::load(&path);
    store.entries_mut(EntryKind::AutoDetect)[0].enabled = false;
    store.save();

    let store = EntryStore::load(&path);
    assert!(!store.entries(EntryKind::AutoDetect)[0].enabled);

    let mut store = EntryStore::load(&path);
    assert!(store.remove_entry(EntryKind::AutoDetect, 0).is_some());
    store.save();

    let store = EntryStore::load(&path);
    assert!(store.entries(EntryKind::AutoDetect).is_empty());
}
