//! # Reply Assembler
//!
//! Converts a stored [`ReplyVariant`] into an [`OutboundMessage`] ready for
//! the platform sender. The order is fixed: any text segment precedes any
//! image segments; there is no interleaving inside one variant. Local image
//! references resolve against the image directory and are skipped with a
//! warning when the file is gone; remote references pass through as URLs.
//!
//! An assembly that resolves to nothing yields `None` — callers treat this
//! as "no reply", not as an error.

use crate::images::ImageStore;
use crate::store::{ImageRef, ReplyVariant};
use std::path::PathBuf;
use tracing::warn;

/// One attachment of an outbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// Image stored locally under the image directory
    File(PathBuf),
    /// Remote image reference
    Url(String),
}

/// Platform-neutral outbound message
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Whether the message leads with a reply-quote of the trigger
    pub quote: bool,
    /// Text segment, sent first
    pub text: Option<String>,
    /// Image segments, sent after the text
    pub attachments: Vec<Attachment>,
}

/// Assemble an outbound message from a stored variant.
///
/// Returns `None` when neither text nor any resolvable image remains.
pub fn build_reply(
    variant: &ReplyVariant,
    images: &ImageStore,
    quote: bool,
) -> Option<OutboundMessage> {
    let text = (!variant.text.is_empty()).then(|| variant.text.clone());

    let mut attachments = Vec::new();
    for image in &variant.images {
        match image {
            ImageRef::Local { path } => match images.resolve(path) {
                Some(full_path) => attachments.push(Attachment::File(full_path)),
                None => {
                    warn!(path = %path, "Reply image missing from image directory, skipping");
                }
            },
            ImageRef::Remote { url } => attachments.push(Attachment::Url(url.clone())),
        }
    }

    if text.is_none() && attachments.is_empty() {
        warn!("Reply variant assembled to nothing, suppressing reply");
        return None;
    }

    Some(OutboundMessage {
        quote,
        text,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_store() -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("images")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_text_only_reply() {
        let (_dir, images) = image_store();
        let variant = ReplyVariant {
            text: "hi!".to_string(),
            images: Vec::new(),
        };
        let msg = build_reply(&variant, &images, false).unwrap();
        assert_eq!(msg.text.as_deref(), Some("hi!"));
        assert!(msg.attachments.is_empty());
        assert!(!msg.quote);
    }

    #[test]
    fn test_text_precedes_images() {
        let (_dir, images) = image_store();
        let stored = images.store_bytes("a.png", b"png-bytes").unwrap();
        let variant = ReplyVariant {
            text: "caption".to_string(),
            images: vec![
                ImageRef::Local { path: stored },
                ImageRef::Remote {
                    url: "https://example.com/b.jpg".to_string(),
                },
            ],
        };
        let msg = build_reply(&variant, &images, true).unwrap();
        assert!(msg.quote);
        assert_eq!(msg.text.as_deref(), Some("caption"));
        assert_eq!(msg.attachments.len(), 2);
        assert!(matches!(msg.attachments[0], Attachment::File(_)));
        assert!(matches!(msg.attachments[1], Attachment::Url(_)));
    }

    #[test]
    fn test_missing_local_image_skipped() {
        let (_dir, images) = image_store();
        let variant = ReplyVariant {
            text: "still here".to_string(),
            images: vec![ImageRef::Local {
                path: "gone.png".to_string(),
            }],
        };
        let msg = build_reply(&variant, &images, false).unwrap();
        assert_eq!(msg.text.as_deref(), Some("still here"));
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_nothing_resolvable_yields_none() {
        let (_dir, images) = image_store();
        let variant = ReplyVariant {
            text: String::new(),
            images: vec![ImageRef::Local {
                path: "gone.png".to_string(),
            }],
        };
        assert!(build_reply(&variant, &images, false).is_none());
        assert!(build_reply(&ReplyVariant::default(), &images, false).is_none());
    }
}
