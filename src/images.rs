//! # Image Store
//!
//! Reply images live in one dedicated directory and are addressed by the
//! SHA-256 of their bytes (hex digest + extension). Identical content maps
//! to an identical filename, so re-uploading is a harmless overwrite and
//! the directory deduplicates itself.
//!
//! Filenames crossing this module are checked against a traversal guard
//! before touching the filesystem; the admin console shares the same guard
//! when serving files back.

use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File extensions accepted for upload and download
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// A stored image as listed by the admin console
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub modified: DateTime<Local>,
}

/// Content-addressed image directory
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Open (and create) the image directory
    pub fn new(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The backing directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reject any filename that could escape the image directory:
    /// empty names, path separators, parent-directory tokens, NUL bytes.
    pub fn is_safe_filename(filename: &str) -> bool {
        !filename.is_empty()
            && !filename.contains('/')
            && !filename.contains('\\')
            && !filename.contains("..")
            && !filename.contains('\0')
    }

    /// Lowercased extension of a filename, without the dot
    fn extension_of(filename: &str) -> Option<String> {
        Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// Whether a filename carries an accepted image extension
    pub fn has_allowed_extension(filename: &str) -> bool {
        Self::extension_of(filename)
            .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Store image bytes under their content hash.
    ///
    /// `original_name` only contributes the extension, which must be on
    /// the allow-list. Returns the stored filename.
    pub fn store_bytes(&self, original_name: &str, bytes: &[u8]) -> AppResult<String> {
        let ext = Self::extension_of(original_name).ok_or_else(|| {
            AppError::Validation(format!("File has no extension: {}", original_name))
        })?;
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AppError::Validation(format!(
                "File type .{} is not allowed",
                ext
            )));
        }
        if bytes.is_empty() {
            return Err(AppError::Validation("File is empty".to_string()));
        }

        let digest = Sha256::digest(bytes);
        let filename = format!("{}.{}", hex::encode(digest), ext);
        let path = self.dir.join(&filename);

        // Identical bytes hash to the same name, so overwriting is a no-op
        std::fs::write(&path, bytes)?;
        info!(filename = %filename, size = bytes.len(), "Image stored");
        Ok(filename)
    }

    /// Download a remote image and store it content-addressed.
    ///
    /// The extension is inferred from the Content-Type header, falling back
    /// to the URL path and then to `.jpg`.
    pub async fn download(&self, client: &reqwest::Client, url: &str) -> AppResult<String> {
        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "Image download failed with status {}: {}",
                response.status(),
                url
            )));
        }

        let ext = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(extension_from_mime)
            .or_else(|| {
                url.rsplit('/')
                    .next()
                    .and_then(Self::extension_of)
                    .filter(|e| ALLOWED_EXTENSIONS.contains(&e.as_str()))
            })
            .unwrap_or_else(|| "jpg".to_string());

        let bytes = response.bytes().await?;
        self.store_bytes(&format!("download.{}", ext), &bytes)
    }

    /// Absolute path of a stored image, when the name is safe and the file
    /// exists
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        if !Self::is_safe_filename(filename) {
            warn!(filename = %filename, "Rejected unsafe image filename");
            return None;
        }
        let path = self.dir.join(filename);
        path.is_file().then_some(path)
    }

    /// Read a stored image's bytes
    pub fn read(&self, filename: &str) -> AppResult<Vec<u8>> {
        let path = self
            .resolve(filename)
            .ok_or_else(|| AppError::NotFound(format!("No such image: {}", filename)))?;
        Ok(std::fs::read(path)?)
    }

    /// Delete a stored image
    pub fn delete(&self, filename: &str) -> AppResult<()> {
        if !Self::is_safe_filename(filename) {
            return Err(AppError::Validation(format!(
                "Unsafe filename: {}",
                filename
            )));
        }
        let path = self.dir.join(filename);
        if !path.is_file() {
            return Err(AppError::NotFound(format!("No such image: {}", filename)));
        }
        std::fs::remove_file(&path)?;
        info!(filename = %filename, "Image deleted");
        Ok(())
    }

    /// List stored images with size and modification time, newest first
    pub fn list(&self) -> AppResult<Vec<ImageInfo>> {
        let mut images = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().to_string();
            if !Self::has_allowed_extension(&name) {
                continue;
            }
            let meta = dirent.metadata()?;
            images.push(ImageInfo {
                filename: name,
                size_bytes: meta.len(),
                modified: meta
                    .modified()
                    .map(DateTime::<Local>::from)
                    .unwrap_or_else(|_| Local::now()),
            });
        }
        images.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(images)
    }

    /// MIME type for a stored filename, by extension
    pub fn mime_type(filename: &str) -> &'static str {
        match Self::extension_of(filename).as_deref() {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

/// Map an image MIME type to a stored extension
fn extension_from_mime(mime: &str) -> Option<String> {
    let ext = match mime.split(';').next().unwrap_or("").trim() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => return None,
    };
    Some(ext.to_string())
}
