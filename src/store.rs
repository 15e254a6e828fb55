//! The on-disk working set: uploads, extracted images, derived text.
//!
//! A [`WorkingSetStore`] is a plain value holding three directory paths.
//! There is deliberately no global state: construct one per logical
//! session (or per test, pointed at a tempdir) and pass it to the
//! extractor and the batch job explicitly.
//!
//! ## Layout
//!
//! ```text
//! uploads/           input.pdf              (fixed logical name, replaced on upload)
//! extracted_image/   img_1.png, img_2.jpg…  (one extraction run's output)
//! extracted_text/    img_1.png.txt, …       (per-image results)
//!                    merged_text.txt        (aggregate of the last batch run)
//! ```
//!
//! ## No locking
//!
//! The store assumes a single logical user. Concurrent extraction, deletion,
//! or batch runs against the same directories must be serialised by the
//! caller.

use crate::error::GleanError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fixed logical name of the staged source document.
pub const SOURCE_NAME: &str = "input.pdf";

/// Fixed name of the merged text artifact.
pub const MERGED_NAME: &str = "merged_text.txt";

/// Suggested filename when the merged artifact is handed out for download.
pub const MERGED_DOWNLOAD_NAME: &str = "extracted_text_merged.txt";

/// Suffix appended to an image filename to form its text artifact name.
pub const TEXT_SUFFIX: &str = ".txt";

/// Extensions the gallery listing recognises as images.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

/// Returns `true` when `name` is a bare filename safe to join onto a store
/// directory. Anything carrying a parent-directory marker or a path
/// separator is rejected. This check runs before any filesystem touch.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

/// The three-directory working set of one user session.
#[derive(Debug, Clone)]
pub struct WorkingSetStore {
    uploads: PathBuf,
    images: PathBuf,
    texts: PathBuf,
}

impl WorkingSetStore {
    /// Create a store over three directory paths. No filesystem access
    /// happens here; call [`ensure_layout`](Self::ensure_layout) to create
    /// the directories.
    pub fn new(
        uploads: impl Into<PathBuf>,
        images: impl Into<PathBuf>,
        texts: impl Into<PathBuf>,
    ) -> Self {
        Self {
            uploads: uploads.into(),
            images: images.into(),
            texts: texts.into(),
        }
    }

    /// Convenience constructor: the conventional three subdirectories under
    /// a single root.
    pub fn under_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(
            root.join("uploads"),
            root.join("extracted_image"),
            root.join("extracted_text"),
        )
    }

    /// Create all three directories if they do not exist yet.
    pub fn ensure_layout(&self) -> Result<(), GleanError> {
        for dir in [&self.uploads, &self.images, &self.texts] {
            fs::create_dir_all(dir).map_err(|e| GleanError::store_io(dir, e))?;
        }
        Ok(())
    }

    // ── Source document ──────────────────────────────────────────────────

    /// Stage an uploaded document under the fixed logical name, replacing
    /// any previous upload. Only the `pdf` extension (case-insensitive) is
    /// accepted.
    pub fn stage_source(&self, original_name: &str, bytes: &[u8]) -> Result<PathBuf, GleanError> {
        if !has_allowed_extension(original_name) {
            return Err(GleanError::UnsupportedUpload {
                filename: original_name.to_string(),
            });
        }
        fs::create_dir_all(&self.uploads).map_err(|e| GleanError::store_io(&self.uploads, e))?;
        let path = self.source_path();
        fs::write(&path, bytes).map_err(|e| GleanError::store_io(&path, e))?;
        debug!("Staged source document at {}", path.display());
        Ok(path)
    }

    /// Path of the staged source document (may not exist yet).
    pub fn source_path(&self) -> PathBuf {
        self.uploads.join(SOURCE_NAME)
    }

    // ── Gallery ──────────────────────────────────────────────────────────

    /// List extracted images, ordered by the numeric suffix of the
    /// `img_<N>` pattern. Files whose name does not parse sort after all
    /// numbered ones (then by name, so the order stays stable even when the
    /// directory has been manipulated out of band).
    pub fn list_images(&self) -> Result<Vec<String>, GleanError> {
        if !self.images.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.images).map_err(|e| GleanError::store_io(&self.images, e))?;

        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GleanError::store_io(&self.images, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_supported_image(&name) {
                names.push(name);
            }
        }
        names.sort_by(|a, b| gallery_key(a).cmp(&gallery_key(b)));
        Ok(names)
    }

    /// Delete the given images and their sibling text artifacts.
    ///
    /// Names failing the path-safety check are skipped, as are names with no
    /// matching file; neither is an error. Returns the number of image
    /// files actually removed.
    pub fn delete(&self, names: &[String]) -> usize {
        let mut deleted = 0;
        for name in names {
            if !is_safe_name(name) {
                warn!("Rejected unsafe delete target: {name:?}");
                continue;
            }
            let image = self.image_path(name);
            match fs::remove_file(&image) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not delete {}: {e}", image.display()),
            }
            let text = self.text_path(name);
            if let Err(e) = fs::remove_file(&text) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not delete {}: {e}", text.display());
                }
            }
        }
        deleted
    }

    /// Remove every file from the extracted-image and extracted-text
    /// directories. A new image set never inherits text derived from an
    /// earlier set with colliding sequence numbers, so the derived artifacts
    /// (including the merged file) go too.
    pub fn clear_extracted(&self) -> Result<(), GleanError> {
        for dir in [&self.images, &self.texts] {
            if !dir.exists() {
                continue;
            }
            let entries = fs::read_dir(dir).map_err(|e| GleanError::store_io(dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| GleanError::store_io(dir, e))?;
                let path = entry.path();
                if path.is_file() {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!("Could not clear {}: {e}", path.display());
                    }
                }
            }
        }
        Ok(())
    }

    // ── Per-artifact paths ───────────────────────────────────────────────

    /// Path of an extracted image. `name` must already have passed
    /// [`is_safe_name`].
    pub fn image_path(&self, name: &str) -> PathBuf {
        self.images.join(name)
    }

    /// Path of the text artifact derived from `name`.
    pub fn text_path(&self, name: &str) -> PathBuf {
        self.texts.join(format!("{name}{TEXT_SUFFIX}"))
    }

    /// Path of the merged text artifact.
    pub fn merged_path(&self) -> PathBuf {
        self.texts.join(MERGED_NAME)
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Write one extracted image, creating the directory on first use.
    pub fn write_image(&self, name: &str, bytes: &[u8]) -> Result<(), GleanError> {
        fs::create_dir_all(&self.images).map_err(|e| GleanError::store_io(&self.images, e))?;
        let path = self.image_path(name);
        fs::write(&path, bytes).map_err(|e| GleanError::store_io(&path, e))
    }

    /// Write (overwrite) the per-image text artifact for `name`.
    pub fn write_text(&self, name: &str, text: &str) -> Result<(), GleanError> {
        fs::create_dir_all(&self.texts).map_err(|e| GleanError::store_io(&self.texts, e))?;
        let path = self.text_path(name);
        fs::write(&path, text).map_err(|e| GleanError::store_io(&path, e))
    }

    /// Truncate the merged artifact to empty, creating it (and its
    /// directory) when missing. Every batch run starts here.
    pub fn reset_merged(&self) -> Result<(), GleanError> {
        fs::create_dir_all(&self.texts).map_err(|e| GleanError::store_io(&self.texts, e))?;
        let path = self.merged_path();
        fs::write(&path, b"").map_err(|e| GleanError::store_io(&path, e))
    }

    /// Append one image's text plus a blank-line separator to the merged
    /// artifact.
    pub fn append_merged(&self, text: &str) -> Result<(), GleanError> {
        use std::io::Write;
        let path = self.merged_path();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GleanError::store_io(&path, e))?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.write_all(b"\n\n"))
            .map_err(|e| GleanError::store_io(&path, e))
    }

    // ── Merged download ──────────────────────────────────────────────────

    /// Whether a merged artifact exists (i.e. a batch run has happened).
    pub fn merged_exists(&self) -> bool {
        self.merged_path().is_file()
    }

    /// Read the merged artifact. `Ok(None)` when no batch has ever run;
    /// absence is a normal state, not an error.
    pub fn read_merged(&self) -> Result<Option<Vec<u8>>, GleanError> {
        let path = self.merged_path();
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GleanError::store_io(&path, e)),
        }
    }
}

/// Upload allow-list check: `pdf` only, case-insensitive, and the name must
/// actually have an extension.
fn has_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Whether a filename carries one of the supported image extensions.
fn is_supported_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
}

/// Sort key for the gallery: the integer N from `img_<N>`, with unparseable
/// names sorting last. The name itself breaks ties for a stable order.
fn gallery_key(name: &str) -> (u64, String) {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let num = stem
        .split_once('_')
        .and_then(|(_, n)| n.parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (num, name.to_string())
}
