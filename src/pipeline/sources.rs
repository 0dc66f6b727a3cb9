//! Image sources: labeled attack images and their ground-truth descriptions.
//!
//! Two collections exist:
//!
//! * **PDF pages** — `<data>/pdf/pdf_descriptions.json` lists
//!   `{filename, description}` pairs; each entry resolves to one PNG under
//!   `<attack_images>/pdf/` whose stem equals the filename or starts with
//!   `<filename>__` (the renderer's `__page_N__rescale_R` suffix).
//! * **Text images** — each non-empty line of a word list resolves to
//!   `<attack_images>/txt/<list stem>/<identifier>.png`.
//!
//! Listing is a pure function of the filesystem at call time.

use crate::config::EvalSettings;
use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Longest identifier (in characters) derived from a word-list line.
pub const MAX_IDENTIFIER_CHARS: usize = 30;

/// One labeled image shown to a vision model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    /// Unique within its collection: manifest filename or derived word identifier.
    pub identifier: String,
    /// Ground truth used as the scoring reference.
    pub expected_description: String,
    /// Path of the rendered image.
    pub image_locator: PathBuf,
}

impl ImageSource {
    /// Read the raw image bytes.
    ///
    /// A missing file is [`EvalError::ImageNotFound`], never a skip.
    pub fn load_bytes(&self) -> Result<Vec<u8>, EvalError> {
        std::fs::read(&self.image_locator).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EvalError::ImageNotFound {
                    identifier: self.identifier.clone(),
                    searched: self.image_locator.clone(),
                }
            } else {
                EvalError::io(&self.image_locator, e)
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    filename: String,
    description: String,
}

/// List the PDF-page sources in manifest order.
pub fn list_pdf_sources(settings: &EvalSettings) -> Result<Vec<ImageSource>, EvalError> {
    let manifest_path = settings.pdf_manifest_path();
    if !manifest_path.exists() {
        return Err(EvalError::ManifestNotFound {
            path: manifest_path,
        });
    }

    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| EvalError::io(&manifest_path, e))?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&raw).map_err(|e| EvalError::ManifestInvalid {
            path: manifest_path.clone(),
            detail: e.to_string(),
        })?;
    info!("Loaded {} PDF descriptions", entries.len());

    let image_dir = settings.pdf_images_dir();
    let candidates = list_png_files(&image_dir)?;

    entries
        .into_iter()
        .map(|entry| {
            let image_locator = resolve_pdf_image(&entry.filename, &candidates, &image_dir)?;
            debug!("Image found: {}", image_locator.display());
            Ok(ImageSource {
                identifier: entry.filename,
                expected_description: entry.description,
                image_locator,
            })
        })
        .collect()
}

/// List the text-image sources of one word list, in line order.
///
/// Blank lines are skipped: they would yield an empty identifier and an
/// image of nothing.
pub fn list_text_sources(
    word_list_path: &Path,
    settings: &EvalSettings,
) -> Result<Vec<ImageSource>, EvalError> {
    let words = read_word_list(word_list_path)?;
    let source = word_list_stem(word_list_path);
    let image_dir = settings.text_images_dir(&source);

    let sources: Vec<ImageSource> = words
        .into_iter()
        .map(|word| {
            let identifier = word_identifier(&word);
            ImageSource {
                image_locator: image_dir.join(format!("{identifier}.png")),
                expected_description: text_ground_truth(&word),
                identifier,
            }
        })
        .collect();

    info!("Loaded {} text descriptions from '{}'", sources.len(), source);
    Ok(sources)
}

/// Read the non-empty lines of a word list.
///
/// Only empty lines are skipped; a line of spaces is still a word.
pub fn read_word_list(path: &Path) -> Result<Vec<String>, EvalError> {
    if !path.exists() {
        return Err(EvalError::WordListNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;

    let total = content.lines().count();
    let words: Vec<String> = content
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if words.len() < total {
        warn!(
            "Skipped {} empty lines in '{}'",
            total - words.len(),
            path.display()
        );
    }
    Ok(words)
}

/// Collection name of a word list: its file stem.
pub fn word_list_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Spaces become underscores, then the result is cut to 30 characters.
pub fn word_identifier(word: &str) -> String {
    word.replace(' ', "_")
        .chars()
        .take(MAX_IDENTIFIER_CHARS)
        .collect()
}

/// Expected description of a rendered word.
pub fn text_ground_truth(word: &str) -> String {
    format!("The image contains word '{word}' written in black text on white background.")
}

/// PNG files directly inside `dir`, sorted by name. A missing directory is empty.
fn list_png_files(dir: &Path) -> Result<Vec<PathBuf>, EvalError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| EvalError::io(dir, e))? {
        let path = entry.map_err(|e| EvalError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "png") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Pick the image for a manifest entry.
///
/// An exact stem match wins outright. Otherwise the first rendered page,
/// `<filename>__page_1__*`, is preferred; failing that, every stem beginning
/// with `<filename>__` is a candidate. Either way exactly one must exist, so
/// `doc1` never matches `doc10__page_1`. A trailing `.pdf` on the filename is
/// ignored.
fn resolve_pdf_image(
    filename: &str,
    candidates: &[PathBuf],
    image_dir: &Path,
) -> Result<PathBuf, EvalError> {
    let stem = filename.strip_suffix(".pdf").unwrap_or(filename);
    let stem_of = |p: &PathBuf| {
        p.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    if let Some(exact) = candidates.iter().find(|p| stem_of(p) == stem) {
        return Ok(exact.clone());
    }

    let with_prefix = |prefix: &str| -> Vec<PathBuf> {
        candidates
            .iter()
            .filter(|p| stem_of(p).starts_with(prefix))
            .cloned()
            .collect()
    };
    let mut matches = with_prefix(&format!("{stem}__page_1__"));
    if matches.is_empty() {
        matches = with_prefix(&format!("{stem}__"));
    }

    if matches.len() > 1 {
        return Err(EvalError::AmbiguousImage {
            identifier: filename.to_string(),
            candidates: matches,
        });
    }
    matches.pop().ok_or_else(|| EvalError::ImageNotFound {
        identifier: filename.to_string(),
        searched: image_dir.to_path_buf(),
    })
}
