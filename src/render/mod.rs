//! Attack-image generation: degraded PDF pages and rendered word lists.
//!
//! Both renderers write PNGs into the layout the image source provider
//! reads back, so `render-*` followed by `eval-*` works without moving files.

pub mod pdf;
pub mod text;

use crate::error::EvalError;
use image::DynamicImage;
use std::path::{Path, PathBuf};

pub use pdf::{page_image_name, render_pdfs};
pub use text::{render_all_word_lists, render_word_list, text_to_image};

/// Files in `dir` with extension `ext` (case-insensitive), sorted by name.
pub(crate) fn list_files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, EvalError> {
    let entries = std::fs::read_dir(dir).map_err(|e| EvalError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| EvalError::io(dir, e))?.path();
        let matches = path
            .extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Save `img` as PNG, creating parent directories.
pub(crate) fn save_png(img: &DynamicImage, path: &Path) -> Result<(), EvalError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
    }
    img.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| EvalError::RenderFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}
