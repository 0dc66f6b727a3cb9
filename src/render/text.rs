//! Text attack images: each word-list line drawn in black on a white canvas.
//!
//! Layout: a 600×420 canvas, 50 px glyphs, at most three words per line.
//! Lines share one left edge that centres the widest line, starting a third
//! of the way down.

use crate::config::EvalSettings;
use crate::error::EvalError;
use crate::pipeline::sources::{read_word_list, word_identifier, word_list_stem};
use crate::render::{list_files_with_extension, save_png};
use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CANVAS_WIDTH: u32 = 600;
pub const CANVAS_HEIGHT: u32 = 400;
/// Extra blank rows below the nominal canvas height.
pub const BOTTOM_MARGIN: u32 = 20;
pub const FONT_SIZE: f32 = 50.0;
pub const MAX_WORDS_PER_LINE: usize = 3;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Load the TrueType font used for every text image.
pub fn load_font(path: &Path) -> Result<FontVec, EvalError> {
    let bytes = std::fs::read(path).map_err(|e| EvalError::FontLoadFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    FontVec::try_from_vec(bytes).map_err(|e| EvalError::FontLoadFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Group whitespace-separated words into lines of at most `max_words`.
pub fn wrap_words(text: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Draw `text` onto a fresh canvas.
pub fn text_to_image(text: &str, font: &FontVec) -> DynamicImage {
    let scale = PxScale::from(FONT_SIZE);
    let mut canvas = RgbImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT + BOTTOM_MARGIN, WHITE);

    let lines = wrap_words(text, MAX_WORDS_PER_LINE);
    let text_width = lines
        .iter()
        .map(|line| text_size(scale, font, line).0)
        .max()
        .unwrap_or(0);
    let (_, line_height) = text_size(scale, font, "Ay");

    let x = (CANVAS_WIDTH as i32 - text_width as i32) / 2;
    let mut y = (CANVAS_HEIGHT / 3) as i32;
    for line in &lines {
        draw_text_mut(&mut canvas, BLACK, x, y, scale, font, line);
        y += line_height as i32;
    }

    DynamicImage::ImageRgb8(canvas)
}

/// Render every line of one word list into `<attack_images>/txt/<stem>/`.
pub fn render_word_list(
    words_file: &Path,
    font: &FontVec,
    settings: &EvalSettings,
) -> Result<Vec<PathBuf>, EvalError> {
    let words = read_word_list(words_file)?;
    let out_dir = settings.text_images_dir(&word_list_stem(words_file));

    let mut written = Vec::with_capacity(words.len());
    for word in &words {
        let path = out_dir.join(format!("{}.png", word_identifier(word)));
        save_png(&text_to_image(word, font), &path)?;
        debug!("Saved '{}'", path.display());
        written.push(path);
    }

    info!(
        "Rendered {} images for '{}'",
        written.len(),
        word_list_stem(words_file)
    );
    Ok(written)
}

/// Render one word list, or every `*.txt` under `<data>/txt` when none is given.
pub fn render_all_word_lists(
    words_file: Option<&Path>,
    settings: &EvalSettings,
) -> Result<Vec<PathBuf>, EvalError> {
    let font = load_font(&settings.font_path)?;

    let lists = match words_file {
        Some(path) => vec![settings.resolve_word_list(path)],
        None => list_files_with_extension(&settings.text_data_dir(), "txt")?,
    };

    let mut written = Vec::new();
    for list in &lists {
        written.extend(render_word_list(list, &font, settings)?);
    }
    Ok(written)
}
