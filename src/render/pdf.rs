//! PDF attack images: every page rendered at reduced resolution, then
//! scaled back up, so the model sees a blurred full-size page.
//!
//! pdfium is a blocking C library, so the whole batch runs inside
//! `tokio::task::spawn_blocking`.

use crate::config::EvalSettings;
use crate::error::EvalError;
use crate::render::{list_files_with_extension, save_png};
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default render scale: a quarter of the page's 72-DPI size.
pub const DEFAULT_RESCALE: f32 = 0.25;

/// File name of one rendered page: `<stem>__page_<n>__rescale_<r>.png`.
///
/// `page` is 1-based. The `__` separator is what the source provider matches on.
pub fn page_image_name(stem: &str, page: usize, rescale: f32) -> String {
    format!("{stem}__page_{page}__rescale_{rescale}.png")
}

/// Render every PDF under `<data>/pdf` into `<attack_images>/pdf`.
///
/// Returns the written image paths in document then page order.
pub async fn render_pdfs(settings: &EvalSettings, rescale: f32) -> Result<Vec<PathBuf>, EvalError> {
    if !(rescale > 0.0 && rescale <= 1.0) {
        return Err(EvalError::InvalidConfig(format!(
            "rescale must be within (0, 1], got {rescale}"
        )));
    }

    let input_dir = settings.pdf_data_dir();
    let output_dir = settings.pdf_images_dir();
    let lib_path = settings.pdfium_lib_path.clone();

    tokio::task::spawn_blocking(move || {
        render_pdfs_blocking(&input_dir, &output_dir, lib_path.as_deref(), rescale)
    })
    .await
    .map_err(|e| EvalError::Internal(format!("Render task panicked: {}", e)))?
}

fn render_pdfs_blocking(
    input_dir: &Path,
    output_dir: &Path,
    lib_path: Option<&Path>,
    rescale: f32,
) -> Result<Vec<PathBuf>, EvalError> {
    let pdfs = list_files_with_extension(input_dir, "pdf")?;
    if pdfs.is_empty() {
        info!("No PDFs found in '{}'", input_dir.display());
        return Ok(Vec::new());
    }

    let pdfium = bind_pdfium(lib_path)?;
    let mut written = Vec::new();

    for pdf in &pdfs {
        let pages = render_document(&pdfium, pdf, output_dir, rescale)?;
        info!("Rendered {} pages from '{}'", pages.len(), pdf.display());
        written.extend(pages);
    }

    Ok(written)
}

/// Bind to pdfium in `lib_path` if given, otherwise to the system library.
fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, EvalError> {
    let bindings = match lib_path {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| EvalError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn render_document(
    pdfium: &Pdfium,
    pdf_path: &Path,
    output_dir: &Path,
    rescale: f32,
) -> Result<Vec<PathBuf>, EvalError> {
    let render_failed = |detail: String| EvalError::RenderFailed {
        path: pdf_path.to_path_buf(),
        detail,
    };

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| render_failed(format!("{:?}", e)))?;
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let render_config = PdfRenderConfig::new().scale_page_by_factor(rescale);
    let mut written = Vec::new();

    for (idx, page) in document.pages().iter().enumerate() {
        let low_res = page
            .render_with_config(&render_config)
            .map_err(|e| render_failed(format!("page {}: {:?}", idx + 1, e)))?
            .as_image();
        let image = degrade(low_res, rescale);

        let out = output_dir.join(page_image_name(&stem, idx + 1, rescale));
        save_png(&image, &out)?;
        debug!(
            "Page {} → {} ({}x{} px)",
            idx + 1,
            out.display(),
            image.width(),
            image.height()
        );
        written.push(out);
    }

    Ok(written)
}

/// Scale a low-resolution render back up by `1 / rescale`.
pub fn degrade(low_res: DynamicImage, rescale: f32) -> DynamicImage {
    if rescale >= 1.0 {
        return low_res;
    }
    let width = ((low_res.width() as f32) / rescale).round().max(1.0) as u32;
    let height = ((low_res.height() as f32) / rescale).round().max(1.0) as u32;
    low_res.resize_exact(width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn page_names_follow_layout() {
        assert_eq!(page_image_name("report", 1, 0.25), "report__page_1__rescale_0.25.png");
        assert_eq!(page_image_name("report", 12, 1.0), "report__page_12__rescale_1.png");
    }

    #[test]
    fn degrade_restores_full_size() {
        let low = DynamicImage::ImageRgb8(RgbImage::from_pixel(153, 198, Rgb([255, 255, 255])));
        let full = degrade(low, 0.25);
        assert_eq!((full.width(), full.height()), (612, 792));
    }

    #[test]
    fn degrade_is_identity_at_full_scale() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([1, 2, 3])));
        let out = degrade(img.clone(), 1.0);
        assert_eq!(out, img);
    }

    #[tokio::test]
    async fn rescale_out_of_range_is_rejected() {
        let settings = EvalSettings::default();
        for bad in [0.0, -1.0, 1.5] {
            assert!(matches!(
                render_pdfs(&settings, bad).await,
                Err(EvalError::InvalidConfig(_))
            ));
        }
    }

    #[tokio::test]
    async fn empty_pdf_directory_renders_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pdf")).unwrap();
        let settings = EvalSettings::builder().data_path(dir.path()).build().unwrap();

        let written = render_pdfs(&settings, DEFAULT_RESCALE).await.unwrap();
        assert!(written.is_empty());
    }
}
