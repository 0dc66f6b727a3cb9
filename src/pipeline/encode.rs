//! Image encoding: raw image bytes → base64 PNG wrapped in `ImageData`.
//!
//! Every attack image is decoded and re-encoded as PNG before upload, so a
//! JPEG dropped into the image directory is still sent with a truthful
//! `image/png` MIME type.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Decode arbitrary image bytes and re-encode them as a base64 PNG.
pub fn encode_image_bytes(bytes: &[u8]) -> Result<ImageData, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    encode_png(&img)
}

/// Encode an image as a base64 PNG ready for a multimodal chat request.
///
/// `detail: "high"` keeps small rendered words legible to tiled GPT-4-class
/// vision encoders.
pub fn encode_png(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// `data:` URI form used by OpenAI-compatible `image_url` content parts.
pub fn data_url(image: &ImageData) -> String {
    format!("data:{};base64,{}", image.mime_type, image.data)
}
