use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ImageInputError {
    #[error("invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unrecognized image format")]
    UnknownFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
}

impl ImageFormat {
    fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.starts_with(b"BM") {
            Some(Self::Bmp)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

/// Decodes a base64 image, optionally wrapped in a `data:` URL.
pub fn decode_image(encoded: &str) -> Result<DecodedImage, ImageInputError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = general_purpose::STANDARD.decode(payload)?;
    let format = ImageFormat::sniff(&bytes).ok_or(ImageInputError::UnknownFormat)?;
    Ok(DecodedImage { format, bytes })
}

/// Writes a decoded image below `dir` and returns its path.
pub async fn stage_image(
    dir: &Path,
    label: &str,
    image: &DecodedImage,
) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let stamp = Utc::now().format("%Y%m%d-%H%M%S%.6f");
    let path = dir.join(format!("{stamp}_{label}.{}", image.format.extension()));
    fs::write(&path, &image.bytes).await?;
    Ok(path)
}

/// Deletes staged images once their task no longer needs them.
pub fn discard_images(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Unable to delete staged input {}: {}", path.display(), err),
        }
    }
}
