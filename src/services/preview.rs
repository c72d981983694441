use crate::repositories::output_repository::FileKind;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_PREVIEW_WIDTH: u32 = 320;
pub const MIN_PREVIEW_WIDTH: u32 = 32;
pub const MAX_PREVIEW_WIDTH: u32 = 1920;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Preview not available for this file type")]
    Unsupported,
    #[error("Unable to run {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("{0}")]
    Failed(String),
}

/// Renders a JPEG thumbnail `width` pixels wide, keeping the aspect ratio.
/// Videos use their first frame.
pub async fn render_thumbnail(
    ffmpeg: &str,
    path: &Path,
    kind: FileKind,
    width: u32,
) -> Result<Vec<u8>, PreviewError> {
    if !matches!(kind, FileKind::Image | FileKind::Video) {
        return Err(PreviewError::Unsupported);
    }

    debug!("Rendering {}px preview of {}", width, path.display());
    let output = Command::new(ffmpeg)
        .arg("-v")
        .arg("error")
        .arg("-i")
        .arg(path)
        .args(["-frames:v", "1"])
        .arg("-vf")
        .arg(format!("scale={width}:-1"))
        .args(["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "5", "pipe:1"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| PreviewError::Spawn(ffmpeg.to_string(), err))?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(PreviewError::Failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(output.stdout)
}
