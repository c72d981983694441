use chrono::{DateTime, Local};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Video,
    Image,
    Audio,
    Other,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        match extension(path).as_str() {
            "mp4" | "webm" | "avi" | "mov" => FileKind::Video,
            "png" | "jpg" | "jpeg" | "webp" => FileKind::Image,
            "wav" | "mp3" | "ogg" | "flac" => FileKind::Audio,
            _ => FileKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Video => "video",
            FileKind::Image => "image",
            FileKind::Audio => "audio",
            FileKind::Other => "other",
        }
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

pub fn media_type(path: &Path) -> &'static str {
    match extension(path).as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size_bytes: u64,
    pub created_at: String,
    pub modified_at: String,
    #[serde(skip)]
    modified: SystemTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputPage {
    pub files: Vec<OutputFile>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("File '{0}' not found")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone)]
pub struct OutputRepository {
    save_path: PathBuf,
}

impl OutputRepository {
    pub fn new(save_path: impl Into<PathBuf>) -> Self {
        Self {
            save_path: save_path.into(),
        }
    }

    /// Lists regular files of the output directory, newest first. Returns
    /// `None` when the directory does not exist yet.
    pub async fn list(
        &self,
        limit: usize,
        offset: usize,
        file_type: Option<&str>,
    ) -> Result<Option<OutputPage>, OutputError> {
        if !fs::metadata(&self.save_path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Ok(None);
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.save_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path();
            let kind = FileKind::from_path(&path);
            if file_type.is_some_and(|wanted| wanted != kind.as_str()) {
                continue;
            }
            let modified = metadata.modified()?;
            let created = metadata.created().unwrap_or(modified);
            files.push(OutputFile {
                filename: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size_bytes: metadata.len(),
                created_at: iso_timestamp(created),
                modified_at: iso_timestamp(modified),
                modified,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified));
        let total = files.len();
        let files = files.into_iter().skip(offset).take(limit).collect();
        Ok(Some(OutputPage {
            files,
            total,
            limit,
            offset,
        }))
    }

    /// Maps a client supplied name to a file of the output directory. Only
    /// the final path component is honoured.
    pub async fn resolve(&self, filename: &str) -> Result<(String, PathBuf), OutputError> {
        let name = Path::new(filename)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| OutputError::NotFound(filename.to_string()))?;
        let path = self.save_path.join(&name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok((name, path)),
            _ => Err(OutputError::NotFound(name)),
        }
    }
}

fn iso_timestamp(time: SystemTime) -> String {
    DateTime::<Local>::from(time).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, bytes: &[u8], age_secs: u64) {
        std::fs::write(dir.join(name), bytes).unwrap();
        let file = File::options().write(true).open(dir.join(name)).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn classifies_extensions() {
        assert_eq!(FileKind::from_path(Path::new("clip.MP4")), FileKind::Video);
        assert_eq!(FileKind::from_path(Path::new("frame.jpeg")), FileKind::Image);
        assert_eq!(FileKind::from_path(Path::new("track.flac")), FileKind::Audio);
        assert_eq!(FileKind::from_path(Path::new("settings.json")), FileKind::Other);
        assert_eq!(media_type(Path::new("clip.mov")), "video/quicktime");
        assert_eq!(media_type(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = OutputRepository::new(dir.path().join("absent"));
        assert!(repo.list(50, 0, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_newest_first_with_filter_and_pagination() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "old.mp4", b"old", 300);
        touch(dir.path(), "mid.png", b"middle", 200);
        touch(dir.path(), "new.mp4", b"newest", 100);
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let repo = OutputRepository::new(dir.path());

        let page = repo.list(50, 0, None).await.unwrap().unwrap();
        let names: Vec<_> = page.files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["new.mp4", "mid.png", "old.mp4"]);
        assert_eq!(page.total, 3);
        assert_eq!(page.files[0].size_bytes, 6);

        let videos = repo.list(1, 1, Some("video")).await.unwrap().unwrap();
        assert_eq!(videos.total, 2);
        assert_eq!(videos.files.len(), 1);
        assert_eq!(videos.files[0].filename, "old.mp4");

        let none = repo.list(50, 0, Some("audio")).await.unwrap().unwrap();
        assert_eq!(none.total, 0);
    }

    #[tokio::test]
    async fn resolve_strips_directories() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "clip.mp4", b"data", 0);
        let repo = OutputRepository::new(dir.path());

        let (name, path) = repo.resolve("../../clip.mp4").await.unwrap();
        assert_eq!(name, "clip.mp4");
        assert_eq!(path, dir.path().join("clip.mp4"));
        assert!(matches!(
            repo.resolve("../secret.txt").await,
            Err(OutputError::NotFound(name)) if name == "secret.txt"
        ));
        assert!(matches!(repo.resolve("..").await, Err(OutputError::NotFound(_))));
    }
}
