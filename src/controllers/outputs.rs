use crate::app_error::ApiError;
use crate::controllers::api_response::ApiResponse;
use crate::repositories::output_repository::{FileKind, OutputPage, media_type};
use crate::services::preview::{
    DEFAULT_PREVIEW_WIDTH, MAX_PREVIEW_WIDTH, MIN_PREVIEW_WIDTH, PreviewError, render_thumbnail,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

#[derive(Deserialize, Debug, Default)]
pub struct OutputQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    file_type: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct PreviewQuery {
    width: Option<u32>,
}

pub async fn get_outputs(
    State(state): State<AppState>,
    query: Result<Query<OutputQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<OutputPage>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    let offset = query.offset.unwrap_or(0);

    let page = state
        .outputs
        .list(limit, offset, query.file_type.as_deref())
        .await?;
    Ok(match page {
        Some(page) => ApiResponse::ok(format!("Found {} files", page.total), page),
        None => ApiResponse::ok(
            "No outputs found",
            OutputPage {
                files: Vec::new(),
                total: 0,
                limit,
                offset,
            },
        ),
    })
}

pub async fn get_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let (name, path) = state.outputs.resolve(&filename).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|err| ApiError::Internal(format!("Error reading '{}': {}", name, err)))?;

    Ok((
        [
            (header::CONTENT_TYPE, media_type(&path).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name.replace('"', "")),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub async fn get_preview(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    query: Result<Query<PreviewQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let width = query.width.unwrap_or(DEFAULT_PREVIEW_WIDTH);
    if !(MIN_PREVIEW_WIDTH..=MAX_PREVIEW_WIDTH).contains(&width) {
        return Err(ApiError::BadRequest(format!(
            "width must be between {} and {}",
            MIN_PREVIEW_WIDTH, MAX_PREVIEW_WIDTH
        )));
    }

    let (_, path) = state.outputs.resolve(&filename).await?;
    let kind = FileKind::from_path(&path);
    let jpeg = render_thumbnail(&state.config.server.ffmpeg, &path, kind, width)
        .await
        .map_err(|err| match (err, kind) {
            (PreviewError::Unsupported, _) => {
                ApiError::BadRequest(PreviewError::Unsupported.to_string())
            }
            (err @ PreviewError::Spawn(..), _) => {
                ApiError::Unavailable(format!("Preview generation not available: {}", err))
            }
            (_, FileKind::Video) => {
                ApiError::BadRequest("Could not generate video preview".to_string())
            }
            (err, _) => ApiError::Internal(format!("Error generating preview: {}", err)),
        })?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::{AttentionMode, Config};
    use crate::state::RuntimeSettings;
    use axum::http::StatusCode;

    fn state_with_ffmpeg(save_path: &std::path::Path, ffmpeg: &str) -> AppState {
        let mut config = Config::default();
        config.server.save_path = save_path.to_path_buf();
        config.server.ffmpeg = ffmpeg.to_string();
        AppState::new(
            config,
            RuntimeSettings {
                profile: 1,
                attention: AttentionMode::Sdpa,
            },
        )
    }

    fn state(save_path: &std::path::Path) -> AppState {
        state_with_ffmpeg(save_path, "definitely-not-an-ffmpeg-binary")
    }

    fn query<T>(value: T) -> Result<Query<T>, QueryRejection> {
        Ok(Query(value))
    }

    #[tokio::test]
    async fn empty_listing_when_directory_missing() {
        let dir = tempfile::tempdir().unwrap();
        let Json(response) = get_outputs(
            State(state(&dir.path().join("none"))),
            query(OutputQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(response.message, "No outputs found");
        assert_eq!(response.data.unwrap().total, 0);
    }

    #[tokio::test]
    async fn listing_validates_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"a").unwrap();
        let state = state(dir.path());

        let Json(response) = get_outputs(State(state.clone()), query(OutputQuery::default()))
            .await
            .unwrap();
        assert_eq!(response.message, "Found 1 files");
        assert_eq!(response.data.unwrap().limit, DEFAULT_LIMIT);

        let err = get_outputs(
            State(state),
            query(OutputQuery {
                limit: Some(500),
                ..Default::default()
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_sets_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.webm"), b"webm-bytes").unwrap();
        let state = state(dir.path());

        let response = get_download(State(state.clone()), Path("clip.webm".to_string()))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/webm");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"clip.webm\""
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"webm-bytes");

        let err = get_download(State(state), Path("missing.mp4".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "File 'missing.mp4' not found");
    }

    #[tokio::test]
    async fn preview_without_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame.png", "track.wav"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let state = state(dir.path());
        let preview = |name: &str, width: Option<u32>| {
            get_preview(
                State(state.clone()),
                Path(name.to_string()),
                query(PreviewQuery { width }),
            )
        };

        let err = preview("track.wav", None).await.err().unwrap();
        assert_eq!(err.to_string(), "Preview not available for this file type");
        let err = preview("frame.png", None).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err = preview("frame.png", Some(8)).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = preview("nope.png", None).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn preview_failures_depend_on_file_type() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["clip.mp4", "frame.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        // `false` exits non-zero like ffmpeg does on an undecodable input.
        let state = state_with_ffmpeg(dir.path(), "false");

        let err = get_preview(
            State(state.clone()),
            Path("clip.mp4".to_string()),
            query(PreviewQuery::default()),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "Could not generate video preview");

        let err = get_preview(
            State(state),
            Path("frame.png".to_string()),
            query(PreviewQuery::default()),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
