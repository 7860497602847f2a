use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("asset unavailable for scene {scene_id}: {reason}")]
    AssetUnavailable { scene_id: String, reason: String },

    #[error("speed resolution conflict: {0}")]
    ResolutionConflict(String),

    #[error("timeline invariant violation: {0}")]
    TimelineInvariantViolation(String),

    #[error("cache corruption at {path}: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("scene resolution error: {0}")]
    SceneError(String),

    #[error("subtitle parse error: {0}")]
    SubtitleError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("FFmpeg error: {0}")]
    FfmpegError(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
