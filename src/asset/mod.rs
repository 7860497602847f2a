pub mod cache;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 媒体种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Audio,
    Video,
}

impl AssetKind {
    pub fn extension(&self) -> &'static str {
        match self {
            AssetKind::Audio => "mp3",
            AssetKind::Video => "mp4",
        }
    }
}

/// 产物的来源，用于汇总与日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSource {
    CacheHit,
    Generated,
    SynthesizedSilence,
    ProceduralFallback,
}

/// 某个场景某种媒体生成完成后的产物，创建后不可变
#[derive(Debug, Clone)]
pub struct RenderedAsset {
    pub kind: AssetKind,
    pub scene_id: String,
    pub path: PathBuf,
    /// 实测时长（秒），产物存在后以它为准
    pub actual_duration: f64,
    pub source: AssetSource,
}
