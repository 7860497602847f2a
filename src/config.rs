use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// 可用的图生视频服务商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Dashscope,
    Kling,
}

/// 一次运行的完整配置，显式传入流水线入口，不依赖任何进程级全局状态
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// 工作目录，缓存与中间产物都放在这里
    pub work_dir: PathBuf,
    /// 语音合成使用的音色
    #[serde(default = "default_voice")]
    pub voice: String,
    /// 图生视频服务商
    pub provider: ProviderKind,
    /// 目标总时长（秒），与 global_speed 二选一
    #[serde(default)]
    pub target_total_duration: Option<f64>,
    /// 全局播放速度，<1 减速拉长，>1 加速压缩
    #[serde(default)]
    pub global_speed: Option<f64>,
    /// 并发生成的场景数上限，用于尊重外部 API 限流
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 单个场景生成任务的超时（秒），超时走降级路径
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// 背景音乐文件，缺省则只有画外音
    #[serde(default)]
    pub background_music: Option<PathBuf>,
    /// 背景音乐相对音量，画外音固定为 1.0
    #[serde(default = "default_music_gain")]
    pub music_gain: f64,
    /// 时长达到该阈值的分镜视为关键分镜
    #[serde(default = "default_key_scene_min_duration")]
    pub key_scene_min_duration: f64,
}

fn default_voice() -> String {
    "longxiaochun".to_string()
}

fn default_concurrency() -> usize {
    2
}

fn default_generation_timeout_secs() -> u64 {
    600
}

fn default_music_gain() -> f64 {
    0.2
}

fn default_key_scene_min_duration() -> f64 {
    4.0
}

impl PipelineConfig {
    pub fn new(work_dir: impl Into<PathBuf>, provider: ProviderKind) -> Self {
        Self {
            work_dir: work_dir.into(),
            voice: default_voice(),
            provider,
            target_total_duration: None,
            global_speed: None,
            concurrency: default_concurrency(),
            generation_timeout_secs: default_generation_timeout_secs(),
            background_music: None,
            music_gain: default_music_gain(),
            key_scene_min_duration: default_key_scene_min_duration(),
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// 校验速度参数二选一，在任何外部调用发生之前执行
    pub fn validate(&self) -> Result<()> {
        match (self.global_speed, self.target_total_duration) {
            (Some(_), Some(_)) => Err(PipelineError::ResolutionConflict(
                "both global_speed and target_total_duration were supplied".to_string(),
            )),
            (None, None) => Err(PipelineError::ResolutionConflict(
                "neither global_speed nor target_total_duration was supplied".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
