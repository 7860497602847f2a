pub mod ffmpeg;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::asset::RenderedAsset;
use crate::error::{PipelineError, Result};
use crate::timeline::Timeline;

/// 一个场景进入同步器时的媒体素材
///
/// 视频必定存在（程序化动画保底），音频可缺（无声场景或合成失败）。
#[derive(Debug, Clone)]
pub struct SceneMedia {
    pub audio: Option<RenderedAsset>,
    pub video: RenderedAsset,
    /// 时长裁决阶段要求的视频拉伸系数，原样传给渲染引擎
    pub video_stretch_factor: Option<f64>,
}

/// 画外音轨上单个场景的来源
#[derive(Debug, Clone, PartialEq)]
pub enum NarrationSource {
    /// 现有音频：按全局速度变速，再裁剪/补静音到场景时长
    Stretched { path: PathBuf, tempo: f64 },
    /// 合成等长静音
    Silence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NarrationSegment {
    pub scene_id: String,
    pub source: NarrationSource,
    /// 调速后的场景时长，即该片段在成品里的精确长度
    pub duration: f64,
}

/// 画外音轨的渲染指令：按时间轴顺序的片段操作加一次拼接
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationPlan {
    pub segments: Vec<NarrationSegment>,
}

impl NarrationPlan {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSegment {
    pub scene_id: String,
    pub path: PathBuf,
    pub stretch_factor: Option<f64>,
    pub duration: f64,
}

/// 视频拼接指令，与画外音计划按下标严格对齐
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPlan {
    pub segments: Vec<VideoSegment>,
}

/// 混音指令：画外音轨定基准时长，背景音乐循环后截到该长度
#[derive(Debug, Clone, PartialEq)]
pub struct MixPlan {
    pub narration_gain: f64,
    pub music: Option<PathBuf>,
    pub music_gain: f64,
    /// 成品总时长，等于画外音轨长度
    pub duration: f64,
}

fn media_for<'a>(
    media: &'a HashMap<String, SceneMedia>,
    scene_id: &str,
) -> Result<&'a SceneMedia> {
    media.get(scene_id).ok_or_else(|| {
        // 时间轴里出现了没有素材的场景，说明上游出了内部错误
        PipelineError::TimelineInvariantViolation(format!(
            "timeline entry {scene_id} has no prepared media"
        ))
    })
}

/// 把时间轴投影成画外音轨指令
///
/// 顺序就是时间轴顺序，这里从不重排；变速统一使用全局系数。
pub fn plan_narration(
    timeline: &Timeline,
    media: &HashMap<String, SceneMedia>,
) -> Result<NarrationPlan> {
    let mut segments = Vec::with_capacity(timeline.entries.len());

    for entry in &timeline.entries {
        let scene = media_for(media, &entry.scene_id)?;
        let duration = entry.end - entry.start;
        let source = match &scene.audio {
            Some(audio) => NarrationSource::Stretched {
                path: audio.path.clone(),
                tempo: timeline.global_speed,
            },
            None => NarrationSource::Silence,
        };
        segments.push(NarrationSegment {
            scene_id: entry.scene_id.clone(),
            source,
            duration,
        });
    }

    Ok(NarrationPlan { segments })
}

/// 把时间轴投影成视频拼接指令，与画外音计划逐下标对齐
pub fn plan_video(
    timeline: &Timeline,
    media: &HashMap<String, SceneMedia>,
) -> Result<VideoPlan> {
    let mut segments = Vec::with_capacity(timeline.entries.len());

    for entry in &timeline.entries {
        let scene = media_for(media, &entry.scene_id)?;
        segments.push(VideoSegment {
            scene_id: entry.scene_id.clone(),
            path: scene.video.path.clone(),
            stretch_factor: scene.video_stretch_factor,
            duration: entry.end - entry.start,
        });
    }

    Ok(VideoPlan { segments })
}

/// 混音权重固定由配置给定，从不根据内容自适应
pub fn plan_mix(narration: &NarrationPlan, music: Option<PathBuf>, music_gain: f64) -> MixPlan {
    MixPlan {
        narration_gain: 1.0,
        music,
        music_gain,
        duration: narration.total_duration(),
    }
}
