use tracing::debug;

use crate::asset::RenderedAsset;
use crate::error::{PipelineError, Result};
use crate::scene::Scene;

/// 留给尾音的缓冲时长（秒），保证视频不会切断收尾的语音
pub const AUDIO_TAIL_BUFFER: f64 = 0.5;

/// 场景时长裁决的结果
///
/// 拉伸系数与补静音时长只是给渲染引擎的指令，本组件从不实际应用。
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScene {
    pub scene_id: String,
    /// 裁决后的最终时长（秒），尚未应用全局速度
    pub final_duration: f64,
    /// 视频需要的时间拉伸系数；不需要时为 None
    pub video_stretch_factor: Option<f64>,
    /// 音频需要补的静音时长；无音频时为 None
    pub audio_pad_duration: Option<f64>,
}

/// 场景的基准时长：无音频时取创作时长，有音频时保证尾音放得下
pub fn base_duration(scene: &Scene, audio: Option<&RenderedAsset>) -> f64 {
    match audio {
        Some(a) => scene.nominal_duration.max(a.actual_duration + AUDIO_TAIL_BUFFER),
        None => scene.nominal_duration,
    }
}

/// 裁决单个场景的最终时长以及各媒体需要的修正动作
///
/// 视频比基准时长短且不允许循环拼接（重复播放视觉上很突兀）时，
/// 请求按 `base / actual` 做时间拉伸；视频偏长则不在这里处理，
/// 渲染阶段按计划时长逐段裁剪。
pub fn resolve_scene(
    scene: &Scene,
    audio: Option<&RenderedAsset>,
    video: Option<&RenderedAsset>,
) -> Result<ResolvedScene> {
    let mut base = base_duration(scene, audio);

    // 创作时长缺失时退回视频实测时长
    if base <= 0.0 {
        match video {
            Some(v) if v.actual_duration > 0.0 => base = v.actual_duration,
            _ => {
                return Err(PipelineError::SceneError(format!(
                    "scene {} has neither a nominal duration nor any usable asset",
                    scene.id
                )))
            }
        }
    }

    let video_stretch_factor = video.and_then(|v| {
        if v.actual_duration > 0.0 && v.actual_duration < base {
            Some(base / v.actual_duration)
        } else {
            None
        }
    });

    let audio_pad_duration = audio.map(|a| (base - a.actual_duration).max(0.0));

    debug!(
        "Resolved scene {}: {:.2}s (stretch: {:?})",
        scene.id, base, video_stretch_factor
    );

    Ok(ResolvedScene {
        scene_id: scene.id.clone(),
        final_duration: base,
        video_stretch_factor,
        audio_pad_duration,
    })
}
