use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use tracing::info;

use crate::error::{PipelineError, Result};

pub const OUTPUT_WIDTH: u32 = 2048;
pub const OUTPUT_HEIGHT: u32 = 1152;
pub const FPS: u32 = 30;

/// Ken Burns 效果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KenBurnsEffect {
    ZoomIn,
    ZoomOut,
    PanRight,
    PanLeft,
    Diagonal,
}

const EFFECT_ROTATION: [KenBurnsEffect; 5] = [
    KenBurnsEffect::ZoomIn,
    KenBurnsEffect::ZoomOut,
    KenBurnsEffect::PanRight,
    KenBurnsEffect::PanLeft,
    KenBurnsEffect::Diagonal,
];

impl KenBurnsEffect {
    /// 按分镜序号轮换效果，避免相邻场景观感重复
    pub fn for_index(index: usize) -> Self {
        EFFECT_ROTATION[index % EFFECT_ROTATION.len()]
    }

    /// 生成 zoompan 滤镜串（先等比裁到 16:9 再缩放平移）
    pub fn filter(&self, duration: f64) -> String {
        let frames = (duration * FPS as f64) as u32;
        let size = format!("{OUTPUT_WIDTH}x{OUTPUT_HEIGHT}");
        let scale = "scale='if(eq(iw/ih,16/9),iw,ih*16/9)':'if(eq(iw/ih,16/9),ih,iw*9/16)'";

        let zoompan = match self {
            KenBurnsEffect::ZoomIn => format!(
                "zoompan=z='min(zoom+0.001,1.3)':d={frames}:s={size}:\
                 x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)'"
            ),
            KenBurnsEffect::ZoomOut => format!(
                "zoompan=z='if(lte(zoom,1.0),1.3,max(1.0,zoom-0.001))':d={frames}:s={size}:\
                 x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)'"
            ),
            KenBurnsEffect::PanRight => format!(
                "zoompan=z='1.2':d={frames}:s={size}:\
                 x='min(iw/zoom/2,iw-iw/zoom-iw/zoom*t/{duration})':y='ih/2-(ih/zoom/2)'"
            ),
            KenBurnsEffect::PanLeft => format!(
                "zoompan=z='1.2':d={frames}:s={size}:\
                 x='iw-iw/zoom-min(iw/zoom/2,iw-iw/zoom-iw/zoom*t/{duration})':y='ih/2-(ih/zoom/2)'"
            ),
            KenBurnsEffect::Diagonal => format!(
                "zoompan=z='min(zoom+0.0008,1.2)':d={frames}:s={size}:\
                 x='iw/2-(iw/zoom/2)-iw/zoom*0.3*t/{duration}':y='ih/2-(ih/zoom/2)-ih/zoom*0.2*t/{duration}'"
            ),
        };

        format!("{scale},{zoompan}")
    }
}

/// 程序化动画引擎：给定有效图片必定产出精确时长的视频
#[async_trait]
pub trait Animator: Send + Sync {
    async fn animate(
        &self,
        image: &Path,
        duration: f64,
        effect: KenBurnsEffect,
        output: &Path,
    ) -> Result<()>;
}

/// 用 FFmpeg zoompan 实现的 Ken Burns 动画
pub struct KenBurnsAnimator;

#[async_trait]
impl Animator for KenBurnsAnimator {
    async fn animate(
        &self,
        image: &Path,
        duration: f64,
        effect: KenBurnsEffect,
        output: &Path,
    ) -> Result<()> {
        info!(
            "Creating {:?} animation ({:.2}s) from {}",
            effect,
            duration,
            image.display()
        );

        let cmd = Command::new("ffmpeg")
            .args(["-y", "-loop", "1", "-i"])
            .arg(image)
            .args([
                "-vf",
                &effect.filter(duration),
                "-t",
                &format!("{duration:.3}"),
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-r",
                &FPS.to_string(),
            ])
            .arg(output)
            .output()
            .map_err(|e| PipelineError::FfmpegError(format!("Failed to run FFmpeg: {e}")))?;

        if !cmd.status.success() {
            let error = String::from_utf8_lossy(&cmd.stderr);
            return Err(PipelineError::FfmpegError(format!(
                "FFmpeg animation failed: {error}"
            )));
        }
        Ok(())
    }
}
