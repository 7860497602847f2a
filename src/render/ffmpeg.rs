use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::animation::{FPS, OUTPUT_HEIGHT, OUTPUT_WIDTH};
use crate::asset::cache::MediaProbe;
use crate::asset::{AssetKind, AssetSource, RenderedAsset};
use crate::error::{PipelineError, Result};
use crate::render::{MixPlan, NarrationPlan, NarrationSource, VideoPlan, VideoSegment};

/// 通过 ffprobe 实测媒体时长
pub struct FfprobeProbe;

impl MediaProbe for FfprobeProbe {
    fn duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .map_err(|e| PipelineError::FfmpegError(format!("Failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::FfmpegError(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                error
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse()
            .map_err(|_| PipelineError::FfmpegError(format!("unreadable duration: {text}")))
    }
}

/// concat demuxer 列表的一行，单引号按 FFmpeg 规则转义
fn concat_entry(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', "'\\''");
    format!("file '{escaped}'\n")
}

/// 现有音频片段的滤镜：全局变速后补静音并裁到精确时长
fn narration_filter(tempo: f64, duration: f64) -> String {
    format!("atempo={tempo},apad,atrim=0:{duration:.3}")
}

/// 视频片段时间拉伸的滤镜，系数大于 1 表示拉长
fn stretch_filter(factor: f64) -> String {
    format!("setpts={factor}*PTS")
}

/// 把任意来源的片段统一到同一分辨率和帧率
fn normalize_filter() -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,fps={fps}",
        w = OUTPUT_WIDTH,
        h = OUTPUT_HEIGHT,
        fps = FPS
    )
}

/// 单个视频片段的预处理参数：可选拉伸、统一格式、裁到计划时长
///
/// 计划里的时长是调速后的值，而视频轨在全局调速之前拼接，
/// 所以这里裁到 `duration * global_speed`。服务商返回的素材常比
/// 裁决时长长（按 5s/10s 档位生成），不裁会让后续场景整体错位。
fn video_segment_args(segment: &VideoSegment, global_speed: f64, out: &Path) -> Vec<String> {
    let source_duration = segment.duration * global_speed;

    let mut filter = String::new();
    if let Some(factor) = segment.stretch_factor {
        filter.push_str(&stretch_filter(factor));
        filter.push(',');
    }
    filter.push_str(&normalize_filter());

    vec![
        "-i".into(),
        segment.path.to_string_lossy().into_owned(),
        "-filter:v".into(),
        filter,
        "-t".into(),
        format!("{source_duration:.3}"),
        "-an".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "medium".into(),
        "-crf".into(),
        "23".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        out.to_string_lossy().into_owned(),
    ]
}

/// 最终合成的 filter_complex：全局调速、字幕烧录、画外音与循环 BGM 混音
fn compose_filter(global_speed: f64, subtitle_file: Option<&Path>, mix: &MixPlan) -> String {
    let mut filter = format!("[0:v]setpts={}*PTS[v_speed];", 1.0 / global_speed);

    match subtitle_file {
        Some(srt) => filter.push_str(&format!(
            "[v_speed]subtitles={}:force_style='FontSize=24,Outline=2,MarginV=20'[v_out];",
            srt.display()
        )),
        None => filter.push_str("[v_speed]null[v_out];"),
    }

    match &mix.music {
        Some(_) => filter.push_str(&format!(
            "[2:a]aloop=loop=-1:size=2e+09[bgm_loop];\
             [1:a][bgm_loop]amix=inputs=2:duration=first:weights={} {}[a_out]",
            mix.narration_gain, mix.music_gain
        )),
        None => filter.push_str("[1:a]anull[a_out]"),
    }

    filter
}

/// 把同步器产出的渲染指令交给 FFmpeg 执行
///
/// 引擎核心从不接触音视频采样，所有解码编码都发生在这里。
pub struct FfmpegRenderer {
    work_dir: PathBuf,
}

impl FfmpegRenderer {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    fn run_ffmpeg(&self, args: Vec<String>) -> Result<()> {
        let output = Command::new("ffmpeg")
            .arg("-y")
            .args(&args)
            .output()
            .map_err(|e| PipelineError::FfmpegError(format!("Failed to run FFmpeg: {e}")))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::FfmpegError(format!(
                "FFmpeg failed: {error}"
            )));
        }
        Ok(())
    }

    /// 合成指定时长的静音片段
    fn synthesize_silence(&self, scene_id: &str, duration: f64) -> Result<RenderedAsset> {
        let path = self.work_dir.join(format!("{scene_id}_silence.mp3"));
        self.run_ffmpeg(vec![
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            "anullsrc=r=44100:cl=stereo".into(),
            "-t".into(),
            format!("{duration:.3}"),
            "-c:a".into(),
            "libmp3lame".into(),
            "-b:a".into(),
            "192k".into(),
            path.to_string_lossy().into_owned(),
        ])?;

        Ok(RenderedAsset {
            kind: AssetKind::Audio,
            scene_id: scene_id.to_string(),
            path,
            actual_duration: duration,
            source: AssetSource::SynthesizedSilence,
        })
    }

    /// 按计划逐段落地画外音轨并拼接
    pub fn render_narration(&self, plan: &NarrationPlan, output: &Path) -> Result<()> {
        info!("Rendering narration track ({} segments)", plan.segments.len());

        let mut concat_content = String::new();

        for segment in &plan.segments {
            let segment_path = match &segment.source {
                NarrationSource::Silence => {
                    self.synthesize_silence(&segment.scene_id, segment.duration)?.path
                }
                NarrationSource::Stretched { path, tempo } => {
                    let out = self
                        .work_dir
                        .join(format!("{}_synced.mp3", segment.scene_id));
                    self.run_ffmpeg(vec![
                        "-i".into(),
                        path.to_string_lossy().into_owned(),
                        "-filter:a".into(),
                        narration_filter(*tempo, segment.duration),
                        "-c:a".into(),
                        "libmp3lame".into(),
                        "-b:a".into(),
                        "192k".into(),
                        out.to_string_lossy().into_owned(),
                    ])?;
                    out
                }
            };
            concat_content.push_str(&concat_entry(&segment_path));
        }

        let list_file = self.work_dir.join("narration_list.txt");
        std::fs::write(&list_file, concat_content)?;

        self.run_ffmpeg(vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_file.to_string_lossy().into_owned(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "192k".into(),
            output.to_string_lossy().into_owned(),
        ])?;

        std::fs::remove_file(&list_file).ok();
        Ok(())
    }

    /// 逐段把素材规整成统一格式并裁到计划时长，再拼接视频轨
    pub fn render_video(&self, plan: &VideoPlan, global_speed: f64, output: &Path) -> Result<()> {
        info!("Rendering video track ({} segments)", plan.segments.len());

        let mut concat_content = String::new();

        for segment in &plan.segments {
            let out = self.work_dir.join(format!("{}_cut.mp4", segment.scene_id));
            self.run_ffmpeg(video_segment_args(segment, global_speed, &out))?;
            concat_content.push_str(&concat_entry(&out));
        }

        let list_file = self.work_dir.join("video_list.txt");
        std::fs::write(&list_file, concat_content)?;

        // 片段已统一编码参数，拼接可以流复制
        self.run_ffmpeg(vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_file.to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            output.to_string_lossy().into_owned(),
        ])?;

        std::fs::remove_file(&list_file).ok();
        Ok(())
    }

    /// 最终合成：全局调速、字幕、画外音与 BGM 混音
    ///
    /// 成品时长以画外音轨为准（`duration=first` 加 `-shortest`）。
    pub fn compose(
        &self,
        video_track: &Path,
        narration_track: &Path,
        mix: &MixPlan,
        global_speed: f64,
        subtitle_file: Option<&Path>,
        output: &Path,
    ) -> Result<()> {
        info!("Composing final video: {}", output.display());

        let mut args = vec![
            "-i".to_string(),
            video_track.to_string_lossy().into_owned(),
            "-i".to_string(),
            narration_track.to_string_lossy().into_owned(),
        ];

        if let Some(music) = &mix.music {
            args.push("-stream_loop".into());
            args.push("-1".into());
            args.push("-i".into());
            args.push(music.to_string_lossy().into_owned());
        }

        args.extend([
            "-filter_complex".to_string(),
            compose_filter(global_speed, subtitle_file, mix),
            "-map".to_string(),
            "[v_out]".to_string(),
            "-map".to_string(),
            "[a_out]".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-shortest".to_string(),
            output.to_string_lossy().into_owned(),
        ]);

        self.run_ffmpeg(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_entries_escape_single_quotes() {
        let entry = concat_entry(Path::new("/tmp/scene's clip.mp4"));
        assert_eq!(entry, "file '/tmp/scene'\\''s clip.mp4'\n");
    }

    #[test]
    fn narration_filter_stretches_then_pads_then_trims() {
        assert_eq!(
            narration_filter(1.25, 3.76),
            "atempo=1.25,apad,atrim=0:3.760"
        );
    }

    #[test]
    fn stretch_filter_multiplies_pts() {
        assert_eq!(stretch_filter(1.7), "setpts=1.7*PTS");
    }

    #[test]
    fn video_segments_are_trimmed_to_their_pre_speed_length() {
        // 计划时长 6 秒、全局速度 1.25 ⇒ 调速前的素材裁到 7.5 秒
        let segment = VideoSegment {
            scene_id: "s2".to_string(),
            path: PathBuf::from("s2.mp4"),
            stretch_factor: None,
            duration: 6.0,
        };
        let args = video_segment_args(&segment, 1.25, Path::new("/tmp/s2_cut.mp4"));

        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "7.500");

        let args = video_segment_args(&segment, 1.0, Path::new("/tmp/s2_cut.mp4"));
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "6.000");
    }

    #[test]
    fn mixed_sources_are_normalized_to_one_format() {
        let segment = VideoSegment {
            scene_id: "s1".to_string(),
            path: PathBuf::from("s1.mp4"),
            stretch_factor: Some(1.175),
            duration: 4.7,
        };
        let args = video_segment_args(&segment, 1.0, Path::new("/tmp/s1_cut.mp4"));

        let f = args.iter().position(|a| a == "-filter:v").unwrap();
        assert!(args[f + 1].starts_with("setpts=1.175*PTS,"));
        assert!(args[f + 1].contains("scale=2048:1152"));
        assert!(args[f + 1].contains("fps=30"));
        // 每个片段都重新编码，拼接输入因此是同构的
        assert!(args.contains(&"libx264".to_string()));
    }

    #[test]
    fn compose_filter_mixes_bgm_at_fixed_weights() {
        let mix = MixPlan {
            narration_gain: 1.0,
            music: Some(PathBuf::from("bgm.mp3")),
            music_gain: 0.2,
            duration: 15.76,
        };
        let filter = compose_filter(0.92, None, &mix);
        assert!(filter.contains("aloop=loop=-1"));
        assert!(filter.contains("amix=inputs=2:duration=first:weights=1 0.2"));
        assert!(filter.starts_with(&format!("[0:v]setpts={}*PTS", 1.0 / 0.92)));
    }

    #[test]
    fn compose_filter_without_music_keeps_narration_only() {
        let mix = MixPlan {
            narration_gain: 1.0,
            music: None,
            music_gain: 0.2,
            duration: 10.0,
        };
        let filter = compose_filter(1.0, None, &mix);
        assert!(filter.ends_with("[1:a]anull[a_out]"));
        assert!(!filter.contains("amix"));
    }
}
