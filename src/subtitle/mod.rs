use crate::error::{PipelineError, Result};
use crate::scene::Scene;
use crate::timeline::Timeline;

/// 一条字幕，起止时刻原样取自时间轴条目
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// 把时间轴投影成字幕轨：只有台词非空的场景产生字幕
///
/// 文本原样传递，换行排版是渲染侧的事情，这里不做。
pub fn cues_from_timeline(timeline: &Timeline, scenes: &[Scene]) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    let mut index = 1;

    for entry in &timeline.entries {
        let Some(scene) = scenes.iter().find(|s| s.id == entry.scene_id) else {
            continue;
        };
        if scene.narration_text.trim().is_empty() {
            continue;
        }
        cues.push(SubtitleCue {
            index,
            start: entry.start,
            end: entry.end,
            text: scene.narration_text.clone(),
        });
        index += 1;
    }

    cues
}

/// 秒数转 SRT 时间格式 (HH:MM:SS,mmm)
///
/// 毫秒截断而不是四舍五入，与常见字幕渲染器的预期一致。
pub fn format_srt_time(seconds: f64) -> String {
    // 1e-6 只抵消浮点表示误差，不构成四舍五入
    let total_millis = ((seconds.max(0.0) * 1000.0) + 1e-6).floor() as u64;

    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;

    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

fn parse_srt_time(text: &str) -> Result<f64> {
    let bad = || PipelineError::SubtitleError(format!("unrecognized timestamp: '{text}'"));

    let (hms, millis) = text.trim().split_once(',').ok_or_else(bad)?;
    let parts: Vec<&str> = hms.split(':').collect();
    if parts.len() != 3 {
        return Err(bad());
    }

    let hours: u64 = parts[0].parse().map_err(|_| bad())?;
    let minutes: u64 = parts[1].parse().map_err(|_| bad())?;
    let secs: u64 = parts[2].parse().map_err(|_| bad())?;
    let millis: u64 = millis.trim().parse().map_err(|_| bad())?;

    let total_millis = ((hours * 60 + minutes) * 60 + secs) * 1000 + millis;
    Ok(total_millis as f64 / 1000.0)
}

/// 序列化成 SRT 文本，编号从 1 开始连续递增
pub fn to_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();

    for cue in cues {
        out.push_str(&cue.index.to_string());
        out.push('\n');
        out.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(cue.start),
            format_srt_time(cue.end)
        ));
        out.push_str(&cue.text);
        out.push_str("\n\n");
    }

    out
}

/// 解析 SRT 文本，用于回读校验
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleCue>> {
    let mut cues = Vec::new();

    for block in content.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }

        let mut lines = block.lines();
        let index: usize = lines
            .next()
            .ok_or_else(|| PipelineError::SubtitleError("empty cue block".to_string()))?
            .trim()
            .parse()
            .map_err(|_| PipelineError::SubtitleError("cue index is not a number".to_string()))?;

        let time_line = lines
            .next()
            .ok_or_else(|| PipelineError::SubtitleError("cue block missing time range".to_string()))?;
        let (start, end) = time_line
            .split_once("-->")
            .ok_or_else(|| PipelineError::SubtitleError(format!("missing '-->' in '{time_line}'")))?;

        let text = lines.collect::<Vec<_>>().join("\n");

        cues.push(SubtitleCue {
            index,
            start: parse_srt_time(start)?,
            end: parse_srt_time(end)?,
            text,
        });
    }

    Ok(cues)
}
