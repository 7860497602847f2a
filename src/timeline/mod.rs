pub mod resolve;
pub mod speed;

use serde::Serialize;

pub use resolve::{base_duration, resolve_scene, ResolvedScene, AUDIO_TAIL_BUFFER};
pub use speed::plan_global_speed;

use crate::error::{PipelineError, Result};

/// 浮点时间比较的容差（秒）
pub const TIME_EPSILON: f64 = 1e-6;

/// 时间轴上的一个条目，区间为 [start, end)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub scene_id: String,
    pub start: f64,
    pub end: f64,
}

/// 全局唯一的权威时间轴
///
/// 由构建器独占产出，下游同步器只读；调速从不就地修改，
/// 而是产出一条新的时间轴。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub global_speed: f64,
    pub entries: Vec<TimelineEntry>,
}

impl Timeline {
    /// 按 order_index 顺序折叠出时间轴
    ///
    /// 每个场景的时长除以全局速度：速度小于 1 时所有场景等比拉长，
    /// 与 `setpts=1/speed` 的语义一致。
    pub fn build(resolved: &[ResolvedScene], global_speed: f64) -> Result<Timeline> {
        let mut entries = Vec::with_capacity(resolved.len());
        let mut start = 0.0;

        for scene in resolved {
            let scaled = scene.final_duration / global_speed;
            let entry = TimelineEntry {
                scene_id: scene.scene_id.clone(),
                start,
                end: start + scaled,
            };
            start = entry.end;
            entries.push(entry);
        }

        let timeline = Timeline {
            global_speed,
            entries,
        };
        timeline.validate()?;
        Ok(timeline)
    }

    pub fn total_duration(&self) -> f64 {
        self.entries.last().map(|e| e.end).unwrap_or(0.0)
    }

    /// 校验条目连续且严格递增
    ///
    /// 违反说明内部逻辑出了错，必须立刻失败，绝不悄悄修正。
    pub fn validate(&self) -> Result<()> {
        if let Some(first) = self.entries.first() {
            if first.start.abs() > TIME_EPSILON {
                return Err(PipelineError::TimelineInvariantViolation(format!(
                    "first entry starts at {} instead of 0",
                    first.start
                )));
            }
        }

        for pair in self.entries.windows(2) {
            if (pair[0].end - pair[1].start).abs() > TIME_EPSILON {
                return Err(PipelineError::TimelineInvariantViolation(format!(
                    "gap between {} (end {}) and {} (start {})",
                    pair[0].scene_id, pair[0].end, pair[1].scene_id, pair[1].start
                )));
            }
        }

        for entry in &self.entries {
            if entry.end - entry.start <= 0.0 {
                return Err(PipelineError::TimelineInvariantViolation(format!(
                    "entry {} has non-positive duration ({} -> {})",
                    entry.scene_id, entry.start, entry.end
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(id: &str, duration: f64) -> ResolvedScene {
        ResolvedScene {
            scene_id: id.to_string(),
            final_duration: duration,
            video_stretch_factor: None,
            audio_pad_duration: None,
        }
    }

    #[test]
    fn unit_speed_timeline_matches_final_durations() {
        // 标称 [5, 3, 10]，场景 2 有 4.2 秒画外音 ⇒ 最终 [5, 4.7, 10]
        let scenes = [resolved("s1", 5.0), resolved("s2", 4.7), resolved("s3", 10.0)];
        let timeline = Timeline::build(&scenes, 1.0).unwrap();

        let expected = [(0.0, 5.0), (5.0, 9.7), (9.7, 19.7)];
        for (entry, (start, end)) in timeline.entries.iter().zip(expected) {
            assert!((entry.start - start).abs() < TIME_EPSILON);
            assert!((entry.end - end).abs() < TIME_EPSILON);
        }
        assert!((timeline.total_duration() - 19.7).abs() < TIME_EPSILON);
    }

    #[test]
    fn target_duration_is_hit_exactly() {
        let scenes = [resolved("s1", 5.0), resolved("s2", 4.7), resolved("s3", 10.0)];
        let speed = plan_global_speed(19.7, None, Some(15.76)).unwrap();
        let timeline = Timeline::build(&scenes, speed).unwrap();
        assert!((timeline.total_duration() - 15.76).abs() < 1e-9);
    }

    #[test]
    fn entries_are_contiguous_for_any_speed() {
        let scenes = [resolved("a", 2.5), resolved("b", 7.1), resolved("c", 0.4)];
        for speed in [0.25, 0.5, 0.92, 1.0, 1.25, 1.5, 3.0] {
            let timeline = Timeline::build(&scenes, speed).unwrap();
            assert!(timeline.validate().is_ok());
            assert!(timeline.entries[0].start.abs() < TIME_EPSILON);
            // 缩放不改变先后次序
            for pair in timeline.entries.windows(2) {
                assert!(pair[0].start < pair[1].start);
            }
        }
    }

    #[test]
    fn timeline_serializes_for_plan_inspection() {
        let scenes = [resolved("s1", 5.0)];
        let timeline = Timeline::build(&scenes, 1.25).unwrap();
        let json = serde_json::to_string(&timeline).unwrap();
        assert!(json.contains("\"global_speed\":1.25"));
        assert!(json.contains("\"scene_id\":\"s1\""));
    }

    #[test]
    fn empty_timeline_is_valid() {
        let timeline = Timeline::build(&[], 1.0).unwrap();
        assert_eq!(timeline.total_duration(), 0.0);
    }

    #[test]
    fn validate_rejects_gaps() {
        let timeline = Timeline {
            global_speed: 1.0,
            entries: vec![
                TimelineEntry {
                    scene_id: "a".to_string(),
                    start: 0.0,
                    end: 2.0,
                },
                TimelineEntry {
                    scene_id: "b".to_string(),
                    start: 3.0,
                    end: 4.0,
                },
            ],
        };
        assert!(matches!(
            timeline.validate(),
            Err(PipelineError::TimelineInvariantViolation(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_duration_entries() {
        let timeline = Timeline {
            global_speed: 1.0,
            entries: vec![TimelineEntry {
                scene_id: "a".to_string(),
                start: 0.0,
                end: 0.0,
            }],
        };
        assert!(timeline.validate().is_err());
    }
}
