use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 判定关键分镜时匹配的动作词汇
const MOTION_KEYWORDS: &[&str] = &[
    "飞行", "移动", "奔跑", "跳跃", "旋转", "飘动", "流动", "生长",
];

/// 表示一个场景/分镜
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    /// 稳定唯一标识，同时作为缓存键和文件命名键
    pub id: String,
    /// 在固定序列中的位置，创作完成后不再重排
    #[serde(default)]
    pub order_index: usize,
    /// 创作时设定的目标时长（秒），是设计意图而非硬约束
    pub nominal_duration: f64,
    /// 对应的台词/画外音文本，可为空（无声场景）
    #[serde(default)]
    pub narration_text: String,
    /// 场景描述文本，用作视频生成提示词
    #[serde(default)]
    pub description: String,
    /// 起始参考图路径
    #[serde(default)]
    pub reference_image: Option<PathBuf>,
    /// 显式标记为关键分镜
    #[serde(default)]
    pub key: bool,
}

impl Scene {
    pub fn new(id: impl Into<String>, order_index: usize, nominal_duration: f64) -> Self {
        Self {
            id: id.into(),
            order_index,
            nominal_duration,
            narration_text: String::new(),
            description: String::new(),
            reference_image: None,
            key: false,
        }
    }

    /// 判断是否为关键分镜（需要动态生成的视频）
    ///
    /// 判断标准按优先级依次为：显式标记、时长阈值、描述中的动作词汇，
    /// 先命中者生效。
    pub fn is_key_scene(&self, min_duration: f64) -> bool {
        if self.key {
            return true;
        }
        if self.nominal_duration >= min_duration {
            return true;
        }
        MOTION_KEYWORDS
            .iter()
            .any(|kw| self.description.contains(kw) || self.narration_text.contains(kw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(duration: f64) -> Scene {
        Scene::new("scene_01", 0, duration)
    }

    #[test]
    fn explicit_flag_wins() {
        let mut s = scene(1.0);
        s.key = true;
        assert!(s.is_key_scene(4.0));
    }

    #[test]
    fn duration_threshold_marks_key_scene() {
        assert!(scene(4.0).is_key_scene(4.0));
        assert!(!scene(3.9).is_key_scene(4.0));
    }

    #[test]
    fn motion_keyword_marks_key_scene() {
        let mut s = scene(2.0);
        s.description = "白鹤在云间飞行".to_string();
        assert!(s.is_key_scene(4.0));

        let mut quiet = scene(2.0);
        quiet.description = "一盏油灯静静燃烧".to_string();
        assert!(!quiet.is_key_scene(4.0));
    }

    #[test]
    fn keyword_in_narration_also_counts() {
        let mut s = scene(2.0);
        s.narration_text = "江水奔流，文脉流动不息".to_string();
        assert!(s.is_key_scene(4.0));
    }
}
