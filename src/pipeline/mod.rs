use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::animation::{Animator, KenBurnsEffect};
use crate::api::{SpeechProvider, VideoProvider};
use crate::asset::cache::{AssetCache, MediaProbe};
use crate::asset::{AssetKind, AssetSource, RenderedAsset};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::render::{plan_mix, plan_narration, plan_video, MixPlan, NarrationPlan, SceneMedia, VideoPlan};
use crate::scene::Scene;
use crate::subtitle::{cues_from_timeline, SubtitleCue};
use crate::timeline::{base_duration, plan_global_speed, resolve_scene, Timeline};

/// 整次运行的产物：权威时间轴加上交给渲染引擎的全部指令
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub timeline: Timeline,
    pub subtitles: Vec<SubtitleCue>,
    pub narration: NarrationPlan,
    pub video: VideoPlan,
    pub mix: MixPlan,
    pub summary: RunSummary,
}

/// 运行结束时的成败汇总，失败场景带原因
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            "Run summary: {} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        );
        for (scene_id, reason) in &self.failed {
            warn!("Failed scene {}: {}", scene_id, reason);
        }
    }
}

/// 单个场景生成任务汇合后的素材
struct PreparedScene {
    scene: Scene,
    audio: Option<RenderedAsset>,
    video: Option<RenderedAsset>,
}

/// 时间轴同步与装配流水线
///
/// 资产生成跨场景并发（信号量限流），时间轴计算本身是纯
/// 单线程折叠，必须等所有场景汇合后才推导全局速度。
pub struct Pipeline<P: MediaProbe + 'static> {
    config: Arc<PipelineConfig>,
    cache: Arc<AssetCache<P>>,
    video_provider: Arc<dyn VideoProvider>,
    speech_provider: Arc<dyn SpeechProvider>,
    animator: Arc<dyn Animator>,
}

impl<P: MediaProbe + 'static> Pipeline<P> {
    pub fn new(
        config: PipelineConfig,
        cache: AssetCache<P>,
        video_provider: Arc<dyn VideoProvider>,
        speech_provider: Arc<dyn SpeechProvider>,
        animator: Arc<dyn Animator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            video_provider,
            speech_provider,
            animator,
        }
    }

    /// 从场景清单推导完整的渲染计划
    ///
    /// 配置错误在任何外部调用之前就失败，避免浪费配额；
    /// 单场景的失败只是降级或剔除，从不中止整次运行。
    pub async fn plan(&self, scenes: &[Scene]) -> Result<RenderPlan> {
        self.config.validate()?;

        let mut ordered: Vec<Scene> = scenes.to_vec();
        ordered.sort_by_key(|s| s.order_index);

        let prepared = self.prepare_all(ordered).await;

        // 逐场景裁决时长，失败的场景剔除出时间轴但继续跑
        let mut summary = RunSummary::default();
        let mut resolved = Vec::new();
        let mut media = HashMap::new();

        for p in &prepared {
            let Some(video) = &p.video else {
                let err = PipelineError::AssetUnavailable {
                    scene_id: p.scene.id.clone(),
                    reason: "video generation and procedural fallback both failed".to_string(),
                };
                warn!("{}, dropping scene from timeline", err);
                summary.failed.push((p.scene.id.clone(), err.to_string()));
                continue;
            };

            match resolve_scene(&p.scene, p.audio.as_ref(), Some(video)) {
                Ok(r) => {
                    media.insert(
                        p.scene.id.clone(),
                        SceneMedia {
                            audio: p.audio.clone(),
                            video: video.clone(),
                            video_stretch_factor: r.video_stretch_factor,
                        },
                    );
                    summary.succeeded.push(p.scene.id.clone());
                    resolved.push(r);
                }
                Err(e) => {
                    warn!("Scene {} dropped: {}", p.scene.id, e);
                    summary.failed.push((p.scene.id.clone(), e.to_string()));
                }
            }
        }

        // 没有任何场景存活时直接报告，而不是让速度推导除出 0
        if resolved.is_empty() {
            summary.log();
            return Err(PipelineError::SceneError(format!(
                "no scene survived asset preparation ({} failed), nothing to assemble",
                summary.failed.len()
            )));
        }

        // 全局速度依赖所有场景的时长之和，只能在全部汇合后推导
        let total: f64 = resolved.iter().map(|r| r.final_duration).sum();
        let global_speed = plan_global_speed(
            total,
            self.config.global_speed,
            self.config.target_total_duration,
        )?;

        let timeline = Timeline::build(&resolved, global_speed)?;
        info!(
            "Timeline built: {} scenes, {:.2}s at speed {:.3}",
            timeline.entries.len(),
            timeline.total_duration(),
            global_speed
        );

        let subtitles = cues_from_timeline(&timeline, scenes);
        let narration = plan_narration(&timeline, &media)?;
        let video = plan_video(&timeline, &media)?;
        let mix = plan_mix(
            &narration,
            self.config.background_music.clone(),
            self.config.music_gain,
        );

        Ok(RenderPlan {
            timeline,
            subtitles,
            narration,
            video,
            mix,
            summary,
        })
    }

    /// 并发生成所有场景的素材，按场景各自汇合
    async fn prepare_all(&self, scenes: Vec<Scene>) -> Vec<PreparedScene> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for scene in scenes {
            let semaphore = semaphore.clone();
            let config = self.config.clone();
            let cache = self.cache.clone();
            let video_provider = self.video_provider.clone();
            let speech_provider = self.speech_provider.clone();
            let animator = self.animator.clone();

            join_set.spawn(async move {
                // 信号量约束的是对外部服务的压力
                let _permit = semaphore.acquire_owned().await;
                prepare_scene(scene, config, cache, video_provider, speech_provider, animator)
                    .await
            });
        }

        let mut prepared = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(p) => prepared.push(p),
                Err(e) => error!("Scene preparation task panicked: {}", e),
            }
        }

        // 生成完成顺序不保证，时间轴要按创作顺序折叠
        prepared.sort_by_key(|p| p.scene.order_index);
        prepared
    }
}

/// 为单个场景生成（或取缓存）音频和视频素材
///
/// 任一生成失败都走降级路径：语音失败留给静音合成，
/// 视频失败回退 Ken Burns；两头都空才算场景失败。
async fn prepare_scene<P: MediaProbe + 'static>(
    scene: Scene,
    config: Arc<PipelineConfig>,
    cache: Arc<AssetCache<P>>,
    video_provider: Arc<dyn VideoProvider>,
    speech_provider: Arc<dyn SpeechProvider>,
    animator: Arc<dyn Animator>,
) -> PreparedScene {
    let timeout = config.generation_timeout();

    // 1. 画外音
    let audio = if scene.narration_text.trim().is_empty() {
        None
    } else {
        let voice_tag = format!("tts_{}", config.voice);
        let text = scene.narration_text.clone();
        let voice = config.voice.clone();
        let generated = tokio::time::timeout(
            timeout,
            cache.fetch_or_generate(
                &scene.id,
                AssetKind::Audio,
                &voice_tag,
                AssetSource::Generated,
                |tmp| async move { speech_provider.synthesize(&text, &voice, &tmp).await },
            ),
        )
        .await;

        match generated {
            Ok(Ok(asset)) => Some(asset),
            Ok(Err(e)) => {
                warn!("Speech synthesis failed for {}: {}, falling back to silence", scene.id, e);
                None
            }
            Err(_) => {
                warn!("Speech synthesis timed out for {}, falling back to silence", scene.id);
                None
            }
        }
    };

    // 2. 视频：关键分镜先试服务商，失败回退程序化动画
    let target = base_duration(&scene, audio.as_ref());
    let mut video = None;

    if let Some(image) = &scene.reference_image {
        if target > 0.0 {
            if scene.is_key_scene(config.key_scene_min_duration) {
                let model = video_provider.model_id().to_string();
                let provider = video_provider.clone();
                let prompt = scene.description.clone();
                let reference = image.clone();
                let generated = tokio::time::timeout(
                    timeout,
                    cache.fetch_or_generate(
                        &scene.id,
                        AssetKind::Video,
                        &model,
                        AssetSource::Generated,
                        |tmp| async move {
                            provider.generate(&reference, &prompt, target, &tmp).await
                        },
                    ),
                )
                .await;

                video = match generated {
                    Ok(Ok(asset)) => Some(asset),
                    Ok(Err(e)) => {
                        warn!("Video generation failed for {}: {}, falling back to Ken Burns", scene.id, e);
                        None
                    }
                    Err(_) => {
                        warn!("Video generation timed out for {}, falling back to Ken Burns", scene.id);
                        None
                    }
                };
            }

            if video.is_none() {
                let effect = KenBurnsEffect::for_index(scene.order_index);
                let reference = image.clone();
                video = cache
                    .fetch_or_generate(
                        &scene.id,
                        AssetKind::Video,
                        "kenburns",
                        AssetSource::ProceduralFallback,
                        |tmp| async move { animator.animate(&reference, target, effect, &tmp).await },
                    )
                    .await
                    .map_err(|e| {
                        warn!("Procedural animation failed for {}: {}", scene.id, e);
                        e
                    })
                    .ok();
            }
        }
    }

    PreparedScene { scene, audio, video }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::ProviderKind;
    use crate::render::NarrationSource;
    use crate::timeline::TIME_EPSILON;

    /// 测试探针：把文件内容当作时长数字解析
    struct TextProbe;

    impl MediaProbe for TextProbe {
        fn duration(&self, path: &Path) -> crate::error::Result<f64> {
            let text = std::fs::read_to_string(path)?;
            text.trim()
                .parse()
                .map_err(|_| PipelineError::FfmpegError(format!("unreadable duration: {text}")))
        }
    }

    struct MockSpeech {
        duration: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechProvider for MockSpeech {
        async fn synthesize(&self, _text: &str, _voice: &str, output: &Path) -> crate::error::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(output, self.duration.to_string()).await?;
            Ok(())
        }
    }

    /// 永远失败的视频服务商
    struct FailingVideo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VideoProvider for FailingVideo {
        async fn generate(
            &self,
            _image: &Path,
            _prompt: &str,
            _duration: f64,
            _output: &Path,
        ) -> crate::error::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::ApiError("quota exhausted".to_string()))
        }

        fn model_id(&self) -> &str {
            "mock-video"
        }
    }

    /// 精确产出请求时长的动画引擎
    struct ExactAnimator;

    #[async_trait]
    impl Animator for ExactAnimator {
        async fn animate(
            &self,
            _image: &Path,
            duration: f64,
            _effect: KenBurnsEffect,
            output: &Path,
        ) -> crate::error::Result<()> {
            tokio::fs::write(output, duration.to_string()).await?;
            Ok(())
        }
    }

    fn scenes_fixture() -> Vec<Scene> {
        let mut s1 = Scene::new("s1", 0, 5.0);
        s1.reference_image = Some(PathBuf::from("s1.png"));
        let mut s2 = Scene::new("s2", 1, 3.0);
        s2.narration_text = "义，是正道而行。".to_string();
        s2.reference_image = Some(PathBuf::from("s2.png"));
        let mut s3 = Scene::new("s3", 2, 10.0);
        s3.reference_image = Some(PathBuf::from("s3.png"));
        vec![s1, s2, s3]
    }

    fn pipeline_with(
        cache_dir: &Path,
        config: PipelineConfig,
        video: Arc<FailingVideo>,
        speech: Arc<MockSpeech>,
    ) -> Pipeline<TextProbe> {
        Pipeline::new(
            config,
            AssetCache::new(cache_dir, TextProbe),
            video,
            speech,
            Arc::new(ExactAnimator),
        )
    }

    #[tokio::test]
    async fn scenario_three_scenes_unit_speed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path(), ProviderKind::Dashscope);
        config.global_speed = Some(1.0);

        let video = Arc::new(FailingVideo { calls: AtomicUsize::new(0) });
        let speech = Arc::new(MockSpeech { duration: 4.2, calls: AtomicUsize::new(0) });
        let pipeline = pipeline_with(dir.path(), config, video, speech);

        let plan = pipeline.plan(&scenes_fixture()).await.unwrap();

        // 标称 [5, 3, 10]，场景 2 的音频 4.2s + 0.5s 缓冲 ⇒ [5, 4.7, 10]
        let expected = [(0.0, 5.0), (5.0, 9.7), (9.7, 19.7)];
        assert_eq!(plan.timeline.entries.len(), 3);
        for (entry, (start, end)) in plan.timeline.entries.iter().zip(expected) {
            assert!((entry.start - start).abs() < TIME_EPSILON);
            assert!((entry.end - end).abs() < TIME_EPSILON);
        }

        assert_eq!(plan.summary.succeeded, vec!["s1", "s2", "s3"]);
        assert!(plan.summary.failed.is_empty());

        // 只有场景 2 有台词 ⇒ 一条字幕，时刻取自时间轴
        assert_eq!(plan.subtitles.len(), 1);
        assert_eq!(plan.subtitles[0].start, 5.0);

        // 画外音轨：静音、变速音频、静音
        assert_eq!(plan.narration.segments.len(), 3);
        assert_eq!(plan.narration.segments[0].source, NarrationSource::Silence);
        assert!(matches!(
            plan.narration.segments[1].source,
            NarrationSource::Stretched { .. }
        ));

        // 混音以画外音轨长度为界
        assert!((plan.mix.duration - 19.7).abs() < TIME_EPSILON);
    }

    #[tokio::test]
    async fn target_duration_scales_the_whole_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path(), ProviderKind::Dashscope);
        config.target_total_duration = Some(15.76);

        let video = Arc::new(FailingVideo { calls: AtomicUsize::new(0) });
        let speech = Arc::new(MockSpeech { duration: 4.2, calls: AtomicUsize::new(0) });
        let pipeline = pipeline_with(dir.path(), config, video, speech);

        let plan = pipeline.plan(&scenes_fixture()).await.unwrap();

        assert!((plan.timeline.global_speed - 1.25).abs() < 1e-9);
        assert!((plan.timeline.total_duration() - 15.76).abs() < 1e-9);
        assert!(plan.timeline.validate().is_ok());
    }

    #[tokio::test]
    async fn scene_without_any_video_is_dropped_but_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path(), ProviderKind::Dashscope);
        config.global_speed = Some(1.0);

        let mut scenes = scenes_fixture();
        // 没有参考图：服务商和程序化降级都无从生成
        scenes[1].reference_image = None;

        let video = Arc::new(FailingVideo { calls: AtomicUsize::new(0) });
        let speech = Arc::new(MockSpeech { duration: 4.2, calls: AtomicUsize::new(0) });
        let pipeline = pipeline_with(dir.path(), config, video, speech);

        let plan = pipeline.plan(&scenes).await.unwrap();

        assert_eq!(plan.timeline.entries.len(), 2);
        assert!(plan.timeline.validate().is_ok());
        assert_eq!(plan.timeline.entries[0].scene_id, "s1");
        assert_eq!(plan.timeline.entries[1].scene_id, "s3");

        assert_eq!(plan.summary.failed.len(), 1);
        assert_eq!(plan.summary.failed[0].0, "s2");
    }

    #[tokio::test]
    async fn all_scenes_failing_reports_assembly_failure_not_speed_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path(), ProviderKind::Dashscope);
        config.target_total_duration = Some(10.0);

        // 所有场景都没有参考图 ⇒ 全部被剔除
        let mut scenes = scenes_fixture();
        for scene in &mut scenes {
            scene.reference_image = None;
        }

        let video = Arc::new(FailingVideo { calls: AtomicUsize::new(0) });
        let speech = Arc::new(MockSpeech { duration: 4.2, calls: AtomicUsize::new(0) });
        let pipeline = pipeline_with(dir.path(), config, video, speech);

        let result = pipeline.plan(&scenes).await;
        assert!(matches!(result, Err(PipelineError::SceneError(_))));
    }

    #[tokio::test]
    async fn configuration_conflict_aborts_before_any_external_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path(), ProviderKind::Dashscope);
        config.global_speed = Some(1.0);
        config.target_total_duration = Some(30.0);

        let video = Arc::new(FailingVideo { calls: AtomicUsize::new(0) });
        let speech = Arc::new(MockSpeech { duration: 4.2, calls: AtomicUsize::new(0) });
        let pipeline = pipeline_with(
            dir.path(),
            config,
            video.clone(),
            speech.clone(),
        );

        let result = pipeline.plan(&scenes_fixture()).await;
        assert!(matches!(result, Err(PipelineError::ResolutionConflict(_))));
        assert_eq!(video.calls.load(Ordering::SeqCst), 0);
        assert_eq!(speech.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rerun_is_served_entirely_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path(), ProviderKind::Dashscope);
        config.global_speed = Some(1.0);

        let video = Arc::new(FailingVideo { calls: AtomicUsize::new(0) });
        let speech = Arc::new(MockSpeech { duration: 4.2, calls: AtomicUsize::new(0) });
        let pipeline = pipeline_with(dir.path(), config, video, speech.clone());

        let first = pipeline.plan(&scenes_fixture()).await.unwrap();
        let second = pipeline.plan(&scenes_fixture()).await.unwrap();

        // 第二次运行语音不再触发外部调用，计划完全一致
        assert_eq!(speech.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.timeline, second.timeline);
    }
}
