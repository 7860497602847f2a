mod animation;
mod api;
mod asset;
mod config;
mod error;
mod pipeline;
mod render;
mod scene;
mod storage;
mod subtitle;
mod timeline;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use animation::KenBurnsAnimator;
use api::{DashScopeClient, KlingClient, SpeechProvider, VideoProvider};
use asset::cache::AssetCache;
use config::{PipelineConfig, ProviderKind};
use error::Result;
use pipeline::{Pipeline, RenderPlan};
use render::ffmpeg::{FfmpegRenderer, FfprobeProbe};
use scene::Scene;
use storage::HttpObjectStore;

#[derive(Parser, Debug)]
#[command(name = "storyreel")]
#[command(about = "Assemble a narrated short film from scene definitions", long_about = None)]
struct Args {
    /// Scene definitions file (JSON array of scenes)
    #[arg(short, long)]
    scenes: PathBuf,

    /// Output video file path
    #[arg(short, long, default_value = "output.mp4")]
    output: PathBuf,

    /// Working directory for cache and intermediate files
    #[arg(short = 'w', long, default_value = "./output")]
    work_dir: PathBuf,

    /// Video generation provider
    #[arg(long, value_enum, default_value = "dashscope")]
    provider: ProviderKind,

    /// Provider model identifier
    #[arg(long, default_value = "wan2.2-i2v-plus")]
    model: String,

    /// Narration voice
    #[arg(long, default_value = "longxiaochun")]
    voice: String,

    /// Target total duration in seconds (mutually exclusive with --speed)
    #[arg(long)]
    target_duration: Option<f64>,

    /// Global playback speed (mutually exclusive with --target-duration)
    #[arg(long)]
    speed: Option<f64>,

    /// Background music file
    #[arg(long)]
    music: Option<PathBuf>,

    /// Max scenes generated concurrently
    #[arg(long, default_value_t = 2)]
    concurrency: usize,

    /// Compute and print the render plan without invoking FFmpeg
    #[arg(long)]
    plan_only: bool,

    /// Provider API key
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    // 加载环境变量
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // 获取 API key
    let api_key = if let Some(key) = args.api_key.clone() {
        key
    } else if let Ok(key) = std::env::var("STORYREEL_API_KEY") {
        key
    } else {
        eprintln!("Error: API key not found. Please set it via --api-key or STORYREEL_API_KEY environment variable");
        std::process::exit(1);
    };

    // 读取场景清单（引擎核心只消费解析好的列表，不碰文件格式）
    let scene_text = tokio::fs::read_to_string(&args.scenes)
        .await
        .context(format!("Failed to read scenes file: {}", args.scenes.display()))?;
    let mut scenes: Vec<Scene> =
        serde_json::from_str(&scene_text).context("Failed to parse scenes file")?;

    // 创作顺序就是文件顺序
    for (index, scene) in scenes.iter_mut().enumerate() {
        scene.order_index = index;
    }

    info!("Loaded {} scenes from {}", scenes.len(), args.scenes.display());

    tokio::fs::create_dir_all(&args.work_dir)
        .await
        .context("Failed to create work directory")?;

    let mut config = PipelineConfig::new(&args.work_dir, args.provider);
    config.voice = args.voice.clone();
    config.target_total_duration = args.target_duration;
    config.global_speed = args.speed;
    config.background_music = args.music.clone();
    config.concurrency = args.concurrency;

    if let Err(e) = run(args, config, api_key, scenes).await {
        error!("Assembly failed: {}", e);
        std::process::exit(1);
    }

    info!("Done!");
    Ok(())
}

fn build_video_provider(
    kind: ProviderKind,
    api_key: String,
    model: String,
) -> Result<Arc<dyn VideoProvider>> {
    match kind {
        ProviderKind::Dashscope => {
            // 灵积只收远程 URI，参考图需要对象存储中转
            let store_url = std::env::var("OBJECT_STORE_URL").map_err(|_| {
                error::PipelineError::StorageError(
                    "OBJECT_STORE_URL must be set for the dashscope provider".to_string(),
                )
            })?;
            let store = Arc::new(HttpObjectStore::new(store_url));
            Ok(Arc::new(DashScopeClient::new(api_key, model, store)))
        }
        ProviderKind::Kling => {
            let base_url = std::env::var("KLING_BASE_URL")
                .unwrap_or_else(|_| "https://api.302.ai".to_string());
            Ok(Arc::new(KlingClient::new(api_key, base_url, model)))
        }
    }
}

async fn run(
    args: Args,
    config: PipelineConfig,
    api_key: String,
    scenes: Vec<Scene>,
) -> Result<()> {
    let video_provider = build_video_provider(args.provider, api_key.clone(), args.model.clone())?;
    let speech_provider: Arc<dyn SpeechProvider> = {
        // 语音合成走灵积，与视频服务商的选择无关
        let store_url = std::env::var("OBJECT_STORE_URL").unwrap_or_default();
        Arc::new(DashScopeClient::new(
            api_key,
            args.model.clone(),
            Arc::new(HttpObjectStore::new(store_url)),
        ))
    };

    let cache = AssetCache::new(args.work_dir.join("cache"), FfprobeProbe);
    let pipeline = Pipeline::new(
        config,
        cache,
        video_provider,
        speech_provider,
        Arc::new(KenBurnsAnimator),
    );

    // 1. 推导渲染计划（并发生成素材、裁决时长、构建时间轴）
    info!("Step 1/3: Planning timeline...");
    let plan = pipeline.plan(&scenes).await?;
    plan.summary.log();

    // 2. 落地字幕文件
    info!("Step 2/3: Writing subtitles...");
    let srt_path = args.work_dir.join("subtitles.srt");
    let srt_text = subtitle::to_srt(&plan.subtitles);
    // 落盘前回读校验一遍格式
    subtitle::parse_srt(&srt_text)?;
    tokio::fs::write(&srt_path, srt_text).await?;
    info!("Subtitles written to {}", srt_path.display());

    if args.plan_only {
        let timeline_path = args.work_dir.join("timeline.json");
        tokio::fs::write(&timeline_path, serde_json::to_string_pretty(&plan.timeline)?).await?;
        info!("Timeline written to {}", timeline_path.display());
        print_plan(&plan);
        return Ok(());
    }

    // 3. 交给 FFmpeg 执行
    info!("Step 3/3: Rendering final video...");
    let renderer = FfmpegRenderer::new(&args.work_dir);
    let narration_track = args.work_dir.join("narration.aac");
    let video_track = args.work_dir.join("video_track.mp4");

    renderer.render_narration(&plan.narration, &narration_track)?;
    renderer.render_video(&plan.video, plan.timeline.global_speed, &video_track)?;
    renderer.compose(
        &video_track,
        &narration_track,
        &plan.mix,
        plan.timeline.global_speed,
        Some(&srt_path),
        &args.output,
    )?;

    info!("Final video: {}", args.output.display());
    Ok(())
}

fn print_plan(plan: &RenderPlan) {
    info!(
        "Plan: {} scenes, total {:.2}s at speed {:.3}",
        plan.timeline.entries.len(),
        plan.timeline.total_duration(),
        plan.timeline.global_speed
    );
    for entry in &plan.timeline.entries {
        info!(
            "  {}: {:.2}s -> {:.2}s",
            entry.scene_id, entry.start, entry.end
        );
    }
}
