use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::{SpeechProvider, VideoProvider};
use crate::error::{PipelineError, Result};
use crate::storage::ObjectStore;

const TTS_API: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text2speech/speech-synthesis";
const VIDEO_API: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/video-generation/video-synthesis";
const TASK_API: &str = "https://dashscope.aliyuncs.com/api/v1/tasks";

/// 轮询退避：从 2 秒指数增长到 30 秒封顶
const POLL_INITIAL: Duration = Duration::from_secs(2);
const POLL_MAX: Duration = Duration::from_secs(30);
/// 单个生成任务的轮询总预算
const POLL_DEADLINE: Duration = Duration::from_secs(1800);

/// 灵积（DashScope）客户端：语音合成 + 图生视频
///
/// 视频接口只收远程 URI，参考图先经对象存储中转。
pub struct DashScopeClient {
    api_key: String,
    model: String,
    client: Client,
    store: Arc<dyn ObjectStore>,
}

#[derive(Debug, Deserialize)]
struct TaskSubmitResponse {
    output: TaskSubmitOutput,
}

#[derive(Debug, Deserialize)]
struct TaskSubmitOutput {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    output: TaskStatusOutput,
}

#[derive(Debug, Deserialize)]
struct TaskStatusOutput {
    task_status: String,
    video_url: Option<String>,
}

impl DashScopeClient {
    pub fn new(api_key: String, model: String, store: Arc<dyn ObjectStore>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            model,
            client,
            store,
        }
    }

    /// 指数退避轮询任务直到完成，返回结果视频 URL
    async fn wait_for_task(&self, task_id: &str) -> Result<String> {
        let deadline = Instant::now() + POLL_DEADLINE;
        let mut interval = POLL_INITIAL;

        loop {
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(POLL_MAX);

            if Instant::now() > deadline {
                return Err(PipelineError::ApiError(format!(
                    "video generation task {task_id} timed out"
                )));
            }

            let response = self
                .client
                .get(format!("{TASK_API}/{task_id}"))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .send()
                .await?;

            if !response.status().is_success() {
                let error_text = response.text().await?;
                warn!("Failed to get task status: {}", error_text);
                continue;
            }

            let status: TaskStatusResponse = response.json().await?;
            match status.output.task_status.as_str() {
                "SUCCEEDED" => {
                    return status.output.video_url.ok_or_else(|| {
                        PipelineError::ApiError("no video URL in response".to_string())
                    });
                }
                "FAILED" => {
                    return Err(PipelineError::ApiError(format!(
                        "video generation task {task_id} failed"
                    )));
                }
                other => {
                    info!("Task {} status: {} (next poll in {:?})", task_id, other, interval);
                }
            }
        }
    }
}

#[async_trait]
impl SpeechProvider for DashScopeClient {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()> {
        info!("Generating speech ({} chars)", text.chars().count());

        let request_body = json!({
            "model": "cosyvoice-v1",
            "input": {
                "text": text
            },
            "parameters": {
                "voice": voice,
                "format": "mp3"
            }
        });

        let response = self
            .client
            .post(TTS_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(PipelineError::ApiError(format!("TTS API error: {error_text}")));
        }

        let audio_data = response.bytes().await?;
        tokio::fs::write(output, audio_data).await?;
        Ok(())
    }
}

#[async_trait]
impl VideoProvider for DashScopeClient {
    async fn generate(
        &self,
        image: &Path,
        prompt: &str,
        target_duration: f64,
        output: &Path,
    ) -> Result<()> {
        // 参考图先上对象存储换取远程 URI
        let remote_name = format!(
            "references/{}",
            image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "reference.png".to_string())
        );
        let image_uri = self.store.upload(image, &remote_name).await?;

        info!(
            "Submitting video generation ({:.1}s target): {}",
            target_duration,
            prompt.chars().take(40).collect::<String>()
        );

        let request_body = json!({
            "model": self.model,
            "input": {
                "img_url": image_uri,
                "prompt": prompt
            },
            "parameters": {
                "resolution": "720P",
                "duration": target_duration.ceil() as u32
            }
        });

        let response = self
            .client
            .post(VIDEO_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-DashScope-Async", "enable")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(PipelineError::ApiError(format!(
                "video generation API error: {error_text}"
            )));
        }

        let submitted: TaskSubmitResponse = response.json().await?;
        let video_url = self.wait_for_task(&submitted.output.task_id).await?;

        self.store.download(&video_url, output).await?;
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
