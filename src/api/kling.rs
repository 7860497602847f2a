use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::VideoProvider;
use crate::error::{PipelineError, Result};

const POLL_INITIAL: Duration = Duration::from_secs(2);
const POLL_MAX: Duration = Duration::from_secs(30);
const POLL_DEADLINE: Duration = Duration::from_secs(1800);

/// 可灵（Kling）图生视频客户端
///
/// 参考图通过服务商自己的 multipart 上传接口中转，
/// 生成时长只支持 5 秒 / 10 秒两档。
pub struct KlingClient {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task_status: String,
    task_result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    videos: Vec<TaskVideo>,
}

#[derive(Debug, Deserialize)]
struct TaskVideo {
    url: String,
}

impl KlingClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        }
    }

    fn unwrap_envelope<T>(envelope: ApiEnvelope<T>, context: &str) -> Result<T> {
        if envelope.code != 0 {
            return Err(PipelineError::ApiError(format!(
                "{context} failed: {}",
                envelope.message.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        envelope
            .data
            .ok_or_else(|| PipelineError::ApiError(format!("{context}: empty response data")))
    }

    async fn upload_image(&self, image: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image).await?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference.png".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")?;
        let form = Form::new().part("image", part);

        info!("Uploading reference image: {}", image.display());
        let response = self
            .client
            .post(format!("{}/kling/v1/images/upload", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(PipelineError::ApiError(format!(
                "image upload error: {error_text}"
            )));
        }

        let envelope: ApiEnvelope<UploadData> = response.json().await?;
        Ok(Self::unwrap_envelope(envelope, "image upload")?.url)
    }

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
                .get(format!(
                    "{}/kling/v1/videos/image2video/{task_id}",
                    self.base_url
                ))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .send()
                .await?;

            if !response.status().is_success() {
                let error_text = response.text().await?;
                warn!("Failed to get task status: {}", error_text);
                continue;
            }

            let envelope: ApiEnvelope<TaskData> = response.json().await?;
            let task = Self::unwrap_envelope(envelope, "task query")?;

            match task.task_status.as_str() {
                "succeed" => {
                    return task
                        .task_result
                        .and_then(|r| r.videos.into_iter().next())
                        .map(|v| v.url)
                        .ok_or_else(|| {
                            PipelineError::ApiError("no video URL in response".to_string())
                        });
                }
                "failed" => {
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
impl VideoProvider for KlingClient {
    async fn generate(
        &self,
        image: &Path,
        prompt: &str,
        target_duration: f64,
        output: &Path,
    ) -> Result<()> {
        let image_url = self.upload_image(image).await?;

        // 时长只有 5/10 两档，向上取最近一档
        let duration = if target_duration > 5.0 { 10 } else { 5 };

        let request_body = json!({
            "model_name": self.model,
            "image": image_url,
            "prompt": prompt,
            "mode": "std",
            "duration": duration.to_string(),
            "aspect_ratio": "16:9"
        });

        info!(
            "Submitting Kling video generation ({}s bucket for {:.1}s target)",
            duration, target_duration
        );

        let response = self
            .client
            .post(format!("{}/kling/v1/videos/image2video", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(PipelineError::ApiError(format!(
                "video generation API error: {error_text}"
            )));
        }

        let envelope: ApiEnvelope<SubmitData> = response.json().await?;
        let task_id = Self::unwrap_envelope(envelope, "video generation submit")?.task_id;

        let video_url = self.wait_for_task(&task_id).await?;

        // 直接拉回产物
        let video = self.client.get(&video_url).send().await?.bytes().await?;
        tokio::fs::write(output, video).await?;
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
