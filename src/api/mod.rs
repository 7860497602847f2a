pub mod dashscope;
pub mod kling;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub use dashscope::DashScopeClient;
pub use kling::KlingClient;

/// 语音合成服务的窄契约
///
/// 返回即表示音频已写入 output；失败（超时、配额）由调用方
/// 走静音降级路径，这里不重试。
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()>;
}

/// 图生视频服务的窄契约，不同厂商可互换
///
/// 生成是异步任务语义：提交后轮询直到完成，结果写入 output。
/// 失败由调用方回退到程序化动画。
#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn generate(
        &self,
        image: &Path,
        prompt: &str,
        target_duration: f64,
        output: &Path,
    ) -> Result<()>;

    /// 参与缓存键的服务商/模型标识
    fn model_id(&self) -> &str;
}
