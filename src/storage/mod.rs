use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use crate::error::{PipelineError, Result};

/// 持久对象存储的窄接口
///
/// 只用来给需要远程 URI 的视频服务商中转参考图，纯粹的
/// 上传/下载直通，不承担别的职责。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 上传本地文件，返回可取回的 URI
    async fn upload(&self, local: &Path, remote_name: &str) -> Result<String>;
    /// 按 URI 取回到本地
    async fn download(&self, uri: &str, local: &Path) -> Result<()>;
}

/// 通过 HTTP PUT/GET 访问的对象存储（兼容预签名 URL 网关）
pub struct HttpObjectStore {
    base_url: String,
    client: Client,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, local: &Path, remote_name: &str) -> Result<String> {
        if !local.exists() {
            return Err(PipelineError::StorageError(format!(
                "local file does not exist: {}",
                local.display()
            )));
        }

        let bytes = tokio::fs::read(local).await?;
        let uri = format!("{}/{}", self.base_url, remote_name);

        let response = self.client.put(&uri).body(bytes).send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::StorageError(format!(
                "upload to {} failed with HTTP {}",
                uri,
                response.status()
            )));
        }

        info!("Uploaded {} -> {}", local.display(), uri);
        Ok(uri)
    }

    async fn download(&self, uri: &str, local: &Path) -> Result<()> {
        let response = self.client.get(uri).send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::StorageError(format!(
                "download from {} failed with HTTP {}",
                uri,
                response.status()
            )));
        }

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(local, bytes).await?;

        info!("Downloaded {} -> {}", uri, local.display());
        Ok(())
    }
}
