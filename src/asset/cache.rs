use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::asset::{AssetKind, AssetSource, RenderedAsset};
use crate::error::{PipelineError, Result};

/// 媒体时长探测接口，由渲染引擎一侧提供实现
pub trait MediaProbe: Send + Sync {
    fn duration(&self, path: &Path) -> Result<f64>;
}

/// 按 (scene_id, kind, model) 寻址的磁盘产物缓存
///
/// 命中即直接返回，不发起任何外部调用；未命中时先写临时文件再
/// 原子改名落盘，避免并发的重复请求读到半成品。已落盘的产物
/// 不会被后续运行覆盖。
pub struct AssetCache<P: MediaProbe> {
    dir: PathBuf,
    probe: P,
}

impl<P: MediaProbe> AssetCache<P> {
    pub fn new(dir: impl Into<PathBuf>, probe: P) -> Self {
        Self {
            dir: dir.into(),
            probe,
        }
    }

    fn artifact_path(&self, scene_id: &str, kind: AssetKind, model: &str) -> PathBuf {
        self.dir
            .join(format!("{scene_id}_{model}.{}", kind.extension()))
    }

    /// 查缓存，未命中时调用 generate 写入给定路径并落盘
    ///
    /// 缓存中时长无法测量的产物视为损坏：记录警告、当作未命中重新生成。
    pub async fn fetch_or_generate<F, Fut>(
        &self,
        scene_id: &str,
        kind: AssetKind,
        model: &str,
        fresh_source: AssetSource,
        generate: F,
    ) -> Result<RenderedAsset>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let path = self.artifact_path(scene_id, kind, model);

        if path.exists() {
            match self.probe.duration(&path) {
                Ok(duration) => {
                    info!("Cache hit for scene {} ({:?})", scene_id, kind);
                    return Ok(RenderedAsset {
                        kind,
                        scene_id: scene_id.to_string(),
                        path,
                        actual_duration: duration,
                        source: AssetSource::CacheHit,
                    });
                }
                Err(e) => {
                    let corruption = PipelineError::CacheCorruption {
                        path: path.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}, regenerating", corruption);
                    tokio::fs::remove_file(&path).await.ok();
                }
            }
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension(format!("{}.part", kind.extension()));
        generate(tmp.clone()).await?;

        // 新产物的实测时长在改名前确定
        let duration = self.probe.duration(&tmp)?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(RenderedAsset {
            kind,
            scene_id: scene_id.to_string(),
            path,
            actual_duration: duration,
            source: fresh_source,
        })
    }
}
