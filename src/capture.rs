/// 流量镜像模块
///
/// 每个方向一个只追加的抓包文件，被该方向所有连接的中继任务共享。
/// 每次写入加上落盘同步作为一个整体在互斥锁内完成，不同连接的数据
/// 只会以整块为单位交错，不会在单次追加内部混杂。
use crate::error::{ForwardError, Result};
use crate::relay::Direction;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// 单个方向的抓包文件句柄
#[derive(Debug, Clone)]
pub struct CaptureSink {
    path: Arc<PathBuf>,
    file: Arc<Mutex<File>>,
}

impl CaptureSink {
    /// 以追加模式打开（不存在则创建）
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| ForwardError::capture(path.display().to_string(), e))?;

        Ok(Self {
            path: Arc::new(path),
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// 抓包文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一块数据并同步到磁盘
    pub async fn append(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut file = self.file.lock().await;
        file.write_all(data).await.map_err(|e| self.error(e))?;
        file.flush().await.map_err(|e| self.error(e))?;
        file.sync_all().await.map_err(|e| self.error(e))?;

        Ok(data.len())
    }

    fn error(&self, source: std::io::Error) -> ForwardError {
        ForwardError::capture(self.path.display().to_string(), source)
    }
}

/// 上下行两个方向的抓包文件，彼此独立配置
#[derive(Debug, Clone, Default)]
pub struct CaptureSinks {
    pub upstream: Option<CaptureSink>,
    pub downstream: Option<CaptureSink>,
}

impl CaptureSinks {
    /// 不做任何镜像
    pub fn none() -> Self {
        Self::default()
    }

    /// 根据配置的路径打开抓包文件
    pub async fn open(upstream: Option<&Path>, downstream: Option<&Path>) -> Result<Self> {
        let upstream = match upstream {
            Some(path) => {
                let sink = CaptureSink::open(path).await?;
                info!("Mirroring upstream traffic to {}", path.display());
                Some(sink)
            }
            None => None,
        };

        let downstream = match downstream {
            Some(path) => {
                let sink = CaptureSink::open(path).await?;
                info!("Mirroring downstream traffic to {}", path.display());
                Some(sink)
            }
            None => None,
        };

        Ok(Self {
            upstream,
            downstream,
        })
    }

    /// 取得指定方向的抓包文件
    pub fn for_direction(&self, direction: Direction) -> Option<CaptureSink> {
        match direction {
            Direction::Upstream => self.upstream.clone(),
            Direction::Downstream => self.downstream.clone(),
        }
    }
}
