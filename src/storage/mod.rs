pub mod ftp;
pub mod local;
pub mod memory;
pub mod sftp;

use crate::config::{RemoteConfig, TransportKind};
use crate::core::digest::HashAlgorithm;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use ftp::FtpStore;
pub use local::LocalDirectory;
pub use memory::MemoryStore;
pub use sftp::SftpStore;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- list, stat, delete, rename 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- fetch, store, 远程哈希等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 单个存档文件在列目录时的快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    /// 修改时间（UTC，精确到秒）
    pub modified_at: DateTime<Utc>,
    pub size: Option<u64>,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            modified_at: truncate_to_seconds(modified_at),
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// 两侧时间戳统一截断到秒（SFTP/FTP 只保存秒级精度）
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

/// 远程存储抽象接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 建立连接（已连接时为空操作）
    async fn connect(&self) -> Result<()>;

    /// 列出工作目录中的普通文件
    async fn list_directory(&self) -> Result<Vec<FileRecord>>;

    /// 读取整个文件
    async fn fetch(&self, name: &str) -> Result<Bytes>;

    /// 写入整个文件（覆盖）
    async fn store(&self, data: Bytes, name: &str) -> Result<()>;

    /// 删除文件，不存在时视为成功
    async fn delete(&self, name: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn exists(&self, name: &str) -> Result<bool>;

    async fn set_modified_time(&self, name: &str, modified_at: DateTime<Utc>) -> Result<()>;

    /// 在远程计算内容哈希
    async fn remote_hash(&self, name: &str, algorithm: HashAlgorithm) -> Result<String>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建远程存储实例（此时尚未连接）
pub fn create_remote_store(config: &RemoteConfig) -> Arc<dyn RemoteStore> {
    match config.transport {
        TransportKind::Sftp => {
            tracing::info!("初始化 SFTP 存储: {}@{}:{}", config.username, config.host, config.port);
            Arc::new(SftpStore::new(config.clone()))
        }
        TransportKind::Ftp => {
            tracing::info!("初始化 FTP 存储: {}@{}:{}", config.username, config.host, config.port);
            Arc::new(FtpStore::new(config.clone()))
        }
    }
}

/// 为存储操作加上超时
pub async fn with_timeout<T, F>(secs: u64, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(format!("{} ({}s)", op, secs))),
    }
}

/// 在阻塞线程池中执行同步网络调用
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Remote(format!("后台任务失败: {}", e)))?
}
