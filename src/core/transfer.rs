//! 安全传输 - 临时文件 + 哈希校验 + 重命名
//!
//! 目标上的最终文件名在校验通过之前不会被触碰；任何失败都会清理已创建的临时对象。

use crate::core::comparator::{Direction, TransferDirective};
use crate::core::digest::{calculate_hash, hashes_match, HashAlgorithm};
use crate::error::{ErrorKind, Result, SyncError};
use crate::storage::{with_timeout, LocalDirectory, RemoteStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 单个文件的传输结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub file_name: String,
    pub direction: Direction,
    pub succeeded: bool,
    pub reason: Option<ErrorKind>,
    pub bytes: u64,
}

/// 传输执行器
pub struct TransferExecutor {
    remote: Arc<dyn RemoteStore>,
    local: LocalDirectory,
    temp_name: String,
    algorithm: HashAlgorithm,
}

impl TransferExecutor {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: LocalDirectory,
        temp_name: impl Into<String>,
        algorithm: HashAlgorithm,
    ) -> Self {
        Self {
            remote,
            local,
            temp_name: temp_name.into(),
            algorithm,
        }
    }

    /// 执行一个传输决定，错误不会向外传播
    pub async fn execute(&self, directive: &TransferDirective) -> TransferOutcome {
        let result = match directive.direction {
            Direction::Upload => self.upload(directive).await,
            Direction::Download => self.download(directive).await,
        };

        match result {
            Ok(bytes) => {
                info!(
                    "{} 完成: {} ({} 字节)",
                    directive.direction, directive.file_name, bytes
                );
                TransferOutcome {
                    file_name: directive.file_name.clone(),
                    direction: directive.direction,
                    succeeded: true,
                    reason: None,
                    bytes,
                }
            }
            Err(e) => {
                error!("{} 失败: {}: {}", directive.direction, directive.file_name, e);
                TransferOutcome {
                    file_name: directive.file_name.clone(),
                    direction: directive.direction,
                    succeeded: false,
                    reason: Some(e.kind()),
                    bytes: 0,
                }
            }
        }
    }

    /// 本地 -> 远程
    async fn upload(&self, directive: &TransferDirective) -> Result<u64> {
        let name = directive.file_name.as_str();
        let data = self.local.read(name).await?;
        let size = data.len() as u64;
        let local_hash = calculate_hash(self.algorithm, &data);

        let result = async {
            debug!("上传到临时文件: {} -> {}", name, self.temp_name);
            with_timeout(IO_TIMEOUT_SECS, "store", self.remote.store(data, &self.temp_name)).await?;

            let remote_hash = with_timeout(
                IO_TIMEOUT_SECS,
                "remote_hash",
                self.remote.remote_hash(&self.temp_name, self.algorithm),
            )
            .await?;
            if !hashes_match(&local_hash, &remote_hash) {
                return Err(SyncError::IntegrityMismatch {
                    name: name.to_string(),
                    local: local_hash.clone(),
                    remote: remote_hash,
                });
            }

            if with_timeout(OP_TIMEOUT_SECS, "exists", self.remote.exists(name)).await? {
                with_timeout(OP_TIMEOUT_SECS, "delete", self.remote.delete(name)).await?;
            }
            with_timeout(OP_TIMEOUT_SECS, "rename", self.remote.rename(&self.temp_name, name)).await?;
            with_timeout(
                OP_TIMEOUT_SECS,
                "set_modified_time",
                self.remote.set_modified_time(name, directive.source_modified_at),
            )
            .await
        }
        .await;

        if result.is_err() {
            self.remove_remote_temp().await;
        }
        result.map(|_| size)
    }

    /// 远程 -> 本地
    async fn download(&self, directive: &TransferDirective) -> Result<u64> {
        let name = directive.file_name.as_str();

        // 无论成功与否，离开时本地不留临时文件
        let temp_path = self.local.resolve_path(&self.temp_name);
        let _cleanup = scopeguard::guard(temp_path, |path| {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("清理本地临时文件失败: {:?}: {}", path, e);
                }
            }
        });

        let data = with_timeout(IO_TIMEOUT_SECS, "fetch", self.remote.fetch(name)).await?;
        let size = data.len() as u64;
        debug!("下载到临时文件: {} -> {}", name, self.temp_name);
        self.local.write(&self.temp_name, &data).await?;
        drop(data);

        // 校验写入磁盘后的内容
        let written = self.local.read(&self.temp_name).await?;
        let local_hash = calculate_hash(self.algorithm, &written);
        let remote_hash = with_timeout(
            IO_TIMEOUT_SECS,
            "remote_hash",
            self.remote.remote_hash(name, self.algorithm),
        )
        .await?;
        if !hashes_match(&local_hash, &remote_hash) {
            return Err(SyncError::IntegrityMismatch {
                name: name.to_string(),
                local: local_hash,
                remote: remote_hash,
            });
        }

        // 先在临时文件上设置时间，重命名保留 mtime，最终文件不会带着错误的时间出现
        self.local
            .set_modified_time(&self.temp_name, directive.source_modified_at)
            .await?;
        self.local.delete(name).await?;
        self.local.rename(&self.temp_name, name).await?;
        Ok(size)
    }

    async fn remove_remote_temp(&self) {
        let result = async {
            if with_timeout(OP_TIMEOUT_SECS, "exists", self.remote.exists(&self.temp_name)).await? {
                with_timeout(OP_TIMEOUT_SECS, "delete", self.remote.delete(&self.temp_name)).await?;
            }
            Ok::<_, SyncError>(())
        }
        .await;

        if let Err(e) = result {
            warn!("清理远程临时文件失败: {}: {}", self.temp_name, e);
        }
    }

    /// 清理上次异常退出遗留的临时文件（两侧）
    pub async fn remove_stale_temp(&self) {
        match self.local.exists(&self.temp_name).await {
            Ok(true) => {
                info!("清理遗留的本地临时文件: {}", self.temp_name);
                if let Err(e) = self.local.delete(&self.temp_name).await {
                    warn!("清理本地临时文件失败: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("检查本地临时文件失败: {}", e),
        }
        self.remove_remote_temp().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};

    const TEMP: &str = "savesync.tmp";

    struct Fixture {
        _dir: tempfile::TempDir,
        local: LocalDirectory,
        remote: Arc<MemoryStore>,
        executor: TransferExecutor,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalDirectory::new(dir.path());
        let remote = Arc::new(MemoryStore::new());
        let executor =
            TransferExecutor::new(remote.clone(), local.clone(), TEMP, HashAlgorithm::Md5);
        Fixture {
            _dir: dir,
            local,
            remote,
            executor,
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn directive(direction: Direction, name: &str, secs: i64) -> TransferDirective {
        TransferDirective {
            direction,
            file_name: name.to_string(),
            source_modified_at: ts(secs),
        }
    }

    #[tokio::test]
    async fn test_upload_preserves_content_and_mtime() {
        let f = fixture();
        f.local.write("a.sav", b"progress").await.unwrap();
        f.local.set_modified_time("a.sav", ts(1_700_000_123)).await.unwrap();
        f.remote.insert("a.sav", &b"older"[..], ts(1_600_000_000));

        let outcome = f
            .executor
            .execute(&directive(Direction::Upload, "a.sav", 1_700_000_123))
            .await;

        assert!(outcome.succeeded, "{:?}", outcome);
        assert_eq!(outcome.bytes, 8);
        let (data, modified) = f.remote.get("a.sav").unwrap();
        assert_eq!(&data[..], b"progress");
        assert_eq!(modified, ts(1_700_000_123));
        assert_eq!(f.remote.names(), vec!["a.sav"]);
    }

    #[tokio::test]
    async fn test_upload_mismatch_leaves_final_untouched() {
        let f = fixture();
        f.local.write("a.sav", b"new data").await.unwrap();
        f.remote.insert("a.sav", &b"old data"[..], ts(100));
        f.remote.corrupt_stores(true);

        let outcome = f
            .executor
            .execute(&directive(Direction::Upload, "a.sav", 200))
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.reason, Some(ErrorKind::IntegrityMismatch));
        let (data, modified) = f.remote.get("a.sav").unwrap();
        assert_eq!(&data[..], b"old data");
        assert_eq!(modified, ts(100));
        assert!(f.remote.get(TEMP).is_none());
    }

    #[tokio::test]
    async fn test_upload_rename_failure_cleans_temp() {
        let f = fixture();
        f.local.write("a.sav", b"data").await.unwrap();
        f.remote.fail_on("rename", TEMP);

        let outcome = f
            .executor
            .execute(&directive(Direction::Upload, "a.sav", 200))
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.reason, Some(ErrorKind::Remote));
        assert!(f.remote.names().is_empty());
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_is_io_error() {
        let f = fixture();
        let outcome = f
            .executor
            .execute(&directive(Direction::Upload, "ghost.sav", 200))
            .await;
        assert_eq!(outcome.reason, Some(ErrorKind::Io));
        assert!(f.remote.names().is_empty());
    }

    #[tokio::test]
    async fn test_download_preserves_content_and_mtime() {
        let f = fixture();
        f.remote.insert("b.sav", &b"remote progress"[..], ts(1_650_000_000));
        f.local.write("b.sav", b"stale").await.unwrap();

        let outcome = f
            .executor
            .execute(&directive(Direction::Download, "b.sav", 1_650_000_000))
            .await;

        assert!(outcome.succeeded, "{:?}", outcome);
        assert_eq!(&f.local.read("b.sav").await.unwrap()[..], b"remote progress");
        assert_eq!(f.local.modified_time("b.sav").await.unwrap(), ts(1_650_000_000));
        assert!(!f.local.exists(TEMP).await.unwrap());
    }

    #[tokio::test]
    async fn test_download_mismatch_leaves_final_untouched() {
        let f = fixture();
        f.remote.insert("b.sav", &b"remote"[..], ts(500));
        f.local.write("b.sav", b"local copy").await.unwrap();
        f.local.set_modified_time("b.sav", ts(100)).await.unwrap();
        f.remote.corrupt_hashes(true);

        let outcome = f
            .executor
            .execute(&directive(Direction::Download, "b.sav", 500))
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.reason, Some(ErrorKind::IntegrityMismatch));
        assert_eq!(&f.local.read("b.sav").await.unwrap()[..], b"local copy");
        assert_eq!(f.local.modified_time("b.sav").await.unwrap(), ts(100));
        assert!(!f.local.exists(TEMP).await.unwrap());
    }

    #[tokio::test]
    async fn test_download_replace_failure_keeps_existing_final() {
        let f = fixture();
        f.remote.insert("b.sav", &b"remote"[..], ts(500));
        // 同名目录无法被当作文件删除
        std::fs::create_dir(f.local.resolve_path("b.sav")).unwrap();
        std::fs::write(f.local.resolve_path("b.sav").join("keep"), b"k").unwrap();

        let outcome = f
            .executor
            .execute(&directive(Direction::Download, "b.sav", 500))
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.reason, Some(ErrorKind::Io));
        assert!(f.local.resolve_path("b.sav").join("keep").exists());
        assert!(!f.local.exists(TEMP).await.unwrap());
    }

    #[tokio::test]
    async fn test_download_final_appears_with_source_mtime() {
        let f = fixture();
        f.remote.insert("c.sav", &b"fresh"[..], ts(1_234_567_890));

        let outcome = f
            .executor
            .execute(&directive(Direction::Download, "c.sav", 1_234_567_890))
            .await;

        assert!(outcome.succeeded, "{:?}", outcome);
        let listed = f.local.list_files().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "c.sav");
        assert_eq!(listed[0].modified_at, ts(1_234_567_890));
    }

    #[tokio::test]
    async fn test_download_fetch_failure_reports_remote() {
        let f = fixture();
        f.remote.insert("b.sav", &b"remote"[..], ts(500));
        f.remote.fail_on("fetch", "b.sav");

        let outcome = f
            .executor
            .execute(&directive(Direction::Download, "b.sav", 500))
            .await;

        assert_eq!(outcome.reason, Some(ErrorKind::Remote));
        assert!(!f.local.exists("b.sav").await.unwrap());
        assert!(!f.local.exists(TEMP).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_stale_temp_both_sides() {
        let f = fixture();
        f.local.write(TEMP, b"partial").await.unwrap();
        f.remote.insert(TEMP, &b"partial"[..], ts(1));
        f.remote.insert("a.sav", &b"keep"[..], ts(2));

        f.executor.remove_stale_temp().await;

        assert!(!f.local.exists(TEMP).await.unwrap());
        assert_eq!(f.remote.names(), vec!["a.sav"]);
    }
}
