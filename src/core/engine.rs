//! 同步引擎 - 执行一轮单向同步
//!
//! 一轮同步的步骤：连接 -> 清理遗留临时文件 -> 列出两侧 -> 选择 -> 比较 -> 逐个传输。
//! 连接或列目录失败时整轮中止并返回错误；单个文件失败只记录在报告中。

use crate::core::comparator::{reconcile, ActionSummary, Direction};
use crate::core::digest::HashAlgorithm;
use crate::core::selector::select;
use crate::core::transfer::{TransferExecutor, TransferOutcome};
use crate::error::{Result, SyncError};
use crate::storage::{with_timeout, LocalDirectory, RemoteStore, OP_TIMEOUT_SECS};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub extension: String,
    pub retention: usize,
    pub temp_file_name: String,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            extension: ".sav".to_string(),
            retention: 3,
            temp_file_name: "savesync.tmp".to_string(),
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

/// 单轮同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// 源集合中参与比较的文件数
    pub considered: usize,
    pub transferred: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_transferred: u64,
    /// 是否因关闭信号提前结束
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(direction: Direction, started_at: DateTime<Utc>) -> Self {
        Self {
            direction,
            started_at,
            ended_at: started_at,
            considered: 0,
            transferred: 0,
            failed: 0,
            skipped: 0,
            bytes_transferred: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, outcome: &TransferOutcome) {
        if outcome.succeeded {
            self.transferred += 1;
            self.bytes_transferred += outcome.bytes;
        } else {
            self.failed += 1;
            let reason = outcome
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            self.errors.push(format!("{}: {}", outcome.file_name, reason));
        }
    }
}

/// 同步引擎
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    local: LocalDirectory,
    executor: TransferExecutor,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteStore>, local: LocalDirectory, config: SyncConfig) -> Self {
        let executor = TransferExecutor::new(
            remote.clone(),
            local.clone(),
            config.temp_file_name.clone(),
            config.hash_algorithm,
        );
        Self {
            remote,
            local,
            executor,
            config,
        }
    }

    /// 执行一轮同步
    pub async fn run_pass(
        &self,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::new(direction, Utc::now());
        info!(
            "开始 {} 同步: {} <-> {}",
            direction,
            self.local.name(),
            self.remote.name()
        );

        with_timeout(OP_TIMEOUT_SECS, "connect", self.remote.connect())
            .await
            .map_err(|e| match e {
                SyncError::Timeout(msg) => SyncError::Connection(msg),
                other => other,
            })?;

        self.executor.remove_stale_temp().await;

        let local_entries = self.local.list_files().await?;
        let remote_entries = with_timeout(
            OP_TIMEOUT_SECS,
            "list_directory",
            self.remote.list_directory(),
        )
        .await
        .map_err(|e| match e {
            SyncError::Listing(msg) | SyncError::Timeout(msg) | SyncError::Remote(msg) => {
                SyncError::Listing(msg)
            }
            other => other,
        })?;

        let local = select(&local_entries, &self.config.extension, self.config.retention);
        let remote = select(&remote_entries, &self.config.extension, self.config.retention);
        if local.is_empty() && remote.is_empty() {
            debug!("两侧都没有 {} 存档", self.config.extension);
        }
        debug!("本地选择: {:?}", local.names());
        debug!("远程选择: {:?}", remote.names());

        let directives = reconcile(direction, &local, &remote);
        let source_len = match direction {
            Direction::Upload => local.len(),
            Direction::Download => remote.len(),
        };
        let summary = ActionSummary::new(source_len, &directives);
        report.considered = summary.considered;
        report.skipped = summary.skipped;
        info!(
            "比较完成: {} 个候选, {} 个需要传输, {} 个跳过",
            summary.considered, summary.to_transfer, summary.skipped
        );

        for directive in &directives {
            if cancel.is_cancelled() {
                warn!("收到关闭信号，停止剩余传输");
                report.cancelled = true;
                break;
            }
            let outcome = self.executor.execute(directive).await;
            report.record(&outcome);
        }

        report.ended_at = Utc::now();
        info!(
            "{} 同步结束: 传输 {} 个, 失败 {} 个, 跳过 {} 个",
            direction, report.transferred, report.failed, report.skipped
        );
        match serde_json::to_string(&report) {
            Ok(json) => debug!("同步报告: {}", json),
            Err(e) => warn!("序列化同步报告失败: {}", e),
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    struct Fixture {
        _dir: tempfile::TempDir,
        local: LocalDirectory,
        remote: Arc<MemoryStore>,
        engine: SyncEngine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalDirectory::new(dir.path());
        let remote = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(remote.clone(), local.clone(), SyncConfig::default());
        Fixture {
            _dir: dir,
            local,
            remote,
            engine,
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn write_local(local: &LocalDirectory, name: &str, data: &[u8], secs: i64) {
        local.write(name, data).await.unwrap();
        local.set_modified_time(name, ts(secs)).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_into_empty_remote() {
        let f = fixture();
        write_local(&f.local, "a.sav", b"aaa", 1_000).await;
        write_local(&f.local, "b.sav", b"bbbb", 2_000).await;
        write_local(&f.local, "c.sav", b"ccccc", 3_000).await;
        write_local(&f.local, "notes.txt", b"ignored", 9_000).await;

        let report = f
            .engine
            .run_pass(Direction::Upload, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.considered, 3);
        assert_eq!(report.transferred, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.bytes_transferred, 12);
        assert_eq!(f.remote.names(), vec!["a.sav", "b.sav", "c.sav"]);
        for (name, secs) in [("a.sav", 1_000), ("b.sav", 2_000), ("c.sav", 3_000)] {
            let (data, modified) = f.remote.get(name).unwrap();
            assert_eq!(data, f.local.read(name).await.unwrap());
            assert_eq!(modified, ts(secs));
        }
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let f = fixture();
        f.remote.insert("a.sav", &b"remote a"[..], ts(500));
        f.remote.insert("b.sav", &b"remote b"[..], ts(600));

        let cancel = CancellationToken::new();
        let first = f.engine.run_pass(Direction::Download, &cancel).await.unwrap();
        assert_eq!(first.transferred, 2);

        let second = f.engine.run_pass(Direction::Download, &cancel).await.unwrap();
        assert_eq!(second.transferred, 0);
        assert_eq!(second.skipped, 2);

        let upload = f.engine.run_pass(Direction::Upload, &cancel).await.unwrap();
        assert_eq!(upload.transferred, 0);
    }

    #[tokio::test]
    async fn test_retention_window_limits_upload() {
        let f = fixture();
        for i in 1..=5 {
            write_local(&f.local, &format!("s{}.sav", i), b"x", i * 100).await;
        }

        let report = f
            .engine
            .run_pass(Direction::Upload, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.transferred, 3);
        assert_eq!(f.remote.names(), vec!["s3.sav", "s4.sav", "s5.sav"]);
    }

    #[tokio::test]
    async fn test_connection_failure_aborts_pass() {
        let f = fixture();
        write_local(&f.local, "a.sav", b"a", 100).await;
        f.remote.fail_connect(true);

        let err = f
            .engine
            .run_pass(Direction::Upload, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.aborts_pass());
        assert!(f.remote.names().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_pass() {
        let f = fixture();
        f.remote.fail_listing(true);

        let err = f
            .engine
            .run_pass(Direction::Download, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Listing);
    }

    #[tokio::test]
    async fn test_failed_directive_does_not_abort_others() {
        let f = fixture();
        f.remote.insert("a.sav", &b"a"[..], ts(100));
        f.remote.insert("b.sav", &b"b"[..], ts(200));
        f.remote.insert("c.sav", &b"c"[..], ts(300));
        f.remote.fail_on("fetch", "b.sav");

        let report = f
            .engine
            .run_pass(Direction::Download, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.transferred, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, vec!["b.sav: remote".to_string()]);
        assert!(f.local.exists("a.sav").await.unwrap());
        assert!(!f.local.exists("b.sav").await.unwrap());
        assert!(f.local.exists("c.sav").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_before_transfers() {
        let f = fixture();
        write_local(&f.local, "a.sav", b"a", 100).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = f.engine.run_pass(Direction::Upload, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.transferred, 0);
        assert!(f.remote.names().is_empty());
    }

    /// 在第一个文件写完修改时间（上传的最后一步）后触发取消
    struct CancelAfterFirstUpload {
        inner: Arc<MemoryStore>,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl RemoteStore for CancelAfterFirstUpload {
        async fn connect(&self) -> Result<()> {
            self.inner.connect().await
        }
        async fn list_directory(&self) -> Result<Vec<crate::storage::FileRecord>> {
            self.inner.list_directory().await
        }
        async fn fetch(&self, name: &str) -> Result<bytes::Bytes> {
            self.inner.fetch(name).await
        }
        async fn store(&self, data: bytes::Bytes, name: &str) -> Result<()> {
            self.inner.store(data, name).await
        }
        async fn delete(&self, name: &str) -> Result<()> {
            self.inner.delete(name).await
        }
        async fn rename(&self, from: &str, to: &str) -> Result<()> {
            self.inner.rename(from, to).await
        }
        async fn exists(&self, name: &str) -> Result<bool> {
            self.inner.exists(name).await
        }
        async fn set_modified_time(&self, name: &str, modified_at: DateTime<Utc>) -> Result<()> {
            let result = self.inner.set_modified_time(name, modified_at).await;
            self.cancel.cancel();
            result
        }
        async fn remote_hash(&self, name: &str, algorithm: HashAlgorithm) -> Result<String> {
            self.inner.remote_hash(name, algorithm).await
        }
        fn name(&self) -> &str {
            "cancel-after-first"
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_pass_finishes_current_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalDirectory::new(dir.path());
        write_local(&local, "a.sav", b"aaa", 1_000).await;
        write_local(&local, "b.sav", b"bbb", 2_000).await;
        write_local(&local, "c.sav", b"ccc", 3_000).await;

        let cancel = CancellationToken::new();
        let inner = Arc::new(MemoryStore::new());
        let remote = Arc::new(CancelAfterFirstUpload {
            inner: inner.clone(),
            cancel: cancel.clone(),
        });
        let engine = SyncEngine::new(remote, local, SyncConfig::default());

        let report = engine.run_pass(Direction::Upload, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.considered, 3);
        assert_eq!(report.transferred, 1);
        assert_eq!(report.failed, 0);
        // 最新的 c.sav 完整落地，其余未开始，远程没有临时文件
        assert_eq!(inner.names(), vec!["c.sav"]);
        let (data, modified) = inner.get("c.sav").unwrap();
        assert_eq!(&data[..], b"ccc");
        assert_eq!(modified, ts(3_000));
        assert!(!dir.path().join("savesync.tmp").exists());
    }

    #[tokio::test]
    async fn test_stale_temp_removed_at_pass_start() {
        let f = fixture();
        f.remote.insert("savesync.tmp", &b"half"[..], ts(1));
        f.local.write("savesync.tmp", b"half").await.unwrap();

        f.engine
            .run_pass(Direction::Download, &CancellationToken::new())
            .await
            .unwrap();

        assert!(f.remote.names().is_empty());
        assert!(!f.local.exists("savesync.tmp").await.unwrap());
    }
}
