//! 内存存储 - 不依赖网络的远程存储实现，用于测试与演练

use super::{FileRecord, RemoteStore};
use crate::core::digest::{calculate_hash, HashAlgorithm};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Bytes,
    modified_at: DateTime<Utc>,
}

/// 内存中的远程存储，支持注入故障
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, MemoryFile>>,
    /// 写入时翻转首字节，模拟传输损坏
    corrupt_stores: AtomicBool,
    /// 远程哈希返回错误值
    corrupt_hashes: AtomicBool,
    fail_connect: AtomicBool,
    fail_listing: AtomicBool,
    /// (操作, 文件名) 形式的失败点
    failures: Mutex<HashSet<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, data: impl Into<Bytes>, modified_at: DateTime<Utc>) {
        self.lock_files().insert(
            name.to_string(),
            MemoryFile {
                data: data.into(),
                modified_at: super::truncate_to_seconds(modified_at),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<(Bytes, DateTime<Utc>)> {
        self.lock_files()
            .get(name)
            .map(|f| (f.data.clone(), f.modified_at))
    }

    pub fn names(&self) -> Vec<String> {
        self.lock_files().keys().cloned().collect()
    }

    pub fn corrupt_stores(&self, enabled: bool) {
        self.corrupt_stores.store(enabled, Ordering::SeqCst);
    }

    pub fn corrupt_hashes(&self, enabled: bool) {
        self.corrupt_hashes.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, enabled: bool) {
        self.fail_connect.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_listing(&self, enabled: bool) {
        self.fail_listing.store(enabled, Ordering::SeqCst);
    }

    /// 让指定操作在指定文件上失败，如 `fail_on("rename", "tmp")`
    pub fn fail_on(&self, op: &str, name: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert((op.to_string(), name.to_string()));
        }
    }

    fn check(&self, op: &str, name: &str) -> Result<()> {
        let injected = self
            .failures
            .lock()
            .map(|f| f.contains(&(op.to_string(), name.to_string())))
            .unwrap_or(false);
        if injected {
            return Err(SyncError::Remote(format!("{} {} 注入失败", op, name)));
        }
        Ok(())
    }

    fn lock_files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MemoryFile>> {
        // 测试中 panic 导致的中毒不影响数据本身
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn not_found(name: &str) -> SyncError {
        SyncError::Remote(format!("文件不存在: {}", name))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SyncError::Connection("memory: 连接被拒绝".to_string()));
        }
        Ok(())
    }

    async fn list_directory(&self) -> Result<Vec<FileRecord>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SyncError::Listing("memory: 列目录失败".to_string()));
        }
        Ok(self
            .lock_files()
            .iter()
            .map(|(name, f)| FileRecord::new(name.as_str(), f.modified_at).with_size(f.data.len() as u64))
            .collect())
    }

    async fn fetch(&self, name: &str) -> Result<Bytes> {
        self.check("fetch", name)?;
        self.lock_files()
            .get(name)
            .map(|f| f.data.clone())
            .ok_or_else(|| Self::not_found(name))
    }

    async fn store(&self, data: Bytes, name: &str) -> Result<()> {
        self.check("store", name)?;
        let data = if self.corrupt_stores.load(Ordering::SeqCst) && !data.is_empty() {
            let mut damaged = data.to_vec();
            damaged[0] ^= 0xff;
            Bytes::from(damaged)
        } else {
            data
        };
        self.insert(name, data, Utc::now());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.check("delete", name)?;
        self.lock_files().remove(name);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check("rename", from)?;
        let mut files = self.lock_files();
        let file = files.remove(from).ok_or_else(|| Self::not_found(from))?;
        files.insert(to.to_string(), file);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock_files().contains_key(name))
    }

    async fn set_modified_time(&self, name: &str, modified_at: DateTime<Utc>) -> Result<()> {
        self.check("set_modified_time", name)?;
        let mut files = self.lock_files();
        let file = files.get_mut(name).ok_or_else(|| Self::not_found(name))?;
        file.modified_at = super::truncate_to_seconds(modified_at);
        Ok(())
    }

    async fn remote_hash(&self, name: &str, algorithm: HashAlgorithm) -> Result<String> {
        self.check("remote_hash", name)?;
        if self.corrupt_hashes.load(Ordering::SeqCst) {
            return Ok("0".repeat(32));
        }
        let data = self.fetch(name).await?;
        Ok(calculate_hash(algorithm, &data))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
