use super::FileRecord;
use crate::error::{Result, SyncError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::path::PathBuf;
use tokio::fs;
use walkdir::WalkDir;

/// 本地存档目录
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    base_path: PathBuf,
    name: String,
}

impl LocalDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let base_path = path.into();
        let name = format!("local:{}", base_path.display());
        Self { base_path, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn resolve_path(&self, name: &str) -> PathBuf {
        self.base_path.join(name.trim_start_matches(['/', '\\']))
    }

    /// 列出目录下的普通文件（不递归）
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let base = self.base_path.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            for entry in WalkDir::new(&base).min_depth(1).max_depth(1).follow_links(false) {
                let entry = entry.map_err(|e| SyncError::Listing(format!("{}: {}", base.display(), e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str() else {
                    continue;
                };
                let metadata = entry
                    .metadata()
                    .map_err(|e| SyncError::Listing(format!("{}: {}", name, e)))?;
                let modified = metadata.modified().map_err(SyncError::Io)?;

                records.push(
                    FileRecord::new(name, DateTime::<Utc>::from(modified)).with_size(metadata.len()),
                );
            }
            Ok(records)
        })
        .await
        .map_err(|e| SyncError::Listing(format!("扫描任务失败: {}", e)))?
    }

    pub async fn read(&self, name: &str) -> Result<Bytes> {
        let data = fs::read(self.resolve_path(name)).await?;
        Ok(Bytes::from(data))
    }

    pub async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        fs::write(self.resolve_path(name), data).await?;
        Ok(())
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(fs::try_exists(self.resolve_path(name)).await?)
    }

    /// 删除文件，不存在时视为成功
    pub async fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.resolve_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.resolve_path(from), self.resolve_path(to)).await?;
        Ok(())
    }

    pub async fn modified_time(&self, name: &str) -> Result<DateTime<Utc>> {
        let metadata = fs::metadata(self.resolve_path(name)).await?;
        Ok(super::truncate_to_seconds(DateTime::<Utc>::from(metadata.modified()?)))
    }

    pub async fn set_modified_time(&self, name: &str, modified_at: DateTime<Utc>) -> Result<()> {
        let path = self.resolve_path(name);
        let mtime = FileTime::from_unix_time(modified_at.timestamp(), 0);
        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_list_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sav"), b"a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        std::fs::create_dir(dir.path().join("backup.sav")).unwrap();
        std::fs::write(dir.path().join("backup.sav").join("old.sav"), b"o").unwrap();

        let local = LocalDirectory::new(dir.path());
        let mut names: Vec<_> = local
            .list_files()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.sav", "notes.txt"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_listing_error() {
        let local = LocalDirectory::new("/definitely/not/a/save/dir");
        assert!(matches!(local.list_files().await, Err(SyncError::Listing(_))));
    }

    #[tokio::test]
    async fn test_set_modified_time_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalDirectory::new(dir.path());
        local.write("a.sav", b"data").await.unwrap();

        let ts = Utc.with_ymd_and_hms(2023, 5, 1, 12, 30, 15).unwrap();
        local.set_modified_time("a.sav", ts).await.unwrap();
        assert_eq!(local.modified_time("a.sav").await.unwrap(), ts);

        let listed = local.list_files().await.unwrap();
        assert_eq!(listed[0].modified_at, ts);
        assert_eq!(listed[0].size, Some(4));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalDirectory::new(dir.path());
        local.delete("ghost.sav").await.unwrap();
        assert!(!local.exists("ghost.sav").await.unwrap());
    }
}
