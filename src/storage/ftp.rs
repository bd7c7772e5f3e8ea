//! FTP 远程存储（用户名/密码认证）
//!
//! 修改时间读取用 `MDTM`，写入用 `MFMT`；FTP 没有远程执行能力，
//! 哈希通过下载后本地计算获得。

use super::{run_blocking, FileRecord, RemoteStore};
use crate::config::{Credentials, RemoteConfig};
use crate::core::digest::{calculate_hash, HashAlgorithm};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::sync::{Arc, Mutex};
use suppaftp::list::File as ListEntry;
use suppaftp::types::FileType;
use suppaftp::{FtpStream, Status};
use tracing::{debug, info};

pub struct FtpStore {
    config: RemoteConfig,
    name: String,
    conn: Arc<Mutex<Option<FtpStream>>>,
}

impl FtpStore {
    pub fn new(config: RemoteConfig) -> Self {
        let name = format!(
            "ftp://{}@{}:{}/{}",
            config.username,
            config.host,
            config.port,
            config.directory.trim_start_matches('/')
        );
        Self {
            config,
            name,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        run_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| SyncError::Connection("FTP 连接状态损坏".to_string()))?;
            let stream = guard
                .as_mut()
                .ok_or_else(|| SyncError::Connection("FTP 未连接".to_string()))?;
            f(stream)
        })
        .await
    }

    fn open_stream(config: &RemoteConfig) -> Result<FtpStream> {
        let connection_err = |e: &dyn std::fmt::Display| {
            SyncError::Connection(format!("{}:{}: {}", config.host, config.port, e))
        };

        let Credentials::Password(password) = &config.credentials else {
            return Err(connection_err(&"FTP 需要用户名和密码"));
        };

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| connection_err(&e))?
            .next()
            .ok_or_else(|| connection_err(&"无法解析主机地址"))?;

        let mut stream =
            FtpStream::connect_timeout(addr, config.timeout).map_err(|e| connection_err(&e))?;
        stream
            .get_ref()
            .set_read_timeout(Some(config.timeout))
            .map_err(|e| connection_err(&e))?;
        stream
            .login(&config.username, password)
            .map_err(|e| connection_err(&format!("登录失败: {}", e)))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| connection_err(&e))?;

        if config.directory != "." && !config.directory.is_empty() {
            stream
                .cwd(&config.directory)
                .map_err(|e| connection_err(&format!("切换目录失败: {}", e)))?;
        }

        Ok(stream)
    }

    fn remote_err(op: &str, name: &str, e: impl std::fmt::Display) -> SyncError {
        SyncError::Remote(format!("{} {}: {}", op, name, e))
    }

    fn list_names(stream: &mut FtpStream) -> Result<Vec<String>> {
        let names = stream
            .nlst(None)
            .map_err(|e| SyncError::Listing(e.to_string()))?;
        // 部分服务器返回带路径的名称
        Ok(names
            .into_iter()
            .map(|n| n.rsplit('/').next().unwrap_or(&n).to_string())
            .collect())
    }
}

/// MFMT 使用的时间格式
fn mfmt_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d%H%M%S").to_string()
}

#[async_trait]
impl RemoteStore for FtpStore {
    async fn connect(&self) -> Result<()> {
        let conn = self.conn.clone();
        let config = self.config.clone();
        let name = self.name.clone();

        run_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| SyncError::Connection("FTP 连接状态损坏".to_string()))?;

            if let Some(existing) = guard.as_mut() {
                if existing.noop().is_ok() {
                    return Ok(());
                }
                debug!("FTP 连接已失效，重新连接: {}", name);
                *guard = None;
            }

            let fresh = Self::open_stream(&config)?;
            info!("已连接: {}", name);
            *guard = Some(fresh);
            Ok(())
        })
        .await
    }

    async fn list_directory(&self) -> Result<Vec<FileRecord>> {
        self.with_conn(|stream| {
            let lines = stream
                .list(None)
                .map_err(|e| SyncError::Listing(e.to_string()))?;

            let mut records = Vec::new();
            for line in lines {
                let Ok(entry) = line.parse::<ListEntry>() else {
                    debug!("无法解析 LIST 行: {}", line);
                    continue;
                };
                if !entry.is_file() {
                    continue;
                }

                // LIST 的时间只到分钟，优先使用 MDTM
                let modified = match stream.mdtm(entry.name()) {
                    Ok(naive) => naive.and_utc(),
                    Err(_) => DateTime::<Utc>::from(entry.modified()),
                };
                records.push(FileRecord::new(entry.name(), modified).with_size(entry.size() as u64));
            }
            Ok(records)
        })
        .await
    }

    async fn fetch(&self, name: &str) -> Result<Bytes> {
        let name = name.to_string();
        self.with_conn(move |stream| {
            let cursor = stream
                .retr_as_buffer(&name)
                .map_err(|e| Self::remote_err("RETR", &name, e))?;
            Ok(Bytes::from(cursor.into_inner()))
        })
        .await
    }

    async fn store(&self, data: Bytes, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |stream| {
            let mut reader = Cursor::new(data);
            stream
                .put_file(&name, &mut reader)
                .map_err(|e| Self::remote_err("STOR", &name, e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |stream| {
            if !Self::list_names(stream)?.contains(&name) {
                return Ok(());
            }
            stream
                .rm(&name)
                .map_err(|e| Self::remote_err("DELE", &name, e))
        })
        .await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.with_conn(move |stream| {
            stream
                .rename(&from, &to)
                .map_err(|e| Self::remote_err("RNFR/RNTO", &from, e))
        })
        .await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.with_conn(move |stream| Ok(Self::list_names(stream)?.contains(&name)))
            .await
    }

    async fn set_modified_time(&self, name: &str, modified_at: DateTime<Utc>) -> Result<()> {
        let name = name.to_string();
        let command = format!("MFMT {} {}", mfmt_timestamp(modified_at), name);
        self.with_conn(move |stream| {
            stream
                .custom_command(command, &[Status::File])
                .map_err(|e| Self::remote_err("MFMT", &name, e))?;
            Ok(())
        })
        .await
    }

    async fn remote_hash(&self, name: &str, algorithm: HashAlgorithm) -> Result<String> {
        let data = self.fetch(name).await?;
        Ok(calculate_hash(algorithm, &data))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_mfmt_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 29, 7, 5, 9).unwrap();
        assert_eq!(mfmt_timestamp(ts), "20240229070509");
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let store = FtpStore::new(RemoteConfig {
            transport: crate::config::TransportKind::Ftp,
            host: "localhost".to_string(),
            port: 21,
            username: "player".to_string(),
            credentials: Credentials::Password("secret".to_string()),
            directory: ".".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(store.name(), "ftp://player@localhost:21/.");
        assert!(matches!(store.fetch("a.sav").await, Err(SyncError::Connection(_))));
    }
}
