//! SSH + SFTP 远程存储（私钥认证）

use super::{run_blocking, FileRecord, RemoteStore};
use crate::config::{Credentials, RemoteConfig};
use crate::core::digest::{calculate_hash, parse_hash_output, HashAlgorithm};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// SFTP 状态码：文件不存在
const SFTP_NO_SUCH_FILE: i32 = 2;

struct SshConnection {
    session: Session,
    sftp: Sftp,
}

pub struct SftpStore {
    config: RemoteConfig,
    name: String,
    conn: Arc<Mutex<Option<SshConnection>>>,
}

impl SftpStore {
    pub fn new(config: RemoteConfig) -> Self {
        let name = format!(
            "sftp://{}@{}:{}/{}",
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

    /// 远程路径始终使用 `/` 分隔（本地可能是 Windows）
    fn remote_path(&self, name: &str) -> PathBuf {
        let dir = self.config.directory.trim_end_matches('/');
        if dir.is_empty() && self.config.directory.starts_with('/') {
            PathBuf::from(format!("/{}", name))
        } else if dir.is_empty() || dir == "." {
            PathBuf::from(name)
        } else {
            PathBuf::from(format!("{}/{}", dir, name))
        }
    }

    /// 在已建立的连接上执行阻塞操作
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SshConnection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        run_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| SyncError::Connection("SFTP 连接状态损坏".to_string()))?;
            let conn = guard
                .as_ref()
                .ok_or_else(|| SyncError::Connection("SFTP 未连接".to_string()))?;
            f(conn)
        })
        .await
    }

    fn open_session(config: &RemoteConfig) -> Result<SshConnection> {
        let connection_err = |e: &dyn std::fmt::Display| {
            SyncError::Connection(format!("{}:{}: {}", config.host, config.port, e))
        };

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| connection_err(&e))?
            .next()
            .ok_or_else(|| connection_err(&"无法解析主机地址"))?;

        let tcp = TcpStream::connect_timeout(&addr, config.timeout).map_err(|e| connection_err(&e))?;
        tcp.set_read_timeout(Some(config.timeout))
            .map_err(|e| connection_err(&e))?;
        tcp.set_write_timeout(Some(config.timeout))
            .map_err(|e| connection_err(&e))?;

        let mut session = Session::new().map_err(|e| connection_err(&e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(config.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake().map_err(|e| connection_err(&e))?;

        match &config.credentials {
            Credentials::KeyFile { path, passphrase } => {
                session
                    .userauth_pubkey_file(&config.username, None, path, passphrase.as_deref())
                    .map_err(|e| connection_err(&format!("私钥认证失败: {}", e)))?;
            }
            Credentials::Password(password) => {
                session
                    .userauth_password(&config.username, password)
                    .map_err(|e| connection_err(&format!("密码认证失败: {}", e)))?;
            }
        }
        if !session.authenticated() {
            return Err(connection_err(&"认证未通过"));
        }

        let sftp = session.sftp().map_err(|e| connection_err(&e))?;
        Ok(SshConnection { session, sftp })
    }

    fn is_not_found(e: &ssh2::Error) -> bool {
        e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE)
    }

    fn remote_err(op: &str, path: &std::path::Path, e: impl std::fmt::Display) -> SyncError {
        SyncError::Remote(format!("{} {}: {}", op, path.display(), e))
    }

    /// 通过远程 shell 运行 md5sum/b3sum
    fn exec_hash(conn: &SshConnection, path: &std::path::Path, algorithm: HashAlgorithm) -> Result<String> {
        let command = format!(
            "{} {}",
            algorithm.remote_command(),
            shell_quote(&path.to_string_lossy())
        );

        let mut channel = conn
            .session
            .channel_session()
            .map_err(|e| Self::remote_err("channel", path, e))?;
        channel
            .exec(&command)
            .map_err(|e| Self::remote_err("exec", path, e))?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| Self::remote_err("exec", path, e))?;
        channel
            .wait_close()
            .map_err(|e| Self::remote_err("exec", path, e))?;

        let status = channel
            .exit_status()
            .map_err(|e| Self::remote_err("exec", path, e))?;
        if status != 0 {
            return Err(Self::remote_err(&command, path, format!("退出码 {}", status)));
        }

        parse_hash_output(&output)
            .ok_or_else(|| Self::remote_err(&command, path, format!("无法解析输出: {:?}", output.trim())))
    }
}

/// 单引号包裹，供远程 shell 使用
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[async_trait]
impl RemoteStore for SftpStore {
    async fn connect(&self) -> Result<()> {
        let conn = self.conn.clone();
        let config = self.config.clone();
        let name = self.name.clone();

        run_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| SyncError::Connection("SFTP 连接状态损坏".to_string()))?;

            // 复用仍然可用的连接
            if let Some(existing) = guard.as_ref() {
                if existing.sftp.stat(std::path::Path::new(&config.directory)).is_ok() {
                    return Ok(());
                }
                debug!("SFTP 连接已失效，重新连接: {}", name);
                *guard = None;
            }

            let fresh = Self::open_session(&config)?;
            info!("已连接: {}", name);
            *guard = Some(fresh);
            Ok(())
        })
        .await
    }

    async fn list_directory(&self) -> Result<Vec<FileRecord>> {
        let dir = PathBuf::from(&self.config.directory);
        self.with_conn(move |conn| {
            let entries = conn
                .sftp
                .readdir(&dir)
                .map_err(|e| SyncError::Listing(format!("{}: {}", dir.display(), e)))?;

            Ok(entries
                .into_iter()
                .filter(|(_, stat)| stat.is_file())
                .filter_map(|(path, stat)| {
                    let name = path.file_name()?.to_str()?.to_string();
                    let mtime = stat.mtime.unwrap_or(0);
                    let modified = DateTime::<Utc>::from_timestamp(mtime as i64, 0)?;
                    let record = FileRecord::new(name, modified);
                    Some(match stat.size {
                        Some(size) => record.with_size(size),
                        None => record,
                    })
                })
                .collect())
        })
        .await
    }

    async fn fetch(&self, name: &str) -> Result<Bytes> {
        let path = self.remote_path(name);
        self.with_conn(move |conn| {
            let mut file = conn
                .sftp
                .open(&path)
                .map_err(|e| Self::remote_err("open", &path, e))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .map_err(|e| Self::remote_err("read", &path, e))?;
            Ok(Bytes::from(data))
        })
        .await
    }

    async fn store(&self, data: Bytes, name: &str) -> Result<()> {
        let path = self.remote_path(name);
        self.with_conn(move |conn| {
            let mut file = conn
                .sftp
                .create(&path)
                .map_err(|e| Self::remote_err("create", &path, e))?;
            file.write_all(&data)
                .map_err(|e| Self::remote_err("write", &path, e))?;
            file.flush()
                .map_err(|e| Self::remote_err("write", &path, e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.remote_path(name);
        self.with_conn(move |conn| match conn.sftp.unlink(&path) {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            Err(e) => Err(Self::remote_err("unlink", &path, e)),
        })
        .await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.remote_path(from);
        let dst = self.remote_path(to);
        self.with_conn(move |conn| {
            conn.sftp
                .rename(&src, &dst, None)
                .map_err(|e| Self::remote_err("rename", &src, e))
        })
        .await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.remote_path(name);
        self.with_conn(move |conn| match conn.sftp.stat(&path) {
            Ok(_) => Ok(true),
            Err(e) if Self::is_not_found(&e) => Ok(false),
            Err(e) => Err(Self::remote_err("stat", &path, e)),
        })
        .await
    }

    async fn set_modified_time(&self, name: &str, modified_at: DateTime<Utc>) -> Result<()> {
        let path = self.remote_path(name);
        let secs = modified_at.timestamp().max(0) as u64;
        self.with_conn(move |conn| {
            let stat = FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: None,
                atime: Some(secs),
                mtime: Some(secs),
            };
            conn.sftp
                .setstat(&path, stat)
                .map_err(|e| Self::remote_err("setstat", &path, e))
        })
        .await
    }

    async fn remote_hash(&self, name: &str, algorithm: HashAlgorithm) -> Result<String> {
        let path = self.remote_path(name);
        self.with_conn(move |conn| match Self::exec_hash(conn, &path, algorithm) {
            Ok(hash) => Ok(hash),
            Err(e) => {
                // 远程没有可用的哈希命令时，下载后本地计算
                warn!("远程哈希命令失败，改为下载校验: {}", e);
                let mut file = conn
                    .sftp
                    .open(&path)
                    .map_err(|e| Self::remote_err("open", &path, e))?;
                let mut data = Vec::new();
                file.read_to_end(&mut data)
                    .map_err(|e| Self::remote_err("read", &path, e))?;
                Ok(calculate_hash(algorithm, &data))
            }
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
