//! 应用配置模块
//!
//! 配置文件为简单的 `Key = Value` 文本，每行一项。

use crate::core::digest::HashAlgorithm;
use crate::logging::LogConfig;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 默认配置文件名（位于可执行文件同目录）
pub const CONFIG_FILE_NAME: &str = "config.cfg";

const DEFAULT_EXTENSION: &str = ".sav";
const DEFAULT_RETENTION: usize = 3;
const DEFAULT_PROCESS_NAME: &str = "FactoryGameEGS-Win64-Shipping";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_TEMP_FILE_NAME: &str = "savesync.tmp";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// 配置错误，启动阶段即终止
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("无法读取配置文件 {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("缺少必需的配置项: {0}")]
    MissingKey(String),

    #[error("配置项 {key} 的值无效 ({value:?}): {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// 原始键值对
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    entries: HashMap<String, String>,
}

impl ConfigMap {
    /// 解析 `Key = Value` 文本；空行以及 `#`、`;` 开头的行被忽略
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// 远程传输协议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Sftp,
    Ftp,
}

impl TransportKind {
    pub fn default_port(self) -> u16 {
        match self {
            TransportKind::Sftp => 22,
            TransportKind::Ftp => 21,
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sftp" | "ssh" => Ok(TransportKind::Sftp),
            "ftp" => Ok(TransportKind::Ftp),
            other => Err(format!("不支持的传输协议: {}", other)),
        }
    }
}

/// 远程登录凭据
#[derive(Clone)]
pub enum Credentials {
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
            Credentials::Password(_) => f.write_str("Password(***)"),
        }
    }
}

/// 远程存储配置
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
    /// 远程工作目录
    pub directory: String,
    /// 连接与单次操作超时
    pub timeout: Duration,
}

/// 代理配置
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub remote: RemoteConfig,
    pub local_directory: PathBuf,
    pub extension: String,
    /// 每侧保留的最近文件数
    pub retention: usize,
    pub process_name: String,
    pub poll_interval: Duration,
    pub hash_algorithm: HashAlgorithm,
    pub temp_file_name: String,
    /// 连接/列目录失败的一轮同步是否在下次轮询时重试
    pub retry_failed_pass: bool,
    pub log: LogConfig,
}

impl AgentConfig {
    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_map(&ConfigMap::load(path)?)
    }

    pub fn from_map(map: &ConfigMap) -> Result<Self, ConfigError> {
        let transport: TransportKind = map.parse_or("Transport", TransportKind::Sftp)?;

        let credentials = match transport {
            TransportKind::Sftp => Credentials::KeyFile {
                path: PathBuf::from(map.require("Keyfile")?),
                passphrase: map.get("Passphrase").map(str::to_string),
            },
            TransportKind::Ftp => Credentials::Password(map.require("Password")?.to_string()),
        };

        let remote = RemoteConfig {
            transport,
            host: map.require("Hostname")?.to_string(),
            port: map.parse_or("Port", transport.default_port())?,
            username: map.require("Username")?.to_string(),
            credentials,
            directory: map.get("RemoteDirectory").unwrap_or(".").to_string(),
            timeout: Duration::from_secs(map.parse_or("TimeoutSecs", DEFAULT_TIMEOUT_SECS)?),
        };

        let extension = map
            .get("SaveFileExtension")
            .unwrap_or(DEFAULT_EXTENSION)
            .to_string();

        let retention: usize = map.parse_or("RetentionCount", DEFAULT_RETENTION)?;
        if retention == 0 {
            return Err(invalid("RetentionCount", "0", "保留数量必须大于 0"));
        }

        let poll_secs: u64 = map.parse_or("PollIntervalSecs", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_secs == 0 {
            return Err(invalid("PollIntervalSecs", "0", "轮询间隔必须大于 0"));
        }

        let temp_file_name = map
            .get("TempFileName")
            .unwrap_or(DEFAULT_TEMP_FILE_NAME)
            .to_string();
        // 临时文件不能被选择器当作存档
        if temp_file_name.ends_with(&extension) {
            return Err(invalid(
                "TempFileName",
                &temp_file_name,
                "临时文件名不能以存档扩展名结尾",
            ));
        }

        let log_dir = map
            .get("LogDirectory")
            .map(PathBuf::from)
            .unwrap_or_else(crate::dirs::exe_dir);

        let log = LogConfig {
            enabled: map.parse_or("LogEnabled", true)?,
            max_size_mb: map.parse_or("LogMaxSizeMb", LogConfig::default().max_size_mb)?,
            level: map.get("LogLevel").unwrap_or("info").to_string(),
            directory: Some(log_dir),
        };

        Ok(Self {
            remote,
            local_directory: PathBuf::from(map.require("LocalDirectory")?),
            extension,
            retention,
            process_name: map
                .get("ProcessName")
                .unwrap_or(DEFAULT_PROCESS_NAME)
                .to_string(),
            poll_interval: Duration::from_secs(poll_secs),
            hash_algorithm: map.parse_or("HashAlgorithm", HashAlgorithm::Md5)?,
            temp_file_name,
            retry_failed_pass: map.parse_or("RetryFailedPass", true)?,
            log,
        })
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
