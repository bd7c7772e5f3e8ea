pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod process;
pub mod storage;

pub use config::{AgentConfig, ConfigError};
pub use core::{Direction, SyncConfig, SyncEngine, SyncReport};
pub use error::{ErrorKind, SyncError};
pub use monitor::{LifecycleMonitor, MonitorConfig, MonitorState};

use logging::LogConfig;
use process::SystemProcessProbe;
use std::path::Path;
use storage::{create_remote_store, LocalDirectory};
use tracing_appender::non_blocking::WorkerGuard;

/// 加载配置并初始化日志
///
/// 配置无法加载时使用默认日志配置（写到 `exe_dir`），错误会先写入日志再返回。
pub fn bootstrap(
    exe_dir: &Path,
    config_path: &Path,
) -> (Option<WorkerGuard>, Result<AgentConfig, ConfigError>) {
    let loaded = AgentConfig::load(config_path);
    let log_config = match &loaded {
        Ok(config) => config.log.clone(),
        Err(_) => LogConfig {
            directory: Some(exe_dir.to_path_buf()),
            ..LogConfig::default()
        },
    };

    let guard = logging::init(&log_config);
    tracing::info!("ExePath: {}", exe_dir.display());
    tracing::info!("ConfigPath: {}", config_path.display());
    if let Err(e) = &loaded {
        tracing::error!("加载配置失败: {}", e);
    }

    (guard, loaded)
}

/// 根据配置组装监视器
pub fn build_monitor(config: &AgentConfig) -> LifecycleMonitor<SystemProcessProbe, SyncEngine> {
    let remote = create_remote_store(&config.remote);
    let local = LocalDirectory::new(config.local_directory.clone());
    let engine = SyncEngine::new(
        remote,
        local,
        SyncConfig {
            extension: config.extension.clone(),
            retention: config.retention,
            temp_file_name: config.temp_file_name.clone(),
            hash_algorithm: config.hash_algorithm,
        },
    );

    LifecycleMonitor::new(
        SystemProcessProbe,
        engine,
        MonitorConfig {
            process_name: config.process_name.clone(),
            poll_interval: config.poll_interval,
            retry_failed_pass: config.retry_failed_pass,
        },
    )
}

pub mod dirs {
    use std::path::PathBuf;

    /// 可执行文件所在目录，获取失败时使用当前目录
    pub fn exe_dir() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_written_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("missing.cfg");

        let (guard, loaded) = bootstrap(dir.path(), &config_path);
        assert!(matches!(loaded, Err(ConfigError::Unreadable { .. })));
        // 释放 guard 以刷新后台写入
        drop(guard);

        let log = std::fs::read_to_string(dir.path().join(logging::LOG_FILE_NAME)).unwrap();
        assert!(log.contains("ConfigPath"));
        assert!(log.contains("missing.cfg"));
        assert!(log.contains("加载配置失败"));
    }
}
