//! 日志模块 - 提供文件日志和大小管理功能

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "savesync.log";

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 是否启用日志记录
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// 日志目录，未设置时使用可执行文件目录
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_mb: 5,
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(crate::dirs::exe_dir)
    }
}

/// 带大小限制的日志写入器，超过上限时轮转为 `.old`
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;

        let mut writer = Self {
            file_path,
            max_size,
            written: 0,
            writer: None,
        };
        writer.open()?;
        Ok(writer)
    }

    fn open(&mut self) -> io::Result<()> {
        // 已有文件超过上限则先轮转
        let existing = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        if existing > self.max_size {
            self.rotate_file()?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn rotate_file(&self) -> io::Result<()> {
        let backup_path = self.file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(&self.file_path, &backup_path)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }
        self.rotate_file()?;
        self.open()
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Writer not available"))?;
        let n = writer.write(buf)?;
        writer.flush()?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// 初始化日志系统，返回的 guard 需在进程生命周期内保持
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let env_filter = EnvFilter::builder()
        .with_default_directive(config.tracing_level().into())
        .from_env_lossy();

    // 控制台层按分支分别构造：其 subscriber 类型参数因分支而异
    fn console_layer<S>() -> tracing_subscriber::fmt::Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    }

    match SizeRotatingWriter::new(&config.log_dir(), config.max_size_mb) {
        Ok(file_writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false);

            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer())
                .try_init();
            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer())
                .try_init();
            tracing::warn!("无法创建日志文件，仅输出到控制台: {}", e);
            None
        }
    }
}
