//! 同步错误分类

use serde::Serialize;
use std::fmt;

/// 同步过程中的错误
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 无法连接远程存储
    #[error("连接远程存储失败: {0}")]
    Connection(String),

    /// 列出本地或远程目录失败
    #[error("列出目录失败: {0}")]
    Listing(String),

    /// 传输后哈希校验不一致
    #[error("完整性校验失败: {name} (本地={local}, 远程={remote})")]
    IntegrityMismatch {
        name: String,
        local: String,
        remote: String,
    },

    /// 本地文件读写失败
    #[error("本地 IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 远程操作失败（列目录以外）
    #[error("远程操作失败: {0}")]
    Remote(String),

    /// 操作超时
    #[error("操作超时: {0}")]
    Timeout(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Connection(_) => ErrorKind::Connection,
            SyncError::Listing(_) => ErrorKind::Listing,
            SyncError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            SyncError::Io(_) => ErrorKind::Io,
            SyncError::Remote(_) => ErrorKind::Remote,
            SyncError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// 是否属于整轮同步级别的失败（连接、列目录）
    pub fn aborts_pass(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Listing)
    }
}

/// 错误类别，用于传输结果和日志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Listing,
    IntegrityMismatch,
    Io,
    Remote,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Listing => write!(f, "listing"),
            ErrorKind::IntegrityMismatch => write!(f, "integrity mismatch"),
            ErrorKind::Io => write!(f, "io"),
            ErrorKind::Remote => write!(f, "remote"),
            ErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_level_errors() {
        assert!(SyncError::Connection("refused".into()).aborts_pass());
        assert!(SyncError::Listing("denied".into()).aborts_pass());
        assert!(!SyncError::Remote("rename".into()).aborts_pass());

        let io = SyncError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(!io.aborts_pass());
    }
}
