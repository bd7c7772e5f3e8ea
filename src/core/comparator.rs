//! 同步比较 - 根据两侧的存档集合决定需要传输的文件
//!
//! 一轮同步只有一个方向：下载时远程为源、本地为目标，上传时反之。
//! 对源集合中的每一项（按集合顺序）：
//!
//! 1. 目标集合为空：传输；
//! 2. 目标中有同名文件且源更新：传输；
//! 3. 目标中没有同名文件，但源比目标集合中最新的一项还新：传输；
//! 4. 其余跳过。
//!
//! 第 3 条只和目标集合（保留窗口内）比较。如果目标在窗口之外还留着一个同名且更新的副本，
//! 这里仍可能选中传输，这是有意保留的行为。

use crate::core::selector::Selection;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 本地 -> 远程（进程退出时）
    Upload,
    /// 远程 -> 本地（进程启动时）
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// 一次传输决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDirective {
    pub direction: Direction,
    pub file_name: String,
    /// 源文件在列目录时的修改时间，传输后写到目标上
    pub source_modified_at: DateTime<Utc>,
}

/// 判断源记录需要传输的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferReason {
    TargetEmpty,
    SameNameNewer,
    NewerThanNewest,
}

/// 计算一轮同步的传输列表，顺序与源集合一致
pub fn reconcile(
    direction: Direction,
    local: &Selection,
    remote: &Selection,
) -> Vec<TransferDirective> {
    let (source, target) = match direction {
        Direction::Download => (remote, local),
        Direction::Upload => (local, remote),
    };

    source
        .iter()
        .filter_map(|record| {
            let reason = transfer_reason(record.modified_at, &record.name, target)?;
            tracing::debug!("{} {}: {:?}", direction, record.name, reason);
            Some(TransferDirective {
                direction,
                file_name: record.name.clone(),
                source_modified_at: record.modified_at,
            })
        })
        .collect()
}

fn transfer_reason(
    modified_at: DateTime<Utc>,
    name: &str,
    target: &Selection,
) -> Option<TransferReason> {
    let Some(newest) = target.newest() else {
        return Some(TransferReason::TargetEmpty);
    };

    match target.find(name) {
        Some(existing) if modified_at > existing.modified_at => Some(TransferReason::SameNameNewer),
        Some(_) => None,
        None if modified_at > newest.modified_at => Some(TransferReason::NewerThanNewest),
        None => None,
    }
}

/// 传输列表统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub considered: usize,
    pub to_transfer: usize,
    pub skipped: usize,
}

impl ActionSummary {
    pub fn new(source_len: usize, directives: &[TransferDirective]) -> Self {
        Self {
            considered: source_len,
            to_transfer: directives.len(),
            skipped: source_len.saturating_sub(directives.len()),
        }
    }
}
