//! 文件选择器 - 从目录列表中挑出最近的 N 个存档

use crate::storage::FileRecord;
use std::collections::HashSet;

/// 按修改时间降序排列的存档集合，长度不超过保留数量，名称不重复
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    records: Vec<FileRecord>,
}

impl Selection {
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 最新的一项
    pub fn newest(&self) -> Option<&FileRecord> {
        self.records.first()
    }

    pub fn find(&self, name: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }
}

/// 过滤扩展名，按修改时间降序（稳定排序），截取前 `limit` 个
pub fn select(entries: &[FileRecord], extension: &str, limit: usize) -> Selection {
    let mut candidates: Vec<&FileRecord> = entries
        .iter()
        .filter(|r| r.name.ends_with(extension))
        .collect();

    // sort_by 是稳定排序，时间相同的保持列表原顺序
    candidates.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));

    let mut seen = HashSet::new();
    let records = candidates
        .into_iter()
        .filter(|r| seen.insert(r.name.as_str()))
        .take(limit)
        .cloned()
        .collect();

    Selection { records }
}
