//! 内容哈希 - 本地与远程两侧使用同一算法比较

use md5::{Digest, Md5};
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

/// `md5sum`/`b3sum` 输出的十六进制哈希
static HASH_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{32,}$").ok());

/// 完整性校验使用的哈希算法（均输出 128 位十六进制串）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// 与远程 `md5sum` 兼容
    #[default]
    Md5,
    /// BLAKE3 截取前 128 位，与远程 `b3sum` 输出前缀兼容
    Blake3,
}

impl HashAlgorithm {
    /// 远程 shell 上计算哈希的命令
    pub fn remote_command(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5sum",
            HashAlgorithm::Blake3 => "b3sum",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "blake3" | "b3" => Ok(HashAlgorithm::Blake3),
            other => Err(format!("不支持的哈希算法: {}", other)),
        }
    }
}

/// 计算内容哈希（小写十六进制，32 个字符）
pub fn calculate_hash(algorithm: HashAlgorithm, data: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Md5 => {
            let digest = Md5::digest(data);
            digest.iter().map(|b| format!("{:02x}", b)).collect()
        }
        HashAlgorithm::Blake3 => {
            let hash = blake3::hash(data);
            // 只取前 16 字节（32 个十六进制字符）
            hash.to_hex()[..32].to_string()
        }
    }
}

/// 从 `md5sum`/`b3sum` 输出中提取哈希
///
/// 输出格式为 `<hex>  <name>`，`b3sum` 的 256 位结果截取为 128 位。
pub fn parse_hash_output(output: &str) -> Option<String> {
    let token = output.split_whitespace().next()?;
    // md5sum 对含特殊字符的文件名会在哈希前加反斜杠
    let token = token.trim_start_matches('\\');
    if !HASH_TOKEN.as_ref()?.is_match(token) {
        return None;
    }
    Some(token[..32].to_lowercase())
}

/// 比较两个哈希（忽略大小写）
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vector() {
        assert_eq!(
            calculate_hash(HashAlgorithm::Md5, b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_blake3_truncated() {
        let hash = calculate_hash(HashAlgorithm::Blake3, b"save data");
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, blake3::hash(b"save data").to_hex()[..32].to_string());
    }

    #[test]
    fn test_parse_hash_output() {
        assert_eq!(
            parse_hash_output("5eb63bbbe01eeed093cb22bb8f5acdc3  tmp.sav\n").as_deref(),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
        let b3 = blake3::hash(b"x").to_hex().to_string();
        assert_eq!(
            parse_hash_output(&format!("{}  a.sav", b3)),
            Some(b3[..32].to_string())
        );
        assert_eq!(parse_hash_output("md5sum: a.sav: No such file or directory"), None);
        assert_eq!(parse_hash_output(""), None);
    }

    #[test]
    fn test_parse_hash_output_escaped_and_uppercase() {
        assert!(HASH_TOKEN.is_some());
        for _ in 0..3 {
            assert_eq!(
                parse_hash_output("\\5EB63BBBE01EEED093CB22BB8F5ACDC3  a\\nb.sav").as_deref(),
                Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
            );
        }
        assert_eq!(parse_hash_output("5eb63bbb  short.sav"), None);
    }
}
