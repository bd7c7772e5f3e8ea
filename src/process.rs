//! 进程检测 - 判断被监视的程序是否在运行

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// 进程存在性检测
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    async fn is_running(&self, name: &str) -> bool;
}

/// Windows: 子进程不创建控制台窗口
#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// 使用系统命令检测进程（Windows: tasklist，其他: pgrep）
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessProbe;

/// 构造检测命令
fn probe_command(name: &str) -> Command {
    #[cfg(target_os = "windows")]
    {
        let filter = format!("IMAGENAME eq {}", image_name(name));
        let mut command = Command::new("tasklist");
        command
            .args(["/FI", filter.as_str(), "/NH"])
            .creation_flags(CREATE_NO_WINDOW);
        command
    }

    #[cfg(not(target_os = "windows"))]
    {
        // 进程名（comm）最长 15 个字符，更长的名称改为匹配完整命令行
        let mode = if name.len() > 15 { "-f" } else { "-x" };
        let mut command = Command::new("pgrep");
        command.args([mode, "--", name]);
        command
    }
}

#[async_trait]
impl ProcessProbe for SystemProcessProbe {
    async fn is_running(&self, name: &str) -> bool {
        let output = match probe_command(name).output().await {
            Ok(output) => output,
            Err(e) => {
                debug!("执行进程检测命令失败: {}", e);
                return false;
            }
        };

        #[cfg(target_os = "windows")]
        {
            tasklist_contains(&String::from_utf8_lossy(&output.stdout), &image_name(name))
        }

        #[cfg(not(target_os = "windows"))]
        {
            output.status.success()
        }
    }
}

/// 补全 Windows 映像名的 .exe 后缀
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn image_name(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".exe") {
        name.to_string()
    } else {
        format!("{}.exe", name)
    }
}

/// tasklist 没有匹配时输出提示信息而不是空结果
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn tasklist_contains(output: &str, image: &str) -> bool {
    let image = image.to_ascii_lowercase();
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|first| first.to_ascii_lowercase() == image)
}
