// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use anyhow::Context;
use savesync_lib::config::CONFIG_FILE_NAME;
use savesync_lib::{bootstrap, build_monitor, dirs};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// 等待 Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("无法监听 Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let exe_dir = dirs::exe_dir();
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| exe_dir.join(CONFIG_FILE_NAME));

    // guard 必须存活到进程结束，否则缓冲的日志会丢失
    let (_log_guard, loaded) = bootstrap(&exe_dir, &config_path);
    let config = loaded.with_context(|| format!("加载配置失败: {}", config_path.display()))?;

    let mut monitor = build_monitor(&config);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("收到关闭信号，正在停止...");
        shutdown.cancel();
    });

    monitor.run(cancel).await;
    Ok(())
}
