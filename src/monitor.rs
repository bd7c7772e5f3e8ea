//! 生命周期监视 - 轮询进程状态，在启动/退出的边沿触发同步
//!
//! 状态只在这里维护：Idle -> Active 触发下载，Active -> Idle 触发上传。

use crate::core::{Direction, SyncEngine, SyncReport};
use crate::error::Result;
use crate::process::ProcessProbe;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 执行一轮同步的能力
#[async_trait]
pub trait PassRunner: Send + Sync {
    async fn run_pass(&self, direction: Direction, cancel: &CancellationToken) -> Result<SyncReport>;
}

#[async_trait]
impl PassRunner for SyncEngine {
    async fn run_pass(&self, direction: Direction, cancel: &CancellationToken) -> Result<SyncReport> {
        SyncEngine::run_pass(self, direction, cancel).await
    }
}

/// 被监视进程的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorState {
    #[default]
    Idle,
    Active,
}

/// 监视器配置
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub process_name: String,
    pub poll_interval: Duration,
    /// 连接/列目录失败的一轮在下次轮询时重试
    pub retry_failed_pass: bool,
}

pub struct LifecycleMonitor<P, R> {
    probe: P,
    runner: R,
    config: MonitorConfig,
    state: MonitorState,
    pending_retry: Option<Direction>,
}

impl<P: ProcessProbe, R: PassRunner> LifecycleMonitor<P, R> {
    pub fn new(probe: P, runner: R, config: MonitorConfig) -> Self {
        Self {
            probe,
            runner,
            config,
            state: MonitorState::Idle,
            pending_retry: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// 根据本次轮询结果更新状态，返回边沿对应的同步方向
    pub fn observe(&mut self, running: bool) -> Option<Direction> {
        match (self.state, running) {
            (MonitorState::Idle, true) => {
                self.state = MonitorState::Active;
                Some(Direction::Download)
            }
            (MonitorState::Active, false) => {
                self.state = MonitorState::Idle;
                Some(Direction::Upload)
            }
            _ => None,
        }
    }

    /// 轮询一次，必要时执行一轮同步
    pub async fn tick(&mut self, cancel: &CancellationToken) {
        let running = self.probe.is_running(&self.config.process_name).await;

        let direction = match self.observe(running) {
            Some(direction) => {
                if let Some(stale) = self.pending_retry.take() {
                    debug!("放弃待重试的 {} 同步，新的状态变化优先", stale);
                }
                match direction {
                    Direction::Download => info!("进程已启动，执行下载"),
                    Direction::Upload => info!("进程已退出，执行上传"),
                }
                direction
            }
            None => match self.pending_retry.take() {
                Some(direction) => {
                    info!("重试上次失败的 {} 同步", direction);
                    direction
                }
                None => return,
            },
        };

        match self.runner.run_pass(direction, cancel).await {
            Ok(report) => {
                if report.failed > 0 {
                    warn!("{} 同步有 {} 个文件失败", direction, report.failed);
                }
            }
            Err(e) => {
                error!("{} 同步中止: {}", direction, e);
                if e.aborts_pass() && self.config.retry_failed_pass {
                    self.pending_retry = Some(direction);
                }
            }
        }
    }

    /// 主循环，直到收到取消信号
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "开始监视进程: {} (轮询间隔 {:?})",
            self.config.process_name, self.config.poll_interval
        );

        while !cancel.is_cancelled() {
            self.tick(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        if self.state == MonitorState::Active {
            info!("进程仍在运行，本次退出不执行上传");
        }
        info!("监视已停止");
    }
}
