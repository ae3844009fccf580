//! Crash inspector - 主进程异常退出后接管同一 pane，展示诊断信息
//!
//! 状态机：`Idle -> Attached -> {Acknowledged, TimedOut} -> Closed`。
//! 进入 `Attached` 后从共享日志提取错误块和 Traceback 块，渲染后在确认按键
//! 与超时之间竞争，胜者驱动唯一一次 teardown。

use crate::error::WardenError;
use crate::guard::ExitOutcome;
use crate::infra::tmux::Multiplexer;
use crate::log_record::{BlockSpec, LogBlock, LogRecord};
use crate::pane::PaneId;
use anyhow::Result;
use crossterm::style::{Color, Stylize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ERROR_MARKERS: [&str; 2] = ["ERROR", "CRITICAL"];
pub const TRACE_MARKER: &str = "Traceback";
pub const ERROR_CONTEXT_BEFORE: usize = 1;
pub const ERROR_CONTEXT_AFTER: usize = 5;
pub const TRACE_CONTEXT_AFTER: usize = 20;
pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const ACK_KEY: &str = "q";

/// crash inspector 参数
#[derive(Debug, Clone, PartialEq)]
pub struct CrashConfig {
    pub error_markers: Vec<String>,
    pub trace_markers: Vec<String>,
    pub error_before: usize,
    pub error_after: usize,
    pub trace_after: usize,
    pub ack_timeout: Duration,
    /// 确认并关闭 pane 的按键（tmux 按键名）
    pub ack_key: String,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            error_markers: ERROR_MARKERS.iter().map(|m| m.to_string()).collect(),
            trace_markers: vec![TRACE_MARKER.to_string()],
            error_before: ERROR_CONTEXT_BEFORE,
            error_after: ERROR_CONTEXT_AFTER,
            trace_after: TRACE_CONTEXT_AFTER,
            ack_timeout: ACK_TIMEOUT,
            ack_key: ACK_KEY.to_string(),
        }
    }
}

impl CrashConfig {
    fn block_specs(&self) -> [BlockSpec; 2] {
        [
            BlockSpec::new(self.error_markers.clone(), self.error_before, self.error_after),
            BlockSpec::new(self.trace_markers.clone(), 0, self.trace_after),
        ]
    }
}

/// inspector 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashState {
    Idle,
    Attached,
    Acknowledged,
    TimedOut,
    Closed,
}

impl CrashState {
    pub fn can_transition_to(self, next: CrashState) -> bool {
        use CrashState::*;
        matches!(
            (self, next),
            (Idle, Attached) | (Attached, Acknowledged) | (Attached, TimedOut) | (Acknowledged, Closed) | (TimedOut, Closed)
        )
    }
}

impl std::fmt::Display for CrashState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CrashState::Idle => "idle",
            CrashState::Attached => "attached",
            CrashState::Acknowledged => "acknowledged",
            CrashState::TimedOut => "timed_out",
            CrashState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// 从日志提取出的崩溃证据
#[derive(Debug, Clone, PartialEq)]
pub struct CrashReport {
    pub log: PathBuf,
    pub exit: ExitOutcome,
    pub error_block: Option<LogBlock>,
    pub trace_block: Option<LogBlock>,
}

impl CrashReport {
    /// 单次扫描日志；日志缺失时报告不含任何块
    pub fn collect(log: &Path, exit: ExitOutcome, config: &CrashConfig) -> Result<Self> {
        let record = LogRecord::new(log);
        let (error_block, trace_block) = if record.exists() {
            let mut blocks = record.scan(&config.block_specs())?.into_iter();
            (blocks.next().flatten(), blocks.next().flatten())
        } else {
            warn!(log = %log.display(), "Crash log missing, no diagnostics to show");
            (None, None)
        };

        debug!(
            error_line = ?error_block.as_ref().map(|b| b.matched_line),
            trace_line = ?trace_block.as_ref().map(|b| b.matched_line),
            "Crash evidence collected"
        );

        Ok(Self {
            log: log.to_path_buf(),
            exit,
            error_block,
            trace_block,
        })
    }

    pub fn has_evidence(&self) -> bool {
        self.error_block.is_some() || self.trace_block.is_some()
    }

    /// 渲染报告正文（不含按键提示）
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{}  ({})\n",
            "主进程异常退出".with(Color::Red).bold(),
            self.exit
        ));
        out.push_str(&format!("日志: {}\n", self.log.display()));

        if let Some(block) = &self.error_block {
            out.push('\n');
            out.push_str(&format!("{}\n", "最近的错误:".with(Color::Yellow).bold()));
            push_block(&mut out, block);
        }
        if let Some(block) = &self.trace_block {
            out.push('\n');
            out.push_str(&format!("{}\n", "最近的 Traceback:".with(Color::Yellow).bold()));
            push_block(&mut out, block);
        }
        if !self.has_evidence() {
            out.push_str("\n日志中没有找到错误记录。\n");
        }
        out
    }
}

/// inspector 接管 pane 时显示的按键提示
fn ack_help(config: &CrashConfig) -> String {
    format!(
        "\n按 {} 关闭此窗口，{} 秒后自动关闭。完整日志见上方路径。\n",
        config.ack_key.as_str().with(Color::Cyan).bold(),
        config.ack_timeout.as_secs()
    )
}

fn push_block(out: &mut String, block: &LogBlock) {
    let width = block
        .lines
        .last()
        .map(|l| l.number.to_string().len())
        .unwrap_or(1);
    for line in &block.lines {
        out.push_str(&format!("{:>width$} | {}\n", line.number, line.text, width = width));
    }
}

/// Crash inspector
pub struct CrashInspector<'a, M: Multiplexer> {
    mux: &'a M,
    pane: PaneId,
    config: CrashConfig,
    state: CrashState,
}

impl<'a, M: Multiplexer> CrashInspector<'a, M> {
    pub fn new(mux: &'a M, pane: PaneId, config: CrashConfig) -> Self {
        Self {
            mux,
            pane,
            config,
            state: CrashState::Idle,
        }
    }

    pub fn state(&self) -> CrashState {
        self.state
    }

    /// 确认按键触发的 tmux 事件名，每个 pane 唯一
    pub fn ack_event(&self) -> String {
        format!("pw-crash-ack-{}", self.pane.as_str().trim_start_matches('%'))
    }

    fn transition(&mut self, next: CrashState) -> Result<(), WardenError> {
        if !self.state.can_transition_to(next) {
            return Err(WardenError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(pane = %self.pane, from = %self.state, to = %next, "Crash inspector transition");
        self.state = next;
        Ok(())
    }

    /// 展示报告并等待确认或超时，最后关闭 pane；返回决胜的状态
    pub async fn run<W: Write>(&mut self, report: &CrashReport, out: &mut W) -> Result<CrashState> {
        self.transition(CrashState::Attached)?;
        info!(pane = %self.pane, exit = %report.exit, evidence = report.has_evidence(), "Crash inspector attached");

        let screen = format!("{}{}", report.render(), ack_help(&self.config));
        if let Err(e) = out.write_all(screen.as_bytes()).and_then(|_| out.flush()) {
            warn!(pane = %self.pane, error = %e, "Failed to render crash report");
        }

        let event = self.ack_event();
        let ack_bound = match self
            .mux
            .bind_key(&self.pane, &self.config.ack_key, &format!("wait-for -S {}", event))
        {
            Ok(()) => true,
            Err(e) => {
                warn!(pane = %self.pane, error = %e, "Cannot bind ack key, waiting for timeout only");
                false
            }
        };

        let mux = self.mux;
        let acknowledged = async {
            if !ack_bound {
                return std::future::pending().await;
            }
            if let Err(e) = mux.wait_for(&event).await {
                warn!(event = %event, error = %e, "Waiting for ack failed, falling back to timeout");
                std::future::pending::<()>().await;
            }
        };

        let winner = tokio::select! {
            _ = acknowledged => CrashState::Acknowledged,
            _ = tokio::time::sleep(self.config.ack_timeout) => CrashState::TimedOut,
        };
        info!(pane = %self.pane, winner = %winner, "Crash inspector race decided");
        self.transition(winner)?;

        if ack_bound {
            if let Err(e) = self.mux.unbind_key(&self.config.ack_key) {
                debug!(error = %e, "Unbinding ack key failed");
            }
        }
        self.teardown()?;
        Ok(winner)
    }

    /// 关闭 pane，重复调用是空操作
    pub fn teardown(&mut self) -> Result<()> {
        if self.state == CrashState::Closed {
            debug!(pane = %self.pane, "Crash pane already closed");
            return Ok(());
        }
        self.transition(CrashState::Closed)?;
        // 关闭自身所在的 pane，之后进程会收到 SIGHUP
        if let Err(e) = self.mux.kill_pane(&self.pane) {
            warn!(pane = %self.pane, error = %e, "Crash pane already gone");
        }
        Ok(())
    }
}
