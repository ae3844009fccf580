//! pane 内的监督命令：`pw guard`、`pw retry`、`pw crash`
//!
//! 这些命令由 SessionController 组装后在 pane 中执行，不直接面向用户。

use crate::config::WardenConfig;
use crate::crash::{CrashInspector, CrashReport};
use crate::guard::{CommandSpec, ExitOutcome, ProcessGuard, RetryOutcome, RetryPolicy};
use crate::infra::process::ProcessLiveness;
use crate::infra::tmux::TmuxMultiplexer;
use crate::pane::{CleanupAction, PaneId};
use anyhow::Result;
use clap::Args;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Guard 命令参数
#[derive(Args, Debug)]
pub struct GuardArgs {
    /// 退出时执行的清理命令（sh -c）
    #[arg(long)]
    pub cleanup: Option<String>,

    /// 主进程日志；异常退出时在当前 pane 打开 crash inspector
    #[arg(long)]
    pub crash_log: Option<PathBuf>,

    /// 被监督的命令
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Retry 命令参数
#[derive(Args, Debug)]
pub struct RetryArgs {
    /// 监督进程 PID，进程退出后停止重试（默认为父进程）
    #[arg(long)]
    pub supervisor_pid: Option<u32>,

    /// 两次尝试之间的间隔（毫秒）
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// 最大尝试次数（默认不限制）
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// 退出时执行的清理命令（sh -c）
    #[arg(long)]
    pub cleanup: Option<String>,

    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Crash 命令参数
#[derive(Args, Debug)]
pub struct CrashArgs {
    /// 要检查的日志（默认 PW_LOG_FILE）
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// 主进程的退出码
    #[arg(long, default_value = "1")]
    pub exit_code: i32,
}

fn current_pane(config: &WardenConfig) -> PaneId {
    config
        .current_pane
        .clone()
        .unwrap_or_else(|| PaneId::new(format!("pid-{}", std::process::id())))
}

/// 处理 guard 命令，返回要传播的退出码
pub async fn handle_guard(args: GuardArgs, config: &WardenConfig) -> Result<i32> {
    let command = CommandSpec::from_argv(&args.command)?;
    let pane = current_pane(config);
    let cleanup = args.cleanup.map(CleanupAction::shell);

    let outcome = ProcessGuard::new(pane).run(&command, cleanup).await?;

    if let Some(log) = args.crash_log {
        if outcome.is_abnormal() {
            inspect_crash(config, &log, outcome).await?;
        }
    }
    Ok(outcome.exit_code())
}

/// 处理 retry 命令
pub async fn handle_retry(args: RetryArgs, config: &WardenConfig) -> Result<i32> {
    let command = CommandSpec::from_argv(&args.command)?;
    let pane = current_pane(config);
    let policy = RetryPolicy {
        backoff: args
            .backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(config.retry.backoff),
        max_attempts: args.max_attempts.or(config.retry.max_attempts),
    };
    let supervisor = args
        .supervisor_pid
        .unwrap_or_else(std::os::unix::process::parent_id);
    let mut probe = ProcessLiveness::new(supervisor);

    info!(pane = %pane, supervisor, backoff_ms = policy.backoff.as_millis() as u64, "Starting readiness retry");
    let outcome = ProcessGuard::new(pane)
        .run_with_readiness_retry(&command, args.cleanup.map(CleanupAction::shell), &policy, &mut probe)
        .await?;

    match &outcome {
        RetryOutcome::Exhausted { attempts, .. } => eprintln!("重试 {} 次后仍未就绪: {}", attempts, command),
        RetryOutcome::SupervisorGone { attempts } => info!(attempts, "Supervisor exited, retry abandoned"),
        _ => {}
    }
    Ok(outcome.exit_code())
}

/// 处理 crash 命令
pub async fn handle_crash(args: CrashArgs, config: &WardenConfig) -> Result<i32> {
    let log = args.log.unwrap_or_else(|| config.log_file.clone());
    let outcome = ExitOutcome::Exited(args.exit_code);
    inspect_crash(config, &log, outcome).await?;
    Ok(outcome.exit_code())
}

/// 在当前 pane 运行 crash inspector；不在 tmux 内时只打印报告
async fn inspect_crash(config: &WardenConfig, log: &Path, outcome: ExitOutcome) -> Result<()> {
    let report = CrashReport::collect(log, outcome, &config.crash)?;

    let Some(pane) = config.current_pane.clone() else {
        warn!("Not inside a pane, printing crash report only");
        let mut stderr = std::io::stderr();
        stderr.write_all(report.render().as_bytes())?;
        return Ok(());
    };

    let mux = TmuxMultiplexer::new(&config.tmux_bin, &config.socket, &config.session_name);
    let mut inspector = CrashInspector::new(&mux, pane, config.crash.clone());
    let mut stdout = std::io::stdout();
    inspector.run(&report, &mut stdout).await?;
    Ok(())
}
