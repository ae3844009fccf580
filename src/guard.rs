//! 进程守护模块 - 把外部命令绑定到 pane，保证清理动作在任何退出路径上执行一次
//!
//! 流程：获取远端状态 → 启动子进程 → 任意方式退出（成功、非零、信号、外部终止）
//! → 执行清理 → 传播原始退出状态。清理失败只记录日志，不向上升级。

use crate::infra::process::{LivenessProbe, ProcessManager};
use crate::infra::shell::shell_join;
use crate::pane::{CleanupAction, PaneId};
use anyhow::{anyhow, Context, Result};
use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// 就绪重试的默认间隔
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// 默认不限制尝试次数，只以监督进程存活为界
pub const DEFAULT_MAX_ATTEMPTS: Option<u32> = None;

/// 外部终止后等待子进程退出的时间，超时则 SIGKILL
pub const CHILD_STOP_GRACE: Duration = Duration::from_secs(3);

/// 被外部终止时报告的退出码（128 + SIGTERM）
pub const TERMINATED_EXIT_CODE: i32 = 143;

/// 就绪重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RETRY_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// 被监督的外部命令
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 从 argv 构建，第一个元素是程序
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
        let (program, rest) = argv.split_first().ok_or_else(|| anyhow!("缺少要执行的命令"))?;
        Ok(Self::new(
            program.as_ref(),
            rest.iter().map(|a| a.as_ref().to_string()).collect(),
        ))
    }

    /// 通过 `sh -c` 执行的命令
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new("sh", vec!["-c".to_string(), command.into()])
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args.iter().cloned());
        argv
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .with_context(|| format!("无法启动命令: {}", self))
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&shell_join(&self.argv()))
    }
}

/// 子进程的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// 正常退出，携带退出码
    Exited(i32),
    /// 被信号杀死
    Signaled(i32),
    /// guard 收到外部终止请求后停止了子进程
    Terminated,
}

impl ExitOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitOutcome::Exited(code),
            (None, Some(sig)) => ExitOutcome::Signaled(sig),
            (None, None) => ExitOutcome::Exited(1),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }

    /// 非零退出或被信号杀死；外部终止是正常关闭 pane，不算崩溃
    pub fn is_abnormal(&self) -> bool {
        matches!(self, ExitOutcome::Exited(code) if *code != 0) || matches!(self, ExitOutcome::Signaled(_))
    }

    /// 传播给 pane 的进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::Signaled(sig) => 128 + sig,
            ExitOutcome::Terminated => TERMINATED_EXIT_CODE,
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit {}", code),
            ExitOutcome::Signaled(sig) => write!(f, "signal {}", sig),
            ExitOutcome::Terminated => write!(f, "terminated"),
        }
    }
}

/// 就绪重试循环的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// 某次尝试成功结束
    Completed { attempts: u32, outcome: ExitOutcome },
    /// 监督进程已退出，循环放弃
    SupervisorGone { attempts: u32 },
    /// 达到最大尝试次数
    Exhausted { attempts: u32, last: ExitOutcome },
    /// 收到外部终止请求
    Terminated { attempts: u32 },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Completed { attempts, .. }
            | RetryOutcome::SupervisorGone { attempts }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Terminated { attempts } => *attempts,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RetryOutcome::Completed { outcome, .. } => outcome.exit_code(),
            RetryOutcome::SupervisorGone { .. } => 0,
            RetryOutcome::Exhausted { last, .. } => last.exit_code(),
            RetryOutcome::Terminated { .. } => TERMINATED_EXIT_CODE,
        }
    }
}

/// 作用域清理守卫：`release` 或 drop 时执行清理，最多一次
pub struct CleanupGuard {
    pane: PaneId,
    action: Option<CleanupAction>,
}

impl CleanupGuard {
    pub fn new(pane: PaneId, action: Option<CleanupAction>) -> Self {
        Self { pane, action }
    }

    /// 是否仍持有未执行的清理动作
    pub fn is_armed(&self) -> bool {
        self.action.is_some()
    }

    /// 执行清理；失败只记录日志
    pub fn release(&mut self) {
        let Some(action) = self.action.take() else {
            return;
        };
        let label = action.label().to_string();
        debug!(pane = %self.pane, cleanup = %label, "Releasing pane cleanup");
        match action.execute() {
            Ok(()) => info!(pane = %self.pane, cleanup = %label, "Pane cleanup finished"),
            Err(e) => warn!(pane = %self.pane, cleanup = %label, error = %e, "Pane cleanup failed, ignoring"),
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// 进程守护
pub struct ProcessGuard {
    pane: PaneId,
}

impl ProcessGuard {
    pub fn new(pane: PaneId) -> Self {
        Self { pane }
    }

    pub fn pane(&self) -> &PaneId {
        &self.pane
    }

    /// 运行命令直到退出或 pane 被外部关闭（SIGHUP/SIGTERM）
    pub async fn run(&self, command: &CommandSpec, cleanup: Option<CleanupAction>) -> Result<ExitOutcome> {
        self.run_until(command, cleanup, termination_signal()).await
    }

    /// 运行命令直到退出或 `cancel` 完成
    pub async fn run_until<F>(&self, command: &CommandSpec, cleanup: Option<CleanupAction>, cancel: F) -> Result<ExitOutcome>
    where
        F: Future<Output = ()>,
    {
        // 守卫先于 spawn 创建：spawn 失败时 drop 同样会清理
        let mut guard = CleanupGuard::new(self.pane.clone(), cleanup);
        let mut child = command.spawn()?;
        info!(pane = %self.pane, pid = ?child.id(), command = %command, "Supervised process started");

        tokio::pin!(cancel);
        let outcome = tokio::select! {
            status = child.wait() => ExitOutcome::from_status(status?),
            _ = &mut cancel => {
                warn!(pane = %self.pane, "Termination requested, stopping supervised process");
                stop_child(&mut child).await;
                ExitOutcome::Terminated
            }
        };

        info!(pane = %self.pane, outcome = %outcome, "Supervised process ended");
        guard.release();
        Ok(outcome)
    }

    /// 就绪重试：失败后等待 `policy.backoff` 再试，每次尝试前检查监督进程存活
    pub async fn run_with_readiness_retry(
        &self,
        command: &CommandSpec,
        cleanup: Option<CleanupAction>,
        policy: &RetryPolicy,
        probe: &mut dyn LivenessProbe,
    ) -> Result<RetryOutcome> {
        self.run_with_readiness_retry_until(command, cleanup, policy, probe, termination_signal())
            .await
    }

    pub async fn run_with_readiness_retry_until<F>(
        &self,
        command: &CommandSpec,
        cleanup: Option<CleanupAction>,
        policy: &RetryPolicy,
        probe: &mut dyn LivenessProbe,
        cancel: F,
    ) -> Result<RetryOutcome>
    where
        F: Future<Output = ()>,
    {
        let mut guard = CleanupGuard::new(self.pane.clone(), cleanup);
        let mut attempts: u32 = 0;
        tokio::pin!(cancel);

        let result = loop {
            if !probe.is_alive() {
                info!(pane = %self.pane, attempts, "Supervising process gone, abandoning readiness retry");
                break RetryOutcome::SupervisorGone { attempts };
            }

            let mut child = command.spawn()?;
            attempts += 1;
            debug!(pane = %self.pane, attempt = attempts, pid = ?child.id(), "Readiness attempt started");

            let outcome = tokio::select! {
                status = child.wait() => ExitOutcome::from_status(status?),
                _ = &mut cancel => {
                    stop_child(&mut child).await;
                    break RetryOutcome::Terminated { attempts };
                }
            };

            if outcome.success() {
                break RetryOutcome::Completed { attempts, outcome };
            }
            if let Some(max) = policy.max_attempts {
                if attempts >= max {
                    warn!(pane = %self.pane, attempts, "Readiness retry exhausted");
                    break RetryOutcome::Exhausted { attempts, last: outcome };
                }
            }

            warn!(
                pane = %self.pane,
                attempt = attempts,
                outcome = %outcome,
                backoff_ms = policy.backoff.as_millis() as u64,
                "Target not ready, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(policy.backoff) => {}
                _ = &mut cancel => break RetryOutcome::Terminated { attempts },
            }
        };

        guard.release();
        Ok(result)
    }
}

/// 先 SIGTERM，宽限期后 SIGKILL
async fn stop_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = ProcessManager::new().terminate(pid) {
            debug!(pid, error = %e, "SIGTERM delivery failed");
        }
        if tokio::time::timeout(CHILD_STOP_GRACE, child.wait()).await.is_ok() {
            return;
        }
        warn!(pid, "Child ignored SIGTERM, killing");
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// pane 被关闭或被终止时完成（SIGHUP / SIGTERM）
///
/// SIGINT 会同时送达前台进程组里的子进程，由子进程自己决定是否退出，
/// guard 只吞掉它以免在清理前被杀死。
pub async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let streams = (
        signal(SignalKind::hangup()),
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    );
    let (mut hup, mut term, mut int) = match streams {
        (Ok(hup), Ok(term), Ok(int)) => (hup, term, int),
        _ => {
            warn!("Cannot listen for termination signals, guard relies on child exit only");
            return std::future::pending().await;
        }
    };

    loop {
        tokio::select! {
            _ = hup.recv() => {
                info!("SIGHUP received");
                return;
            }
            _ = term.recv() => {
                info!("SIGTERM received");
                return;
            }
            _ = int.recv() => debug!("SIGINT left to the child process"),
        }
    }
}
