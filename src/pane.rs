//! Pane 数据模型 - pane 标识、角色、状态与清理动作

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// tmux pane 标识（形如 `%3`），在 pane 生命周期内保持不变
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaneId(String);

impl PaneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// pane 角色种类（不带数据，用于持久化到 tmux pane 选项和输出）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaneKind {
    Viewer,
    Editor,
    Tunnel,
    Crash,
    Selector,
}

impl std::fmt::Display for PaneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaneKind::Viewer => write!(f, "viewer"),
            PaneKind::Editor => write!(f, "editor"),
            PaneKind::Tunnel => write!(f, "tunnel"),
            PaneKind::Crash => write!(f, "crash"),
            PaneKind::Selector => write!(f, "selector"),
        }
    }
}

impl std::str::FromStr for PaneKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "viewer" => Ok(PaneKind::Viewer),
            "editor" => Ok(PaneKind::Editor),
            "tunnel" => Ok(PaneKind::Tunnel),
            "crash" => Ok(PaneKind::Crash),
            "selector" => Ok(PaneKind::Selector),
            _ => Err(anyhow!("Unknown pane role: {}", s)),
        }
    }
}

/// pane 角色，携带角色相关的监督参数
///
/// 角色在创建 pane 时确定，决定 pane 内运行的监督方式：
/// - `Viewer`：命令输出 tee 到 `log` 并用分页器显示，F2 打开日志搜索
/// - `Editor`：交互式编辑器，创建后获得焦点
/// - `Tunnel`：依赖远端就绪的命令，失败后按 `backoff` 重试
/// - `Crash`：主监督进程，异常退出时由 crash inspector 接管同一 pane
/// - `Selector`：对 `log` 的交互式搜索，结果驱动 `target` pane
#[derive(Debug, Clone, PartialEq)]
pub enum PaneRole {
    Viewer { log: PathBuf },
    Editor,
    Tunnel { target: String, backoff: Duration },
    Crash { log: PathBuf },
    Selector { log: PathBuf, target: PaneId },
}

impl PaneRole {
    pub fn kind(&self) -> PaneKind {
        match self {
            PaneRole::Viewer { .. } => PaneKind::Viewer,
            PaneRole::Editor => PaneKind::Editor,
            PaneRole::Tunnel { .. } => PaneKind::Tunnel,
            PaneRole::Crash { .. } => PaneKind::Crash,
            PaneRole::Selector { .. } => PaneKind::Selector,
        }
    }

    /// tunnel 操作的远端对象名
    pub fn target_ref(&self) -> Option<&str> {
        match self {
            PaneRole::Tunnel { target, .. } => Some(target),
            _ => None,
        }
    }

    /// 新 pane 是否应获得焦点
    pub fn takes_focus(&self) -> bool {
        matches!(self, PaneRole::Editor | PaneRole::Selector { .. } | PaneRole::Crash { .. })
    }
}

/// pane 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaneState {
    Live,
    Destroyed,
}

/// 控制器持有的 pane 记录
#[derive(Debug, Clone)]
pub struct Pane {
    pub id: PaneId,
    pub kind: PaneKind,
    /// 创建时的完整角色；从已有 session 接管的 pane 只知道种类
    pub role: Option<PaneRole>,
    /// pane 内进程（guard）的 PID
    pub pid: Option<u32>,
    pub state: PaneState,
    /// 注册到 guard 的清理命令（只做展示，执行由 pane 内的 guard 负责）
    pub cleanup: Option<String>,
    /// 为该 pane 绑定的按键，关闭时解绑
    pub bound_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Pane {
    pub fn record(&self) -> PaneRecord {
        PaneRecord {
            pane_id: self.id.clone(),
            role: self.kind,
            pid: self.pid,
            target: self.role.as_ref().and_then(PaneRole::target_ref).map(str::to_string),
            cleanup: self.cleanup.clone(),
            state: self.state,
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

/// `pw list` 输出的 pane 记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneRecord {
    pub pane_id: PaneId,
    pub role: PaneKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
    pub state: PaneState,
    pub created_at: String,
}

type CleanupFn = Box<dyn FnOnce() -> Result<()> + Send>;

enum CleanupKind {
    /// 通过 `sh -c` 执行，可以跨进程传递
    Shell(String),
    Callback(CleanupFn),
}

/// 绑定到 pane 的延迟清理动作
///
/// 执行会消耗 `self`，因此同一个动作最多执行一次；动作本身必须能在
/// 目标已不存在时安全执行。
pub struct CleanupAction {
    label: String,
    kind: CleanupKind,
}

impl CleanupAction {
    pub fn shell(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            label: command.clone(),
            kind: CleanupKind::Shell(command),
        }
    }

    pub fn from_fn<F>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            kind: CleanupKind::Callback(Box::new(f)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// shell 形式的命令文本，用于传给 pane 内的 guard
    pub fn shell_command(&self) -> Option<&str> {
        match &self.kind {
            CleanupKind::Shell(cmd) => Some(cmd),
            CleanupKind::Callback(_) => None,
        }
    }

    pub(crate) fn execute(self) -> Result<()> {
        match self.kind {
            CleanupKind::Shell(cmd) => {
                debug!(command = %cmd, "Running cleanup command");
                let status = Command::new("sh").args(["-c", &cmd]).status()?;
                if status.success() {
                    Ok(())
                } else {
                    Err(anyhow!("清理命令退出状态 {}: {}", status, cmd))
                }
            }
            CleanupKind::Callback(f) => f(),
        }
    }
}

impl std::fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupAction").field("label", &self.label).finish()
    }
}
