//! tmux 管理模块 - 封装 tmux 控制协议
//!
//! 所有命令都通过私有 socket (`tmux -S <socket>`) 发送，与用户自己的 tmux
//! server 隔离。

use crate::error::WardenError;
use crate::infra::shell::shell_join;
use crate::pane::{PaneId, PaneKind};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error, info, warn};

/// 存放 pane 角色的 tmux 用户选项
pub const ROLE_OPTION: &str = "@pw_role";

/// 存放 session 属主进程 PID 的 tmux 用户选项
pub const SUPERVISOR_OPTION: &str = "@pw_supervisor";

/// 新建 pane 的参数
#[derive(Debug, Clone)]
pub struct PaneSpec {
    /// 窗口标题
    pub title: String,
    /// 交给 pane shell 执行的命令
    pub command: String,
    /// 附加到命令前的环境变量
    pub env: Vec<(String, String)>,
    /// 创建后是否切换到该 pane
    pub focus: bool,
    pub role: PaneKind,
}

impl PaneSpec {
    /// 实际执行的命令行（环境变量通过 `env` 前缀注入）
    pub fn command_line(&self) -> String {
        if self.env.is_empty() {
            return self.command.clone();
        }
        let mut parts = vec!["env".to_string()];
        parts.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        format!("{} {}", shell_join(&parts), self.command)
    }
}

/// `list-panes` 的一行
#[derive(Debug, Clone, PartialEq)]
pub struct PaneInfo {
    pub id: PaneId,
    pub pid: Option<u32>,
    pub role: Option<PaneKind>,
}

/// 多路复用器能力
///
/// 核心逻辑只依赖这组操作：创建/关闭 pane、注入按键、绑定按键、
/// 等待/触发命名事件。
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// 控制通道是否可达
    fn is_reachable(&self) -> bool;

    /// session 是否已经存在
    fn has_session(&self) -> bool;

    /// 创建 pane（第一个 pane 同时创建 session）
    fn new_pane(&self, spec: &PaneSpec) -> Result<PaneId>;

    fn pane_exists(&self, pane: &PaneId) -> bool;

    /// pane 内进程 PID
    fn pane_pid(&self, pane: &PaneId) -> Result<Option<u32>>;

    fn list_panes(&self) -> Result<Vec<PaneInfo>>;

    fn kill_pane(&self, pane: &PaneId) -> Result<()>;

    /// 向 pane 发送字面文本（不追加 Enter）
    fn send_keys(&self, pane: &PaneId, text: &str) -> Result<()>;

    /// 绑定一个只在 `pane` 激活时生效的按键，其他 pane 中按键原样透传
    fn bind_key(&self, pane: &PaneId, key: &str, tmux_command: &str) -> Result<()>;

    fn unbind_key(&self, key: &str) -> Result<()>;

    /// 设置 session 级用户选项
    fn set_session_option(&self, name: &str, value: &str) -> Result<()>;

    /// 读取 session 级用户选项，未设置时为 None
    fn session_option(&self, name: &str) -> Result<Option<String>>;

    /// 触发命名事件 (`wait-for -S`)
    fn signal(&self, event: &str) -> Result<()>;

    /// 阻塞直到命名事件触发 (`wait-for`)
    async fn wait_for(&self, event: &str) -> Result<()>;

    /// 把当前终端 attach 到 session（阻塞到 detach 或 session 结束）
    fn attach(&self) -> Result<()>;

    /// 销毁整个控制通道
    fn kill_server(&self) -> Result<()>;
}

/// 基于 tmux CLI 的实现
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    bin: String,
    socket: PathBuf,
    session: String,
}

impl TmuxMultiplexer {
    pub fn new(bin: impl Into<String>, socket: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            socket: socket.into(),
            session: session.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// 检查 tmux 是否安装
    pub fn is_available(&self) -> bool {
        which::which(&self.bin).is_ok()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-S").arg(&self.socket);
        cmd
    }

    /// 执行 tmux 子命令并返回 stdout
    fn run(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| WardenError::MultiplexerUnavailable(format!("{}: {}", self.bin, e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(WardenError::Multiplexer {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into())
        }
    }

    fn display(&self, pane: &PaneId, format: &str) -> Result<String> {
        let out = self.run(&["display-message", "-p", "-t", pane.as_str(), format])?;
        Ok(out.trim().to_string())
    }

    /// tmux server 进程 PID
    pub fn server_pid(&self) -> Result<Option<u32>> {
        let out = self.run(&["display-message", "-p", "-t", &self.session, "#{pid}"])?;
        Ok(out.trim().parse().ok())
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    fn is_reachable(&self) -> bool {
        if !self.is_available() {
            return false;
        }
        if let Some(dir) = self.socket.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "Cannot create socket directory");
                return false;
            }
        }
        self.command()
            .arg("start-server")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn has_session(&self) -> bool {
        self.command()
            .args(["has-session", "-t", &self.session])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn new_pane(&self, spec: &PaneSpec) -> Result<PaneId> {
        let command_line = spec.command_line();
        debug!(title = %spec.title, role = %spec.role, "Creating tmux pane");

        let output = if self.has_session() {
            let mut args = vec!["new-window", "-P", "-F", "#{pane_id}", "-t", self.session.as_str(), "-n", spec.title.as_str()];
            if !spec.focus {
                args.push("-d");
            }
            args.push(command_line.as_str());
            self.run(&args)?
        } else {
            self.run(&[
                "new-session", "-d", "-P", "-F", "#{pane_id}",
                "-s", self.session.as_str(),
                "-n", spec.title.as_str(),
                command_line.as_str(),
            ])?
        };

        let pane = PaneId::new(output);
        if pane.as_str().is_empty() {
            error!(title = %spec.title, "tmux returned empty pane id");
            return Err(anyhow!("tmux 未返回 pane id: {}", spec.title));
        }

        let role = spec.role.to_string();
        if let Err(e) = self.run(&["set-option", "-p", "-t", pane.as_str(), ROLE_OPTION, role.as_str()]) {
            warn!(pane = %pane, error = %e, "Failed to tag pane role");
        }

        info!(pane = %pane, role = %spec.role, "Tmux pane created");
        Ok(pane)
    }

    fn pane_exists(&self, pane: &PaneId) -> bool {
        self.display(pane, "#{pane_id}")
            .map(|id| id == pane.as_str())
            .unwrap_or(false)
    }

    fn pane_pid(&self, pane: &PaneId) -> Result<Option<u32>> {
        let pid = self.display(pane, "#{pane_pid}")?;
        Ok(pid.parse().ok())
    }

    fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let format = format!("#{{pane_id}}\t#{{pane_pid}}\t#{{{}}}", ROLE_OPTION);
        let output = match self.run(&["list-panes", "-s", "-t", &self.session, "-F", &format]) {
            Ok(out) => out,
            // session 不存在时没有 pane
            Err(_) => return Ok(Vec::new()),
        };
        Ok(output.lines().filter_map(parse_pane_line).collect())
    }

    fn kill_pane(&self, pane: &PaneId) -> Result<()> {
        debug!(pane = %pane, "Killing tmux pane");
        self.run(&["kill-pane", "-t", pane.as_str()])?;
        info!(pane = %pane, "Tmux pane killed");
        Ok(())
    }

    fn send_keys(&self, pane: &PaneId, text: &str) -> Result<()> {
        debug!(pane = %pane, keys_len = text.len(), "Sending keys to tmux pane");
        // -l 保证文本按字面发送，不会被解释为按键名
        self.run(&["send-keys", "-t", pane.as_str(), "-l", text])?;
        Ok(())
    }

    fn bind_key(&self, pane: &PaneId, key: &str, tmux_command: &str) -> Result<()> {
        let condition = format!("#{{==:#{{pane_id}},{}}}", pane);
        let passthrough = format!("send-keys {}", key);
        info!(pane = %pane, key = %key, "Binding key to pane-scoped command");
        self.run(&["bind-key", "-n", key, "if-shell", "-F", &condition, tmux_command, &passthrough])?;
        Ok(())
    }

    fn unbind_key(&self, key: &str) -> Result<()> {
        debug!(key = %key, "Unbinding key");
        self.run(&["unbind-key", "-n", key])?;
        Ok(())
    }

    fn set_session_option(&self, name: &str, value: &str) -> Result<()> {
        debug!(session = %self.session, option = %name, "Setting session option");
        self.run(&["set-option", "-t", &self.session, name, value])?;
        Ok(())
    }

    fn session_option(&self, name: &str) -> Result<Option<String>> {
        // -q：未设置的用户选项输出为空而不是报错
        let out = self.run(&["show-options", "-v", "-q", "-t", &self.session, name])?;
        let value = out.trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    fn signal(&self, event: &str) -> Result<()> {
        debug!(event = %event, "Signalling tmux event");
        self.run(&["wait-for", "-S", event])?;
        Ok(())
    }

    async fn wait_for(&self, event: &str) -> Result<()> {
        debug!(event = %event, "Waiting for tmux event");
        let status = tokio::process::Command::new(&self.bin)
            .arg("-S")
            .arg(&self.socket)
            .args(["wait-for", event])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // 输掉竞争被 drop 时不留下孤儿 wait-for 进程
            .kill_on_drop(true)
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!("tmux wait-for {} 失败: {}", event, status))
        }
    }

    fn attach(&self) -> Result<()> {
        let status = self
            .command()
            .args(["attach-session", "-t", &self.session])
            // 嵌套在用户自己的 tmux 里时也能 attach
            .env_remove("TMUX")
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!("attach 到 session {} 失败", self.session))
        }
    }

    fn kill_server(&self) -> Result<()> {
        debug!(socket = %self.socket.display(), "Killing tmux server");
        match self.run(&["kill-server"]) {
            Ok(_) => {
                info!(socket = %self.socket.display(), "Tmux server killed");
                Ok(())
            }
            Err(e) => {
                // server 已经退出视为成功
                debug!(error = %e, "kill-server failed, assuming server already gone");
                Ok(())
            }
        }
    }
}

fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let mut fields = line.split('\t');
    let id = fields.next().filter(|s| !s.is_empty())?;
    let pid = fields.next().and_then(|s| s.trim().parse().ok());
    let role = fields.next().and_then(|s| s.trim().parse().ok());
    Some(PaneInfo {
        id: PaneId::new(id),
        pid,
        role,
    })
}
