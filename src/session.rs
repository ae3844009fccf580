//! Session 控制器 - pane 的创建、关闭、按键注入与整体 teardown
//!
//! 控制器只负责按角色组装 pane 内的监督命令（`pw guard` / `pw retry` /
//! `pw search`），重试和崩溃处理都由 pane 内的进程完成。

use crate::config::WardenConfig;
use crate::error::WardenError;
use crate::infra::process::{LivenessProbe, ProcessLiveness, ProcessManager};
use crate::infra::shell::{shell_join, shell_quote};
use crate::infra::tmux::{Multiplexer, PaneInfo, PaneSpec, TmuxMultiplexer, SUPERVISOR_OPTION};
use crate::pane::{CleanupAction, Pane, PaneId, PaneKind, PaneRecord, PaneRole, PaneState};
use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 关闭 pane 时等待 guard 完成清理的时间
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// viewer pane 中打开日志搜索的按键
pub const SEARCH_KEY: &str = "F2";

/// Session 控制器
pub struct SessionController<M: Multiplexer> {
    config: WardenConfig,
    mux: M,
    panes: Vec<Pane>,
    close_grace: Duration,
    torn_down: bool,
}

impl SessionController<TmuxMultiplexer> {
    /// 接管已经在运行的 session（在 pane 内调用 `pw open`/`pw close` 时使用）
    ///
    /// tunnel 的重试循环以 session 属主为监督进程，而不是这个短命的 CLI 进程。
    pub fn adopt(mut config: WardenConfig) -> Result<Self> {
        let mux = TmuxMultiplexer::new(&config.tmux_bin, &config.socket, &config.session_name);
        if !mux.has_session() {
            return Err(WardenError::MultiplexerUnavailable(format!(
                "session {} 不存在 (socket {})",
                config.session_name,
                config.socket.display()
            ))
            .into());
        }

        match session_supervisor(&mux) {
            Some(pid) => config.supervisor_pid = pid,
            None => warn!(session = %config.session_name, "Session has no supervisor, keeping own pid"),
        }

        let panes = mux
            .list_panes()?
            .into_iter()
            .filter_map(adopted_pane)
            .collect::<Vec<_>>();

        info!(
            session = %config.session_name,
            panes = panes.len(),
            supervisor = config.supervisor_pid,
            "Adopted running session"
        );
        let mut controller = Self::new(config, mux);
        controller.panes = panes;
        Ok(controller)
    }
}

/// session 属主 PID：优先 `@pw_supervisor`，没有记录时退回 tmux server
fn session_supervisor(mux: &TmuxMultiplexer) -> Option<u32> {
    match mux.session_option(SUPERVISOR_OPTION) {
        Ok(Some(value)) => match value.parse() {
            Ok(pid) => return Some(pid),
            Err(_) => warn!(value = %value, "Malformed {} option", SUPERVISOR_OPTION),
        },
        Ok(None) => debug!("{} not set", SUPERVISOR_OPTION),
        Err(e) => warn!(error = %e, "Cannot read {} option", SUPERVISOR_OPTION),
    }
    mux.server_pid().ok().flatten()
}

/// 由 `list-panes` 的一行重建 pane；没有角色标记的 pane 不归我们管
fn adopted_pane(info: PaneInfo) -> Option<Pane> {
    let Some(kind) = info.role else {
        debug!(pane = %info.id, "Skipping untagged pane");
        return None;
    };
    Some(Pane {
        id: info.id,
        kind,
        role: None,
        pid: info.pid,
        state: PaneState::Live,
        cleanup: None,
        bound_keys: Vec::new(),
        created_at: Utc::now(),
    })
}

impl<M: Multiplexer> SessionController<M> {
    pub fn new(config: WardenConfig, mux: M) -> Self {
        Self {
            config,
            mux,
            panes: Vec::new(),
            close_grace: CLOSE_GRACE,
            torn_down: false,
        }
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn mux(&self) -> &M {
        &self.mux
    }

    pub fn panes(&self) -> &[Pane] {
        &self.panes
    }

    pub fn pane(&self, id: &PaneId) -> Option<&Pane> {
        self.panes.iter().find(|p| &p.id == id)
    }

    pub fn records(&self) -> Vec<PaneRecord> {
        self.panes.iter().map(Pane::record).collect()
    }

    pub fn live_panes(&self) -> impl Iterator<Item = &Pane> {
        self.panes.iter().filter(|p| p.state == PaneState::Live)
    }

    /// 创建 pane；`command` 是 pane 内被监督的命令（selector 角色忽略）
    pub fn new_pane(&mut self, role: PaneRole, command: &[String], cleanup: Option<CleanupAction>) -> Result<PaneId> {
        if !self.mux.is_reachable() {
            return Err(WardenError::MultiplexerUnavailable(self.config.socket.display().to_string()).into());
        }

        let cleanup_cmd = match &cleanup {
            Some(action) => Some(
                action
                    .shell_command()
                    .ok_or_else(|| WardenError::Usage(format!("清理动作必须是 shell 命令: {}", action.label())))?
                    .to_string(),
            ),
            None => None,
        };

        let spec = self.pane_spec(&role, command, cleanup_cmd.as_deref())?;
        let creates_session = !self.mux.has_session();
        let id = self.mux.new_pane(&spec)?;
        if creates_session {
            self.record_supervisor();
        }
        let pid = match self.mux.pane_pid(&id) {
            Ok(pid) => pid,
            Err(e) => {
                warn!(pane = %id, error = %e, "Cannot read pane pid");
                None
            }
        };

        let mut pane = Pane {
            id: id.clone(),
            kind: role.kind(),
            role: Some(role.clone()),
            pid,
            state: PaneState::Live,
            cleanup: cleanup_cmd,
            bound_keys: Vec::new(),
            created_at: Utc::now(),
        };

        if let PaneRole::Viewer { log } = &role {
            match self.bind_search_key(&id, log) {
                Ok(()) => {
                    // 按键是全局的，最新的 viewer 接管 F2
                    for other in self.panes.iter_mut() {
                        other.bound_keys.retain(|k| k != SEARCH_KEY);
                    }
                    pane.bound_keys.push(SEARCH_KEY.to_string());
                }
                Err(e) => warn!(pane = %id, error = %e, "Failed to bind search key"),
            }
        }

        info!(pane = %id, role = %pane.kind, pid = ?pid, "Pane created");
        self.panes.push(pane);
        Ok(id)
    }

    /// 把自己登记为 session 属主，之后接管 session 的进程据此监督 tunnel
    fn record_supervisor(&self) {
        let pid = self.config.supervisor_pid.to_string();
        match self.mux.set_session_option(SUPERVISOR_OPTION, &pid) {
            Ok(()) => debug!(supervisor = %pid, "Recorded session supervisor"),
            Err(e) => warn!(error = %e, "Failed to record session supervisor"),
        }
    }

    /// 为 role 组装 pane 内执行的命令
    pub fn compose_command(&self, role: &PaneRole, command: &[String], cleanup: Option<&str>) -> Result<String> {
        if command.is_empty() && !matches!(role, PaneRole::Selector { .. }) {
            return Err(WardenError::Usage(format!("{} pane 缺少要执行的命令", role.kind())).into());
        }

        let pw = shell_quote(&self.config.self_bin.to_string_lossy());
        let user_cmd = shell_join(command);
        let cleanup_args = |cleanup: Option<&str>| match cleanup {
            Some(c) => format!(" --cleanup {}", shell_quote(c)),
            None => String::new(),
        };

        let line = match role {
            PaneRole::Viewer { log } => {
                let log = shell_quote(&log.to_string_lossy());
                let pipeline = format!("{} | tee {} | {} -R -N", user_cmd, log, self.config.pager);
                let remove_log = format!("rm -f {}", log);
                let cleanup = match cleanup {
                    Some(c) => format!("{}; {}", c, remove_log),
                    None => remove_log,
                };
                format!(
                    "{} guard{} -- sh -c {}",
                    pw,
                    cleanup_args(Some(&cleanup)),
                    shell_quote(&pipeline)
                )
            }
            PaneRole::Editor => format!("{} guard{} -- {}", pw, cleanup_args(cleanup), user_cmd),
            PaneRole::Tunnel { backoff, .. } => format!(
                "{} retry --supervisor-pid {} --backoff-ms {}{} -- {}",
                pw,
                self.config.supervisor_pid,
                backoff.as_millis(),
                cleanup_args(cleanup),
                user_cmd
            ),
            PaneRole::Crash { log } => format!(
                "{} guard --crash-log {}{} -- {}",
                pw,
                shell_quote(&log.to_string_lossy()),
                cleanup_args(cleanup),
                user_cmd
            ),
            PaneRole::Selector { log, target } => format!(
                "{} search {} {}",
                pw,
                shell_quote(&log.to_string_lossy()),
                shell_quote(target.as_str())
            ),
        };
        Ok(line)
    }

    fn pane_spec(&self, role: &PaneRole, command: &[String], cleanup: Option<&str>) -> Result<PaneSpec> {
        let title = match role.target_ref() {
            Some(target) => format!("{}:{}", role.kind(), target),
            None => role.kind().to_string(),
        };
        Ok(PaneSpec {
            title,
            command: self.compose_command(role, command, cleanup)?,
            env: self.config.pane_env(),
            focus: role.takes_focus(),
            role: role.kind(),
        })
    }

    /// F2：在新窗口中打开对 `log` 的搜索，结果驱动 viewer pane
    fn bind_search_key(&self, viewer: &PaneId, log: &Path) -> Result<()> {
        let selector = PaneRole::Selector {
            log: log.to_path_buf(),
            target: viewer.clone(),
        };
        let spec = self.pane_spec(&selector, &[], None)?;
        let tmux_command = format!("new-window -n {} {}", PaneKind::Selector, shell_quote(&spec.command_line()));
        self.mux.bind_key(viewer, SEARCH_KEY, &tmux_command)
    }

    /// 向 pane 注入字面文本
    pub fn inject_keys(&self, id: &PaneId, text: &str) -> Result<()> {
        if let Some(pane) = self.pane(id) {
            if pane.state == PaneState::Destroyed {
                return Err(WardenError::PaneNotFound(id.to_string()).into());
            }
        }
        if !self.mux.pane_exists(id) {
            return Err(WardenError::PaneNotFound(id.to_string()).into());
        }
        self.mux.send_keys(id, text)
    }

    /// 关闭 pane：先 SIGTERM 让 guard 清理，宽限期后强制 kill-pane
    ///
    /// 强制关闭后仍等待 guard 进程退出，清理结束之前 pane 不会进入 Destroyed。
    /// 已关闭或未知的 pane 是空操作。
    pub fn close_pane(&mut self, id: &PaneId) -> Result<()> {
        let Some(idx) = self.panes.iter().position(|p| &p.id == id) else {
            debug!(pane = %id, "Unknown pane, nothing to close");
            return Ok(());
        };
        if self.panes[idx].state == PaneState::Destroyed {
            debug!(pane = %id, "Pane already destroyed");
            return Ok(());
        }

        if self.mux.pane_exists(id) {
            let pid = self.panes[idx]
                .pid
                .or_else(|| self.mux.pane_pid(id).ok().flatten());
            let exited = match pid {
                Some(pid) => self.terminate_and_wait(id, pid),
                None => false,
            };
            if !exited {
                if let Err(e) = self.mux.kill_pane(id) {
                    // 等待期间 pane 自己退出了
                    debug!(pane = %id, error = %e, "kill-pane failed");
                }
                if let Some(pid) = pid {
                    self.wait_guard_exit(id, pid);
                }
            }
        } else {
            debug!(pane = %id, "Pane already gone from multiplexer");
        }

        let keys = std::mem::take(&mut self.panes[idx].bound_keys);
        for key in keys {
            if let Err(e) = self.mux.unbind_key(&key) {
                warn!(pane = %id, key = %key, error = %e, "Failed to unbind key");
            }
        }
        self.panes[idx].state = PaneState::Destroyed;
        info!(pane = %id, "Pane closed");
        Ok(())
    }

    /// SIGTERM 后轮询，返回 pane 是否在宽限期内自行退出
    fn terminate_and_wait(&self, id: &PaneId, pid: u32) -> bool {
        match ProcessManager::new().terminate(pid) {
            Ok(true) => {}
            Ok(false) => return !self.mux.pane_exists(id),
            Err(e) => {
                warn!(pane = %id, pid, error = %e, "SIGTERM failed");
                return false;
            }
        }

        let deadline = Instant::now() + self.close_grace;
        while Instant::now() < deadline {
            if !self.mux.pane_exists(id) {
                debug!(pane = %id, "Pane exited after SIGTERM");
                return true;
            }
            std::thread::sleep(CLOSE_POLL_INTERVAL);
        }
        warn!(pane = %id, grace_secs = self.close_grace.as_secs(), "Pane ignored SIGTERM, killing");
        false
    }

    /// kill-pane 之后 guard 仍在执行清理（它忽略 SIGHUP），等它自己退出
    fn wait_guard_exit(&self, id: &PaneId, pid: u32) {
        let mut probe = ProcessLiveness::new(pid);
        if !probe.is_alive() {
            return;
        }
        info!(pane = %id, pid, "Waiting for guard to finish cleanup");
        while probe.is_alive() {
            std::thread::sleep(CLOSE_POLL_INTERVAL);
        }
        debug!(pane = %id, pid, "Guard exited");
    }

    /// 把其他进程（`pw open`）创建、自己还不知道的 pane 纳入管理
    fn sync_foreign_panes(&mut self) {
        let listed = match self.mux.list_panes() {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "Cannot list panes");
                return;
            }
        };
        for info in listed {
            if self.panes.iter().any(|p| p.id == info.id) {
                continue;
            }
            if let Some(pane) = adopted_pane(info) {
                debug!(pane = %pane.id, role = %pane.kind, "Tracking pane opened elsewhere");
                self.panes.push(pane);
            }
        }
    }

    /// 按创建的逆序关闭所有 pane（包括其他进程打开的），然后销毁控制通道
    pub fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.sync_foreign_panes();
        let ids: Vec<PaneId> = self
            .panes
            .iter()
            .rev()
            .filter(|p| p.state == PaneState::Live)
            .map(|p| p.id.clone())
            .collect();
        info!(panes = ids.len(), "Tearing down session");
        for id in ids {
            if let Err(e) = self.close_pane(&id) {
                warn!(pane = %id, error = %e, "Failed to close pane during teardown");
            }
        }
        self.mux.kill_server()?;
        self.torn_down = true;
        Ok(())
    }

    /// 把当前终端 attach 到 session
    pub fn attach(&self) -> Result<()> {
        self.mux.attach()
    }
}
