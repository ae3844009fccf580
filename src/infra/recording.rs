//! 内存多路复用器 - 记录所有调用，用于测试编排逻辑

use super::tmux::{Multiplexer, PaneInfo, PaneSpec};
use crate::error::WardenError;
use crate::pane::{PaneId, PaneKind};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::Notify;

/// 一次多路复用器调用
#[derive(Debug, Clone, PartialEq)]
pub enum MuxCall {
    NewPane { title: String, command: String },
    KillPane(PaneId),
    SendKeys(PaneId, String),
    BindKey { pane: PaneId, key: String, command: String },
    UnbindKey(String),
    SetOption { name: String, value: String },
    Signal(String),
    WaitFor(String),
    Attach,
    KillServer,
}

#[derive(Debug, Default)]
struct State {
    next_id: u32,
    live: Vec<PaneId>,
    roles: HashMap<PaneId, PaneKind>,
    pids: HashMap<PaneId, u32>,
    options: HashMap<String, String>,
    calls: Vec<MuxCall>,
    signalled: HashSet<String>,
}

/// 记录调用的多路复用器
#[derive(Debug)]
pub struct RecordingMultiplexer {
    reachable: bool,
    state: Mutex<State>,
    notify: Notify,
}

impl RecordingMultiplexer {
    pub fn new() -> Self {
        Self {
            reachable: true,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// 控制通道不可达的实例
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    /// 预先放入一个存活的 pane（模拟其他进程创建的 pane）
    pub fn with_live_pane(self, pane: &PaneId) -> Self {
        self.lock().live.push(pane.clone());
        self
    }

    /// 为之后创建的 pane 预设进程 PID（id 按 `%0`、`%1` … 顺序分配）
    pub fn with_pane_pid(self, pane: &PaneId, pid: u32) -> Self {
        self.lock().pids.insert(pane.clone(), pid);
        self
    }

    pub fn calls(&self) -> Vec<MuxCall> {
        self.lock().calls.clone()
    }

    /// 某个 pane 收到的按键
    pub fn keys_sent_to(&self, pane: &PaneId) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MuxCall::SendKeys(p, text) if p == pane => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// 所有 send-keys 调用次数
    pub fn send_keys_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MuxCall::SendKeys(..)))
            .count()
    }

    pub fn kill_count(&self, pane: &PaneId) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MuxCall::KillPane(p) if p == pane))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: MuxCall) {
        self.lock().calls.push(call);
    }
}

impl Default for RecordingMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for RecordingMultiplexer {
    fn is_reachable(&self) -> bool {
        self.reachable
    }

    fn has_session(&self) -> bool {
        !self.lock().live.is_empty()
    }

    fn new_pane(&self, spec: &PaneSpec) -> Result<PaneId> {
        if !self.reachable {
            return Err(WardenError::MultiplexerUnavailable("recording".into()).into());
        }
        let mut state = self.lock();
        let pane = PaneId::new(format!("%{}", state.next_id));
        state.next_id += 1;
        state.live.push(pane.clone());
        state.roles.insert(pane.clone(), spec.role);
        state.calls.push(MuxCall::NewPane {
            title: spec.title.clone(),
            command: spec.command.clone(),
        });
        Ok(pane)
    }

    fn pane_exists(&self, pane: &PaneId) -> bool {
        self.lock().live.contains(pane)
    }

    fn pane_pid(&self, pane: &PaneId) -> Result<Option<u32>> {
        Ok(self.lock().pids.get(pane).copied())
    }

    fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let state = self.lock();
        Ok(state
            .live
            .iter()
            .map(|id| PaneInfo {
                id: id.clone(),
                pid: state.pids.get(id).copied(),
                role: state.roles.get(id).copied(),
            })
            .collect())
    }

    fn kill_pane(&self, pane: &PaneId) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(MuxCall::KillPane(pane.clone()));
        match state.live.iter().position(|p| p == pane) {
            Some(idx) => {
                state.live.remove(idx);
                Ok(())
            }
            None => Err(WardenError::PaneNotFound(pane.to_string()).into()),
        }
    }

    fn send_keys(&self, pane: &PaneId, text: &str) -> Result<()> {
        self.record(MuxCall::SendKeys(pane.clone(), text.to_string()));
        Ok(())
    }

    fn bind_key(&self, pane: &PaneId, key: &str, tmux_command: &str) -> Result<()> {
        self.record(MuxCall::BindKey {
            pane: pane.clone(),
            key: key.to_string(),
            command: tmux_command.to_string(),
        });
        Ok(())
    }

    fn unbind_key(&self, key: &str) -> Result<()> {
        self.record(MuxCall::UnbindKey(key.to_string()));
        Ok(())
    }

    fn set_session_option(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(MuxCall::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        });
        state.options.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn session_option(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock().options.get(name).cloned())
    }

    fn signal(&self, event: &str) -> Result<()> {
        {
            let mut state = self.lock();
            state.calls.push(MuxCall::Signal(event.to_string()));
            state.signalled.insert(event.to_string());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn wait_for(&self, event: &str) -> Result<()> {
        self.record(MuxCall::WaitFor(event.to_string()));
        loop {
            // 先注册再检查，避免错过检查与等待之间的 signal
            let notified = self.notify.notified();
            if self.lock().signalled.remove(event) {
                return Ok(());
            }
            notified.await;
        }
    }

    fn attach(&self) -> Result<()> {
        self.record(MuxCall::Attach);
        Ok(())
    }

    fn kill_server(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(MuxCall::KillServer);
        state.live.clear();
        state.options.clear();
        Ok(())
    }
}
