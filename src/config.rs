//! 配置模块 - 从环境变量构建显式的配置上下文
//!
//! 所有覆盖项都是可选的，缺失时记录日志并回退到默认值，不会失败。
//! 监督逻辑只读取 `WardenConfig`，不直接查环境变量。

use crate::crash::CrashConfig;
use crate::guard::RetryPolicy;
use crate::pane::PaneId;
use std::path::PathBuf;
use tracing::{debug, info};

pub const ENV_TMUX_SOCKET: &str = "PW_TMUX_SOCKET";
pub const ENV_SESSION_NAME: &str = "PW_SESSION_NAME";
pub const ENV_TMUX_BIN: &str = "PW_TMUX_BIN";
pub const ENV_SELECTOR_BIN: &str = "PW_SELECTOR_BIN";
pub const ENV_PAGER: &str = "PW_PAGER";
pub const ENV_KUBECTL_BIN: &str = "PW_KUBECTL_BIN";
pub const ENV_LOG_FILE: &str = "PW_LOG_FILE";
pub const ENV_SELF_BIN: &str = "PW_SELF_BIN";
/// tmux 为 pane 内进程设置的当前 pane id
pub const ENV_TMUX_PANE: &str = "TMUX_PANE";

pub const DEFAULT_SESSION_NAME: &str = "pane-warden";
pub const DEFAULT_TMUX_BIN: &str = "tmux";
pub const DEFAULT_SELECTOR_BIN: &str = "fzf";
pub const DEFAULT_PAGER: &str = "less";
pub const DEFAULT_KUBECTL_BIN: &str = "kubectl";

/// 运行配置
#[derive(Debug, Clone)]
pub struct WardenConfig {
    /// tmux 控制通道 socket
    pub socket: PathBuf,
    pub session_name: String,
    pub tmux_bin: String,
    pub selector_bin: String,
    pub pager: String,
    pub kubectl_bin: String,
    /// 主进程写入的共享日志
    pub log_file: PathBuf,
    /// pane 内调用的 pw 可执行文件
    pub self_bin: PathBuf,
    /// 当前进程所在的 pane（不在 tmux 内时为 None）
    pub current_pane: Option<PaneId>,
    /// 监督进程 PID，tunnel 的重试循环以它的存活为界
    pub supervisor_pid: u32,
    pub crash: CrashConfig,
    pub retry: RetryPolicy,
}

impl WardenConfig {
    /// 从进程环境构建
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意查找函数构建（测试时传入固定表）
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let socket = match get(ENV_TMUX_SOCKET) {
            Some(path) => PathBuf::from(path),
            None => {
                let fallback = default_socket_path();
                info!(socket = %fallback.display(), "{} not set, using private socket", ENV_TMUX_SOCKET);
                fallback
            }
        };

        let log_file = match get(ENV_LOG_FILE) {
            Some(path) => PathBuf::from(path),
            None => {
                let fallback = std::env::temp_dir().join("pane-warden.log");
                debug!(log = %fallback.display(), "{} not set, using default log file", ENV_LOG_FILE);
                fallback
            }
        };

        let self_bin = match get(ENV_SELF_BIN) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_exe().unwrap_or_else(|_| {
                debug!("current_exe unavailable, falling back to pw on PATH");
                PathBuf::from("pw")
            }),
        };

        Self {
            socket,
            session_name: with_fallback(&get, ENV_SESSION_NAME, DEFAULT_SESSION_NAME),
            tmux_bin: with_fallback(&get, ENV_TMUX_BIN, DEFAULT_TMUX_BIN),
            selector_bin: with_fallback(&get, ENV_SELECTOR_BIN, DEFAULT_SELECTOR_BIN),
            pager: with_fallback(&get, ENV_PAGER, DEFAULT_PAGER),
            kubectl_bin: with_fallback(&get, ENV_KUBECTL_BIN, DEFAULT_KUBECTL_BIN),
            log_file,
            self_bin,
            current_pane: get(ENV_TMUX_PANE).map(PaneId::new),
            supervisor_pid: std::process::id(),
            crash: CrashConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// 传给新 pane 的环境变量，使 pane 内的 pw 进程共享同一上下文
    pub fn pane_env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_TMUX_SOCKET.to_string(), self.socket.to_string_lossy().into_owned()),
            (ENV_SESSION_NAME.to_string(), self.session_name.clone()),
            (ENV_TMUX_BIN.to_string(), self.tmux_bin.clone()),
            (ENV_SELECTOR_BIN.to_string(), self.selector_bin.clone()),
            (ENV_PAGER.to_string(), self.pager.clone()),
            (ENV_KUBECTL_BIN.to_string(), self.kubectl_bin.clone()),
            (ENV_LOG_FILE.to_string(), self.log_file.to_string_lossy().into_owned()),
            (ENV_SELF_BIN.to_string(), self.self_bin.to_string_lossy().into_owned()),
        ]
    }
}

fn with_fallback<G>(get: &G, key: &str, default: &str) -> String
where
    G: Fn(&str) -> Option<String>,
{
    get(key).unwrap_or_else(|| {
        debug!(default = %default, "{} not set, using default", key);
        default.to_string()
    })
}

/// 默认 socket：优先 XDG runtime 目录，否则临时目录
fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pane-warden")
        .join("tmux.sock")
}
