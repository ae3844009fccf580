//! Launch 命令 - 创建 session，在 crash pane 中运行主进程并 attach
//!
//! detach 或主进程退出后按逆序关闭所有 pane 并销毁私有 tmux server。

use crate::config::WardenConfig;
use crate::error::WardenError;
use crate::infra::tmux::{Multiplexer, TmuxMultiplexer};
use crate::pane::PaneRole;
use crate::session::SessionController;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

/// Launch 命令参数
#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// 主进程写入的日志（默认 PW_LOG_FILE）
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// 主进程命令
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// 处理 launch 命令
pub fn handle_launch(args: LaunchArgs, config: WardenConfig) -> Result<i32> {
    let mux = TmuxMultiplexer::new(&config.tmux_bin, &config.socket, &config.session_name);
    if !mux.is_available() {
        return Err(WardenError::ToolMissing(format!("{} (请先安装 tmux)", config.tmux_bin)).into());
    }
    if mux.has_session() {
        return Err(WardenError::Usage(format!(
            "session {} 已在运行 (socket {})",
            config.session_name,
            config.socket.display()
        ))
        .into());
    }

    let log = args.log.unwrap_or_else(|| config.log_file.clone());
    let mut controller = SessionController::new(config, mux);
    let primary = controller.new_pane(PaneRole::Crash { log }, &args.command, None)?;
    info!(pane = %primary, "Primary pane started, attaching");

    // 无论 attach 是否成功都要 teardown
    let attached = controller.attach();
    if let Err(e) = &attached {
        warn!(error = %e, "Attach failed");
    }
    controller.teardown()?;
    attached?;
    Ok(0)
}
