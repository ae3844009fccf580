//! Pane 管理命令：open / close / keys / list
//!
//! 在运行中的 session 上操作（可以在任意 pane 内或 session 外调用）。

use super::output::print_records;
use crate::config::WardenConfig;
use crate::pane::{CleanupAction, PaneId, PaneRole};
use crate::session::SessionController;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Open 命令参数
#[derive(Args, Debug)]
pub struct OpenArgs {
    #[command(subcommand)]
    pub role: OpenRole,

    /// 输出 JSON 格式
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum OpenRole {
    /// 日志查看 pane：输出 tee 到日志并用分页器显示，F2 搜索
    Viewer {
        /// 日志捕获路径
        #[arg(long)]
        log: PathBuf,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// 交互式编辑器 pane
    Editor {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// 端口转发等依赖远端就绪的 pane，失败后重试
    Tunnel {
        /// 远端对象名
        #[arg(long)]
        target: String,
        /// 重试间隔（毫秒）
        #[arg(long, default_value = "2000")]
        backoff_ms: u64,
        /// pane 关闭时执行的清理命令
        #[arg(long)]
        cleanup: Option<String>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// 处理 open 命令
pub fn handle_open(args: OpenArgs, config: WardenConfig) -> Result<i32> {
    let (role, command, cleanup) = match args.role {
        OpenRole::Viewer { log, command } => (PaneRole::Viewer { log }, command, None),
        OpenRole::Editor { command } => (PaneRole::Editor, command, None),
        OpenRole::Tunnel {
            target,
            backoff_ms,
            cleanup,
            command,
        } => (
            PaneRole::Tunnel {
                target,
                backoff: Duration::from_millis(backoff_ms),
            },
            command,
            cleanup.map(CleanupAction::shell),
        ),
    };

    let mut controller = SessionController::adopt(config)?;
    let id = controller.new_pane(role, &command, cleanup)?;

    if args.json {
        if let Some(pane) = controller.pane(&id) {
            println!("{}", serde_json::to_string_pretty(&pane.record())?);
        }
    } else {
        println!("{}", id);
    }
    Ok(0)
}

/// Close 命令参数
#[derive(Args, Debug)]
pub struct CloseArgs {
    /// pane id（如 %3）
    pub pane: String,
}

pub fn handle_close(args: CloseArgs, config: WardenConfig) -> Result<i32> {
    let mut controller = SessionController::adopt(config)?;
    controller.close_pane(&PaneId::new(args.pane))?;
    Ok(0)
}

/// Keys 命令参数
#[derive(Args, Debug)]
pub struct KeysArgs {
    pub pane: String,
    /// 按字面发送的文本
    pub text: String,
}

pub fn handle_keys(args: KeysArgs, config: WardenConfig) -> Result<i32> {
    let controller = SessionController::adopt(config)?;
    controller.inject_keys(&PaneId::new(args.pane), &args.text)?;
    Ok(0)
}

/// 列出 session 中的 pane
pub fn handle_list(json: bool, config: WardenConfig) -> Result<i32> {
    let controller = SessionController::adopt(config)?;
    print_records(&controller.records(), json)?;
    Ok(0)
}
