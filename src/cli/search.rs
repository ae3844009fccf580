//! Search 命令 - 搜索 pane 中的日志跳转

use crate::config::WardenConfig;
use crate::infra::tmux::TmuxMultiplexer;
use crate::navigator::{FzfSelector, LogNavigator, NavigationOutcome};
use crate::pane::PaneId;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

/// Search 命令参数
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// 要搜索的日志文件
    pub log: PathBuf,

    /// 接收跳转的 pane（viewer）
    pub target: String,

    /// 分页器的跳转命令
    #[arg(long)]
    pub jump: Option<String>,
}

/// 处理 search 命令；跳过时返回非零退出码
pub fn handle_search(args: SearchArgs, config: &WardenConfig) -> Result<i32> {
    let mux = TmuxMultiplexer::new(&config.tmux_bin, &config.socket, &config.session_name);
    let selector = FzfSelector::new(&config.selector_bin);
    let mut navigator = LogNavigator::new(&mux, selector, &config.selector_bin)?;
    if let Some(jump) = args.jump {
        navigator = navigator.with_jump_command(jump);
    }

    let target = PaneId::new(args.target);
    let outcome = navigator.search(&args.log, &target, config.current_pane.as_ref())?;
    if let NavigationOutcome::Skipped(reason) = &outcome {
        eprintln!("已跳过日志搜索: {}", reason);
    }
    Ok(outcome.exit_code())
}
