//! pane-warden CLI
//!
//! 在私有 tmux session 中编排 pane：日志查看、编辑器、端口转发与崩溃诊断

use clap::{Parser, Subcommand};
use pane_warden::cli::{
    handle_close, handle_crash, handle_guard, handle_keys, handle_launch, handle_list, handle_open,
    handle_retry, handle_search, handle_tunnel, CloseArgs, CrashArgs, GuardArgs, KeysArgs, LaunchArgs,
    OpenArgs, RetryArgs, SearchArgs, TunnelArgs,
};
use pane_warden::{WardenConfig, WardenError};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pw")]
#[command(about = "pane-warden - tmux pane 编排与进程守护")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 创建 session，在主 pane 中运行命令并 attach
    Launch(LaunchArgs),
    /// 在运行中的 session 里打开新 pane
    Open(OpenArgs),
    /// 关闭 pane（先让 guard 完成清理）
    Close(CloseArgs),
    /// 向 pane 发送文本
    Keys(KeysArgs),
    /// 列出 session 中的 pane
    List {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 守护命令并在任何退出方式下执行清理（pane 内部使用）
    Guard(GuardArgs),
    /// 带就绪重试的守护（pane 内部使用）
    Retry(RetryArgs),
    /// 显示主进程崩溃诊断（pane 内部使用）
    Crash(CrashArgs),
    /// 搜索日志并让 viewer 跳转到选中行（pane 内部使用）
    Search(SearchArgs),
    /// 为 PVC 文件浏览 pod 建立端口转发
    Tunnel(TunnelArgs),
}

#[tokio::main]
async fn main() {
    // 初始化 tracing 日志系统
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=debug pw launch -- my-app
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pane_warden=info,pw=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let config = WardenConfig::from_env();

    let result = match cli.command {
        Commands::Launch(args) => handle_launch(args, config),
        Commands::Open(args) => handle_open(args, config),
        Commands::Close(args) => handle_close(args, config),
        Commands::Keys(args) => handle_keys(args, config),
        Commands::List { json } => handle_list(json, config),
        Commands::Guard(args) => handle_guard(args, &config).await,
        Commands::Retry(args) => handle_retry(args, &config).await,
        Commands::Crash(args) => handle_crash(args, &config).await,
        Commands::Search(args) => handle_search(args, &config),
        Commands::Tunnel(args) => handle_tunnel(args, &config).await,
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if let Some(e) = err.downcast_ref::<WardenError>() {
                debug!(configuration = e.is_configuration(), "Command failed");
            }
            eprintln!("错误: {:#}", err);
            std::process::exit(1);
        }
    }
}
