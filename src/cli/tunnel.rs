//! Tunnel 命令 - 为文件浏览 pod 建立端口转发，退出时删除 pod
//!
//! `pw tunnel <namespace> <pod> <local-port> <claim>`：参数不对时只打印用法，
//! 不会调用 kubectl。

use crate::config::WardenConfig;
use crate::error::WardenError;
use crate::guard::{CommandSpec, ProcessGuard};
use crate::infra::process::ProcessLiveness;
use crate::infra::shell::shell_join;
use crate::pane::{CleanupAction, PaneId};
use anyhow::Result;
use clap::Args;
use tracing::info;

/// 文件浏览容器监听的端口
pub const FILE_BROWSER_PORT: u16 = 80;

pub const TUNNEL_USAGE: &str = "用法: pw tunnel <namespace> <pod> <local-port> <claim>";

/// Tunnel 命令参数（原样接收，由 [`TunnelRequest::parse`] 校验）
#[derive(Args, Debug)]
pub struct TunnelArgs {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
    pub args: Vec<String>,
}

/// 校验后的 tunnel 请求
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelRequest {
    pub namespace: String,
    pub pod: String,
    pub local_port: u16,
    pub claim: String,
}

impl TunnelRequest {
    pub fn parse(args: &[String]) -> Result<Self, WardenError> {
        let [namespace, pod, port, claim] = args else {
            return Err(WardenError::Usage(TUNNEL_USAGE.to_string()));
        };
        let local_port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| WardenError::Usage(format!("无效的本地端口: {}\n{}", port, TUNNEL_USAGE)))?;
        Ok(Self {
            namespace: namespace.clone(),
            pod: pod.clone(),
            local_port,
            claim: claim.clone(),
        })
    }

    pub fn port_forward(&self, kubectl: &str) -> CommandSpec {
        CommandSpec::new(
            kubectl,
            vec![
                "port-forward".to_string(),
                "-n".to_string(),
                self.namespace.clone(),
                format!("pod/{}", self.pod),
                format!("{}:{}", self.local_port, FILE_BROWSER_PORT),
            ],
        )
    }

    pub fn delete_pod(&self, kubectl: &str) -> String {
        shell_join(&[
            kubectl.to_string(),
            "delete".to_string(),
            "pod".to_string(),
            self.pod.clone(),
            "-n".to_string(),
            self.namespace.clone(),
            "--ignore-not-found".to_string(),
        ])
    }
}

/// 处理 tunnel 命令
pub async fn handle_tunnel(args: TunnelArgs, config: &WardenConfig) -> Result<i32> {
    let request = match TunnelRequest::parse(&args.args) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(1);
        }
    };

    let pane = config
        .current_pane
        .clone()
        .unwrap_or_else(|| PaneId::new(format!("tunnel-{}", request.pod)));
    println!(
        "PVC {} 的文件浏览: http://localhost:{} (关闭此窗口会删除 pod {})",
        request.claim, request.local_port, request.pod
    );
    info!(namespace = %request.namespace, pod = %request.pod, port = request.local_port, "Starting tunnel");

    let cleanup = CleanupAction::shell(request.delete_pod(&config.kubectl_bin));
    // pane 的 shell 退出即停止重试
    let mut probe = ProcessLiveness::new(std::os::unix::process::parent_id());
    let outcome = ProcessGuard::new(pane)
        .run_with_readiness_retry(
            &request.port_forward(&config.kubectl_bin),
            Some(cleanup),
            &config.retry,
            &mut probe,
        )
        .await?;
    Ok(outcome.exit_code())
}
