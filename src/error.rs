//! 错误类型 - pane 编排过程中可区分的失败
//!
//! 库的边缘仍然使用 `anyhow::Result`，这里只列出调用方需要 match 的情况。

use thiserror::Error;

/// pane-warden 错误
#[derive(Debug, Error)]
pub enum WardenError {
    /// tmux 控制通道不可达（二进制缺失或 server 无法启动）
    #[error("tmux 控制通道不可用: {0}")]
    MultiplexerUnavailable(String),

    /// tmux 命令执行失败
    #[error("tmux {command} 失败: {stderr}")]
    Multiplexer { command: String, stderr: String },

    /// 指定 pane 不存在
    #[error("pane 不存在: {0}")]
    PaneNotFound(String),

    /// 搜索 pane 与目标 pane 相同
    #[error("搜索 pane 与目标 pane 不能相同: {0}")]
    SameSourceAndTarget(String),

    /// 外部工具不可用
    #[error("未找到外部工具: {0}")]
    ToolMissing(String),

    /// 命令行参数错误
    #[error("{0}")]
    Usage(String),

    /// crash inspector 状态机收到非法迁移
    #[error("非法状态迁移: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// 配置类错误：直接报告并以非零状态退出，不重试
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WardenError::ToolMissing(_) | WardenError::Usage(_) | WardenError::MultiplexerUnavailable(_)
        )
    }
}
