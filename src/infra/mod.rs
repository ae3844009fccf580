//! 基础设施层 - tmux、进程、shell 引用

pub mod process;
pub mod recording;
pub mod shell;
pub mod tmux;

pub use process::{AlwaysAlive, LivenessProbe, ProcessLiveness, ProcessManager};
pub use recording::{MuxCall, RecordingMultiplexer};
pub use shell::{shell_join, shell_quote};
pub use tmux::{Multiplexer, PaneInfo, PaneSpec, TmuxMultiplexer};
