//! pane-warden - tmux pane 编排与进程守护

pub mod cli;
pub mod config;
pub mod crash;
pub mod error;
pub mod guard;
pub mod infra;
pub mod log_record;
pub mod navigator;
pub mod pane;
pub mod session;

pub use config::WardenConfig;
pub use crash::{CrashConfig, CrashInspector, CrashReport, CrashState};
pub use error::WardenError;
pub use guard::{CleanupGuard, CommandSpec, ExitOutcome, ProcessGuard, RetryOutcome, RetryPolicy};
pub use infra::{LivenessProbe, Multiplexer, ProcessLiveness, RecordingMultiplexer, TmuxMultiplexer};
pub use log_record::{BlockSpec, LogBlock, LogRecord, NumberedLine, NumberedLines};
pub use navigator::{FzfSelector, LogNavigator, NavigationOutcome, NavigationRequest, Selector, SkipReason};
pub use pane::{CleanupAction, Pane, PaneId, PaneKind, PaneRecord, PaneRole, PaneState};
pub use session::SessionController;
