//! 日志导航 - 在搜索 pane 里用 selector 选中一行，让目标 pane 的分页器跳转到该行
//!
//! 成功选择后只向目标 pane 发送两次输入：行号，然后是分页器的跳转命令。
//! 取消时什么都不发送。

use crate::error::WardenError;
use crate::infra::tmux::Multiplexer;
use crate::log_record::{LogRecord, NumberedLines};
use crate::pane::PaneId;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// less 的跳转命令：`42g` 跳到第 42 行
pub const JUMP_COMMAND: &str = "g";

/// 搜索被跳过时 `pw search` 的退出码
pub const SKIPPED_EXIT_CODE: i32 = 3;

/// 交互式选择器
pub trait Selector {
    fn is_available(&self) -> bool;

    /// 运行一次选择；确认返回选中的行，取消返回 None
    fn select(&self, lines: NumberedLines) -> Result<Option<String>>;
}

/// 基于 fzf 的选择器
#[derive(Debug, Clone)]
pub struct FzfSelector {
    bin: String,
}

impl FzfSelector {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Selector for FzfSelector {
    fn is_available(&self) -> bool {
        which::which(&self.bin).is_ok()
    }

    fn select(&self, lines: NumberedLines) -> Result<Option<String>> {
        let mut child = Command::new(&self.bin)
            .args(["--no-sort", "--tac", "--delimiter", "\t", "--nth", "2..", "--prompt", "log> "])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("无法启动选择器: {}", self.bin))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("选择器 stdin 不可用"))?;

        // 边读日志边写入，选择器可以在日志读完之前开始交互
        let (fed, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || feed_lines(&mut stdin, lines));
            let output = child.wait_with_output();
            (writer.join(), output)
        });
        match fed {
            Ok(Ok(count)) => debug!(lines = count, "Selector input finished"),
            Ok(Err(e)) => warn!(error = %e, "Failed to read log while feeding selector"),
            Err(_) => warn!("Selector feeder thread panicked"),
        }

        let output = output.context("等待选择器退出失败")?;
        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(stdout.lines().next().map(str::to_string).filter(|s| !s.is_empty()))
            }
            // 1: 没有匹配项，130: 用户取消
            Some(1) | Some(130) => Ok(None),
            _ => Err(anyhow!("选择器异常退出: {}", output.status)),
        }
    }
}

fn feed_lines<W: Write>(out: &mut W, lines: NumberedLines) -> std::io::Result<usize> {
    let mut count = 0;
    for line in lines {
        let line = line?;
        match writeln!(out, "{}", line.to_selector_row()) {
            Ok(()) => count += 1,
            // 选择器已经退出，不再需要剩余的行
            Err(e) if e.kind() == ErrorKind::BrokenPipe => break,
            Err(e) => return Err(e),
        }
    }
    Ok(count)
}

/// 一次跳转请求，源 pane 与目标 pane 必须不同
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationRequest {
    line: usize,
    target: PaneId,
    source: Option<PaneId>,
}

impl NavigationRequest {
    pub fn new(line: usize, target: PaneId, source: Option<PaneId>) -> Result<Self, WardenError> {
        if source.as_ref() == Some(&target) {
            return Err(WardenError::SameSourceAndTarget(target.to_string()));
        }
        Ok(Self { line, target, source })
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn target(&self) -> &PaneId {
        &self.target
    }
}

/// 跳过搜索的原因
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    LogUnavailable,
    SelectorUnavailable(String),
    TargetGone(PaneId),
    UnparseableSelection(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::LogUnavailable => write!(f, "日志不存在或为空"),
            SkipReason::SelectorUnavailable(bin) => write!(f, "选择器不可用: {}", bin),
            SkipReason::TargetGone(pane) => write!(f, "目标 pane 已关闭: {}", pane),
            SkipReason::UnparseableSelection(s) => write!(f, "选中的行没有行号: {}", s),
        }
    }
}

/// 搜索结果
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationOutcome {
    Navigated { line: usize },
    Cancelled,
    Skipped(SkipReason),
}

impl NavigationOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            NavigationOutcome::Navigated { .. } | NavigationOutcome::Cancelled => 0,
            NavigationOutcome::Skipped(_) => SKIPPED_EXIT_CODE,
        }
    }
}

/// 日志导航器
pub struct LogNavigator<'a, M: Multiplexer, S: Selector> {
    mux: &'a M,
    selector: S,
    selector_name: String,
    jump_command: String,
    line_pattern: Regex,
}

impl<'a, M: Multiplexer, S: Selector> LogNavigator<'a, M, S> {
    pub fn new(mux: &'a M, selector: S, selector_name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            mux,
            selector,
            selector_name: selector_name.into(),
            jump_command: JUMP_COMMAND.to_string(),
            line_pattern: Regex::new(r"^\s*(\d+)")?,
        })
    }

    pub fn with_jump_command(mut self, jump_command: impl Into<String>) -> Self {
        self.jump_command = jump_command.into();
        self
    }

    /// 选中行开头的行号
    pub fn parse_line_number(&self, selection: &str) -> Option<usize> {
        self.line_pattern
            .captures(selection)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .filter(|n| *n > 0)
    }

    /// 搜索 `log`，把选中的行号发送给 `target`
    pub fn search(&self, log: &Path, target: &PaneId, source: Option<&PaneId>) -> Result<NavigationOutcome> {
        if source == Some(target) {
            return Err(WardenError::SameSourceAndTarget(target.to_string()).into());
        }

        let record = LogRecord::new(log);
        if !record.has_content() {
            info!(log = %log.display(), "Log missing or empty, skipping search");
            return Ok(NavigationOutcome::Skipped(SkipReason::LogUnavailable));
        }
        if !self.selector.is_available() {
            warn!(selector = %self.selector_name, "Selector not installed, skipping search");
            return Ok(NavigationOutcome::Skipped(SkipReason::SelectorUnavailable(
                self.selector_name.clone(),
            )));
        }
        if !self.mux.pane_exists(target) {
            warn!(target = %target, "Target pane gone, skipping search");
            return Ok(NavigationOutcome::Skipped(SkipReason::TargetGone(target.clone())));
        }

        let Some(selection) = self.selector.select(record.numbered_lines()?)? else {
            debug!(target = %target, "Selection cancelled, nothing sent");
            return Ok(NavigationOutcome::Cancelled);
        };

        let Some(line) = self.parse_line_number(&selection) else {
            warn!(selection = %selection, "Selected row has no line number");
            return Ok(NavigationOutcome::Skipped(SkipReason::UnparseableSelection(selection)));
        };

        let request = NavigationRequest::new(line, target.clone(), source.cloned())?;
        self.navigate(&request)?;
        Ok(NavigationOutcome::Navigated { line })
    }

    /// 发送行号和跳转命令
    pub fn navigate(&self, request: &NavigationRequest) -> Result<()> {
        let line = request.line().to_string();
        self.mux.send_keys(request.target(), &line)?;
        self.mux.send_keys(request.target(), &self.jump_command)?;
        info!(target = %request.target(), line = request.line(), "Navigated pager to line");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::recording::RecordingMultiplexer;
    use std::cell::Cell;
    use std::os::unix::fs::PermissionsExt;

    /// 选中指定行号的选择器；`None` 表示用户取消
    struct ScriptedSelector {
        available: bool,
        pick: Option<usize>,
        invoked: Cell<usize>,
    }

    impl ScriptedSelector {
        fn picking(line: usize) -> Self {
            Self {
                available: true,
                pick: Some(line),
                invoked: Cell::new(0),
            }
        }

        fn cancelling() -> Self {
            Self {
                available: true,
                pick: None,
                invoked: Cell::new(0),
            }
        }
    }

    impl Selector for ScriptedSelector {
        fn is_available(&self) -> bool {
            self.available
        }

        fn select(&self, lines: NumberedLines) -> Result<Option<String>> {
            self.invoked.set(self.invoked.get() + 1);
            let Some(pick) = self.pick else {
                return Ok(None);
            };
            for line in lines {
                let line = line?;
                if line.number == pick {
                    return Ok(Some(line.to_selector_row()));
                }
            }
            Ok(None)
        }
    }

    fn hundred_line_log() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 1..=100 {
            writeln!(file, "request {} handled", i).unwrap();
        }
        file
    }

    #[test]
    fn test_navigation_sends_line_then_jump() {
        // Given: 100 行日志，目标 pane %1 存活，搜索在 %2 中运行
        let log = hundred_line_log();
        let target = PaneId::new("%1");
        let source = PaneId::new("%2");
        let mux = RecordingMultiplexer::new().with_live_pane(&target);

        // When: 选中第 42 行
        let navigator = LogNavigator::new(&mux, ScriptedSelector::picking(42), "fzf").unwrap();
        let outcome = navigator.search(log.path(), &target, Some(&source)).unwrap();

        // Then: 目标 pane 恰好收到 "42" 和 "g"，源 pane 什么都没收到
        assert_eq!(outcome, NavigationOutcome::Navigated { line: 42 });
        assert_eq!(mux.keys_sent_to(&target), vec!["42".to_string(), "g".to_string()]);
        assert!(mux.keys_sent_to(&source).is_empty());
        assert_eq!(mux.send_keys_count(), 2);
    }

    #[test]
    fn test_cancel_sends_nothing() {
        let log = hundred_line_log();
        let target = PaneId::new("%1");
        let mux = RecordingMultiplexer::new().with_live_pane(&target);

        let navigator = LogNavigator::new(&mux, ScriptedSelector::cancelling(), "fzf").unwrap();
        let outcome = navigator.search(log.path(), &target, Some(&PaneId::new("%2"))).unwrap();

        assert_eq!(outcome, NavigationOutcome::Cancelled);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(mux.send_keys_count(), 0);
    }

    #[test]
    fn test_missing_or_empty_log_is_skipped() {
        let target = PaneId::new("%1");
        let mux = RecordingMultiplexer::new().with_live_pane(&target);
        let selector = ScriptedSelector::picking(1);
        let navigator = LogNavigator::new(&mux, selector, "fzf").unwrap();

        let missing = navigator
            .search(Path::new("/nonexistent/pane-warden.log"), &target, None)
            .unwrap();
        assert_eq!(missing, NavigationOutcome::Skipped(SkipReason::LogUnavailable));
        assert_eq!(missing.exit_code(), SKIPPED_EXIT_CODE);

        let empty = tempfile::NamedTempFile::new().unwrap();
        let outcome = navigator.search(empty.path(), &target, None).unwrap();
        assert_eq!(outcome, NavigationOutcome::Skipped(SkipReason::LogUnavailable));

        // 选择器从未被调用
        assert_eq!(navigator.selector.invoked.get(), 0);
        assert_eq!(mux.send_keys_count(), 0);
    }

    #[test]
    fn test_unavailable_selector_is_skipped() {
        let log = hundred_line_log();
        let target = PaneId::new("%1");
        let mux = RecordingMultiplexer::new().with_live_pane(&target);
        let selector = ScriptedSelector {
            available: false,
            ..ScriptedSelector::picking(3)
        };
        let navigator = LogNavigator::new(&mux, selector, "fzf").unwrap();
        let outcome = navigator.search(log.path(), &target, None).unwrap();
        assert_eq!(
            outcome,
            NavigationOutcome::Skipped(SkipReason::SelectorUnavailable("fzf".into()))
        );
    }

    #[test]
    fn test_same_source_and_target_rejected() {
        let log = hundred_line_log();
        let pane = PaneId::new("%1");
        let mux = RecordingMultiplexer::new().with_live_pane(&pane);
        let navigator = LogNavigator::new(&mux, ScriptedSelector::picking(42), "fzf").unwrap();

        let err = navigator.search(log.path(), &pane, Some(&pane)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WardenError>(),
            Some(WardenError::SameSourceAndTarget(_))
        ));
        assert_eq!(mux.send_keys_count(), 0);
        assert!(NavigationRequest::new(1, pane.clone(), Some(pane)).is_err());
    }

    #[test]
    fn test_dead_target_is_skipped() {
        let log = hundred_line_log();
        let mux = RecordingMultiplexer::new();
        let navigator = LogNavigator::new(&mux, ScriptedSelector::picking(42), "fzf").unwrap();
        let outcome = navigator.search(log.path(), &PaneId::new("%9"), None).unwrap();
        assert!(matches!(outcome, NavigationOutcome::Skipped(SkipReason::TargetGone(_))));
    }

    #[test]
    fn test_parse_line_number() {
        let mux = RecordingMultiplexer::new();
        let navigator = LogNavigator::new(&mux, ScriptedSelector::cancelling(), "fzf").unwrap();
        assert_eq!(navigator.parse_line_number("42\trequest 42 handled"), Some(42));
        assert_eq!(navigator.parse_line_number("  7\tx"), Some(7));
        assert_eq!(navigator.parse_line_number("no number"), None);
        assert_eq!(navigator.parse_line_number("0\tzero"), None);
    }

    #[test]
    fn test_custom_jump_command() {
        let log = hundred_line_log();
        let target = PaneId::new("%1");
        let mux = RecordingMultiplexer::new().with_live_pane(&target);
        let navigator = LogNavigator::new(&mux, ScriptedSelector::picking(5), "fzf")
            .unwrap()
            .with_jump_command("G");
        navigator.search(log.path(), &target, None).unwrap();
        assert_eq!(mux.keys_sent_to(&target), vec!["5".to_string(), "G".to_string()]);
    }

    fn fake_selector(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-fzf");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_fzf_selector_protocol() {
        // Given: 一个假的 fzf，从 stdin 选出行号为 42 的行
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_selector(dir.path(), "awk -F '\\t' '$1 == 42 { print; exit 0 }'");
        let log = hundred_line_log();

        // When
        let selector = FzfSelector::new(bin);
        assert!(selector.is_available());
        let selection = selector
            .select(LogRecord::new(log.path()).numbered_lines().unwrap())
            .unwrap();

        // Then
        assert_eq!(selection.as_deref(), Some("42\trequest 42 handled"));
    }

    #[test]
    fn test_fzf_selector_cancel_and_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let log = hundred_line_log();

        let cancelled = FzfSelector::new(fake_selector(dir.path(), "cat >/dev/null; exit 130"));
        assert_eq!(
            cancelled.select(LogRecord::new(log.path()).numbered_lines().unwrap()).unwrap(),
            None
        );

        let no_match = FzfSelector::new(fake_selector(dir.path(), "exit 1"));
        assert_eq!(
            no_match.select(LogRecord::new(log.path()).numbered_lines().unwrap()).unwrap(),
            None
        );

        let broken = FzfSelector::new(fake_selector(dir.path(), "exit 2"));
        assert!(broken.select(LogRecord::new(log.path()).numbered_lines().unwrap()).is_err());
    }
}
