//! 编排流程测试 - 用内存多路复用器串起 controller、navigator、guard、crash inspector

use pane_warden::infra::MuxCall;
use pane_warden::{
    CleanupAction, CommandSpec, CrashConfig, CrashInspector, CrashReport, CrashState, ExitOutcome, LivenessProbe,
    LogNavigator, NavigationOutcome, NumberedLines, PaneId, PaneRole, ProcessGuard, RecordingMultiplexer,
    RetryOutcome, RetryPolicy, Selector, SessionController, WardenConfig,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config() -> WardenConfig {
    WardenConfig::from_lookup(|key| match key {
        "PW_SELF_BIN" => Some("pw".to_string()),
        "PW_TMUX_SOCKET" => Some("/tmp/pw-orchestration/tmux.sock".to_string()),
        _ => None,
    })
}

/// 总是选中包含 needle 的第一行
struct FindSelector {
    needle: &'static str,
}

impl Selector for FindSelector {
    fn is_available(&self) -> bool {
        true
    }

    fn select(&self, lines: NumberedLines) -> anyhow::Result<Option<String>> {
        for line in lines {
            let line = line?;
            if line.text.contains(self.needle) {
                return Ok(Some(line.to_selector_row()));
            }
        }
        Ok(None)
    }
}

#[test]
fn test_viewer_search_navigates_viewer_pane() {
    // Given: 一个 viewer pane 和它的日志
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("web.log");
    let mut file = std::fs::File::create(&log).unwrap();
    for i in 1..=60 {
        if i == 37 {
            writeln!(file, "GET /health 500").unwrap();
        } else {
            writeln!(file, "GET /health 200").unwrap();
        }
    }

    let mut controller = SessionController::new(config(), RecordingMultiplexer::new());
    let viewer = controller
        .new_pane(
            PaneRole::Viewer { log: log.clone() },
            &["kubectl".to_string(), "logs".to_string(), "-f".to_string(), "web-0".to_string()],
            None,
        )
        .unwrap();

    // When: F2 打开的搜索（运行在另一个 pane）选中第 37 行
    let search_pane = PaneId::new("%50");
    let navigator = LogNavigator::new(controller.mux(), FindSelector { needle: "500" }, "fzf").unwrap();
    let outcome = navigator.search(&log, &viewer, Some(&search_pane)).unwrap();

    // Then: viewer 收到 "37" 和 "g"
    assert_eq!(outcome, NavigationOutcome::Navigated { line: 37 });
    assert_eq!(
        controller.mux().keys_sent_to(&viewer),
        vec!["37".to_string(), "g".to_string()]
    );
    assert!(controller.mux().keys_sent_to(&search_pane).is_empty());

    drop(navigator);
    controller.teardown().unwrap();
    assert!(controller.mux().calls().contains(&MuxCall::KillServer));
}

struct FlakySupervisor {
    remaining: usize,
}

impl LivenessProbe for FlakySupervisor {
    fn is_alive(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

#[tokio::test]
async fn test_tunnel_retry_cleans_up_after_supervisor_exit() {
    // Given: 永远未就绪的端口转发，监督进程在 3 次尝试后退出
    let deletions = Arc::new(AtomicUsize::new(0));
    let counter = deletions.clone();
    let cleanup = CleanupAction::from_fn("delete pod", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let policy = RetryPolicy {
        backoff: Duration::from_millis(10),
        max_attempts: None,
    };
    let mut probe = FlakySupervisor { remaining: 3 };

    // When
    let outcome = ProcessGuard::new(PaneId::new("%2"))
        .run_with_readiness_retry_until(
            &CommandSpec::shell("exit 1"),
            Some(cleanup),
            &policy,
            &mut probe,
            std::future::pending(),
        )
        .await
        .unwrap();

    // Then: 不再有第 4 次尝试，pod 只删除一次
    assert_eq!(outcome, RetryOutcome::SupervisorGone { attempts: 3 });
    assert_eq!(deletions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_crash_flow_from_guard_to_inspector() {
    // Given: 主进程写日志后崩溃
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let script = format!(
        "echo 'starting' >> '{log}'; echo 'CRITICAL worker died' >> '{log}'; echo 'Traceback (most recent call last):' >> '{log}'; echo '  File app.py' >> '{log}'; exit 1",
        log = log.display()
    );
    let pane = PaneId::new("%0");
    let mux = RecordingMultiplexer::new().with_live_pane(&pane);

    let outcome = ProcessGuard::new(pane.clone())
        .run_until(&CommandSpec::shell(script), None, std::future::pending())
        .await
        .unwrap();
    assert!(outcome.is_abnormal());

    // When: inspector 接管同一 pane，超时关闭
    let config = CrashConfig {
        ack_timeout: Duration::from_millis(30),
        ..CrashConfig::default()
    };
    let report = CrashReport::collect(&log, outcome, &config).unwrap();
    let mut inspector = CrashInspector::new(&mux, pane.clone(), config);
    let mut screen = Vec::new();
    let winner = inspector.run(&report, &mut screen).await.unwrap();

    // Then
    assert_eq!(winner, CrashState::TimedOut);
    assert_eq!(report.exit, ExitOutcome::Exited(1));
    assert_eq!(report.error_block.as_ref().unwrap().matched_line, 2);
    assert_eq!(report.trace_block.as_ref().unwrap().lines.len(), 2);
    let screen = String::from_utf8_lossy(&screen);
    assert!(screen.contains("CRITICAL worker died"));
    assert!(screen.contains("File app.py"));
    assert_eq!(mux.kill_count(&pane), 1);
}
