//! 真实 tmux 上的 session 测试（未安装 tmux 时跳过）
//!
//! pane 内运行的是本次构建的 pw 可执行文件。

use pane_warden::{CleanupAction, PaneRole, SessionController, TmuxMultiplexer, WardenConfig};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

fn tmux_config(dir: &Path) -> Option<WardenConfig> {
    if which::which("tmux").is_err() {
        eprintln!("tmux not installed, skipping");
        return None;
    }
    let socket = dir.join("tmux.sock").to_string_lossy().into_owned();
    let log = dir.join("pw.log").to_string_lossy().into_owned();
    Some(WardenConfig::from_lookup(move |key| match key {
        "PW_TMUX_SOCKET" => Some(socket.clone()),
        "PW_SESSION_NAME" => Some("pw-it".to_string()),
        "PW_SELF_BIN" => Some(env!("CARGO_BIN_EXE_pw").to_string()),
        "PW_LOG_FILE" => Some(log.clone()),
        _ => None,
    }))
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    check()
}

#[test]
fn test_close_pane_runs_guard_cleanup_before_destroy() {
    let dir = tempfile::tempdir().unwrap();
    let Some(config) = tmux_config(dir.path()) else { return };
    let marker: PathBuf = dir.path().join("cleaned");

    // Given: editor pane 中由 guard 守护的长时间命令
    let mux = TmuxMultiplexer::new(&config.tmux_bin, &config.socket, &config.session_name);
    let mut controller = SessionController::new(config, mux).with_close_grace(Duration::from_secs(3));
    let pane = controller
        .new_pane(
            PaneRole::Editor,
            &["sleep".to_string(), "60".to_string()],
            Some(CleanupAction::shell(format!("touch '{}'", marker.display()))),
        )
        .unwrap();
    // 等 guard 装好信号监听
    std::thread::sleep(Duration::from_millis(800));

    // When
    controller.close_pane(&pane).unwrap();

    // Then: close_pane 返回时清理已经执行，pane 已销毁
    assert!(marker.exists());
    assert_eq!(controller.live_panes().count(), 0);

    controller.teardown().unwrap();
}

#[test]
fn test_adopt_sees_panes_created_by_launcher() {
    let dir = tempfile::tempdir().unwrap();
    let Some(config) = tmux_config(dir.path()) else { return };

    let mux = TmuxMultiplexer::new(&config.tmux_bin, &config.socket, &config.session_name);
    let mut launcher = SessionController::new(config.clone(), mux);
    let pane = launcher
        .new_pane(
            PaneRole::Tunnel {
                target: "db".to_string(),
                backoff: Duration::from_millis(200),
            },
            &["sleep".to_string(), "60".to_string()],
            None,
        )
        .unwrap();

    let adopted = SessionController::adopt(config).unwrap();
    let record = adopted.records().into_iter().find(|r| r.pane_id == pane).unwrap();
    assert_eq!(record.role, pane_warden::PaneKind::Tunnel);

    launcher.teardown().unwrap();
}

#[test]
fn test_open_tunnel_keeps_retrying_while_session_lives() {
    let dir = tempfile::tempdir().unwrap();
    let Some(config) = tmux_config(dir.path()) else { return };
    let attempts = dir.path().join("attempts");

    // Given: 由本进程创建并持有的 session
    let mux = TmuxMultiplexer::new(&config.tmux_bin, &config.socket, &config.session_name);
    let mut launcher = SessionController::new(config.clone(), mux);
    launcher
        .new_pane(
            PaneRole::Crash { log: config.log_file.clone() },
            &["sleep".to_string(), "60".to_string()],
            None,
        )
        .unwrap();

    // When: 另一个短命的 pw open 进程打开一个永远失败的 tunnel
    let output = Command::new(env!("CARGO_BIN_EXE_pw"))
        .args(["open", "tunnel", "--target", "db", "--backoff-ms", "200", "--", "sh", "-c"])
        .arg(format!("echo x >> '{}'; exit 1", attempts.display()))
        .env("PW_TMUX_SOCKET", &config.socket)
        .env("PW_SESSION_NAME", &config.session_name)
        .env("PW_SELF_BIN", env!("CARGO_BIN_EXE_pw"))
        .env("PW_LOG_FILE", &config.log_file)
        .env("RUST_LOG", "off")
        .env_remove("TMUX_PANE")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    // Then: pw open 退出后重试仍在继续
    let count = || {
        std::fs::read_to_string(&attempts)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    };
    assert!(wait_until(Duration::from_secs(5), || count() > 2), "attempts = {}", count());

    launcher.teardown().unwrap();
}

#[test]
fn test_teardown_closes_panes_opened_by_other_controllers() {
    let dir = tempfile::tempdir().unwrap();
    let Some(config) = tmux_config(dir.path()) else { return };
    let marker = dir.path().join("cleaned");

    // Given: launcher 的 crash pane，以及另一个控制器打开的 editor pane
    let mux = TmuxMultiplexer::new(&config.tmux_bin, &config.socket, &config.session_name);
    let mut launcher = SessionController::new(config.clone(), mux).with_close_grace(Duration::from_secs(3));
    launcher
        .new_pane(
            PaneRole::Crash { log: config.log_file.clone() },
            &["sleep".to_string(), "60".to_string()],
            None,
        )
        .unwrap();
    let mut other = SessionController::adopt(config).unwrap();
    let foreign = other
        .new_pane(
            PaneRole::Editor,
            &["sleep".to_string(), "60".to_string()],
            Some(CleanupAction::shell(format!("touch '{}'", marker.display()))),
        )
        .unwrap();
    drop(other);
    std::thread::sleep(Duration::from_millis(800));

    // When
    launcher.teardown().unwrap();

    // Then: 外来 pane 也经过 guard 清理
    assert!(marker.exists());
    assert_eq!(
        launcher.pane(&foreign).map(|p| p.state),
        Some(pane_warden::PaneState::Destroyed)
    );
}
