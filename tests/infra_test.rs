//! infra 模块测试 - 导出与组合

use pane_warden::infra::{shell_join, shell_quote, AlwaysAlive, LivenessProbe, ProcessLiveness, ProcessManager};
use pane_warden::infra::{Multiplexer, PaneSpec, RecordingMultiplexer, TmuxMultiplexer};
use pane_warden::PaneKind;

#[test]
fn test_infra_module_exports_tmux_multiplexer() {
    // 验证 TmuxMultiplexer 可以从 infra 模块导入，构造不会触碰 tmux
    let mux = TmuxMultiplexer::new("tmux", "/tmp/pw-export-test.sock", "pw-export");
    assert_eq!(mux.session(), "pw-export");
}

#[test]
fn test_infra_module_exports_process_manager() {
    let manager = ProcessManager::new();
    assert!(manager.exists(std::process::id()));
}

#[test]
fn test_liveness_probes_are_object_safe() {
    let mut probes: Vec<Box<dyn LivenessProbe>> = vec![
        Box::new(AlwaysAlive),
        Box::new(ProcessLiveness::new(std::process::id())),
    ];
    assert!(probes.iter_mut().all(|p| p.is_alive()));
}

#[test]
fn test_shell_helpers() {
    assert_eq!(shell_quote("plain"), "plain");
    assert_eq!(shell_join(&["echo".to_string(), "a b".to_string()]), "echo 'a b'");
}

#[test]
fn test_recording_multiplexer_behind_trait_object() {
    // Given: 通过 trait 对象使用内存实现
    let mux: Box<dyn Multiplexer> = Box::new(RecordingMultiplexer::new());
    let spec = PaneSpec {
        title: "editor".into(),
        command: "vim".into(),
        env: Vec::new(),
        focus: true,
        role: PaneKind::Editor,
    };

    // When
    let pane = mux.new_pane(&spec).unwrap();

    // Then
    assert!(mux.is_reachable());
    assert!(mux.pane_exists(&pane));
    mux.kill_pane(&pane).unwrap();
    assert!(!mux.pane_exists(&pane));
}
