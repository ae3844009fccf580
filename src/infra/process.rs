//! 进程模块 - 监督进程存活检查与信号投递

use anyhow::Result;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};
use tracing::{debug, warn};

/// 存活探针：重试循环在每次尝试前询问监督进程是否仍然存活
pub trait LivenessProbe: Send {
    fn is_alive(&mut self) -> bool;
}

/// 基于 sysinfo 的进程存活探针
pub struct ProcessLiveness {
    pid: Pid,
    system: System,
}

impl ProcessLiveness {
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Pid::from_u32(pid),
            system: System::new(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_u32()
    }
}

impl LivenessProbe for ProcessLiveness {
    fn is_alive(&mut self) -> bool {
        // 只刷新这一个 PID；返回 0 表示 /proc 中已经没有它
        let updated = self
            .system
            .refresh_processes_specifics(ProcessesToUpdate::Some(&[self.pid]), ProcessRefreshKind::new());
        if updated == 0 {
            return false;
        }
        match self.system.process(self.pid) {
            // 僵尸进程已经退出，只是还没被回收
            Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
            None => false,
        }
    }
}

/// 总是存活的探针（没有监督进程约束时使用）
pub struct AlwaysAlive;

impl LivenessProbe for AlwaysAlive {
    fn is_alive(&mut self) -> bool {
        true
    }
}

/// 进程管理器
pub struct ProcessManager {
    system: System,
}

impl ProcessManager {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_all();
        Self { system }
    }

    /// 刷新系统信息
    pub fn refresh(&mut self) {
        self.system.refresh_all();
    }

    pub fn exists(&self, pid: u32) -> bool {
        self.system.process(Pid::from_u32(pid)).is_some()
    }

    /// 发送 SIGTERM，让 guard 有机会执行清理；返回信号是否送达
    pub fn terminate(&self, pid: u32) -> Result<bool> {
        let pid = Pid::from_u32(pid);
        let Some(process) = self.system.process(pid) else {
            debug!(pid = %pid, "Process already gone, nothing to terminate");
            return Ok(false);
        };
        match process.kill_with(Signal::Term) {
            Some(sent) => Ok(sent),
            None => {
                // 平台不支持 SIGTERM 时退化为 kill
                warn!(pid = %pid, "SIGTERM unsupported, killing process");
                Ok(process.kill())
            }
        }
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
