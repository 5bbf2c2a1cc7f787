use once_cell::sync::Lazy;
use std::sync::Mutex;
use sysinfo::{ProcessStatus, ProcessesToUpdate, Signal};

pub struct Procs {
    system: Mutex<sysinfo::System>,
}

pub static PROCS: Lazy<Procs> = Lazy::new(Procs::new);

impl Default for Procs {
    fn default() -> Self {
        Self::new()
    }
}

impl Procs {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
        }
    }

    fn lock_system(&self) -> std::sync::MutexGuard<'_, sysinfo::System> {
        self.system.lock().unwrap_or_else(|poisoned| {
            warn!("System mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Zombies waiting to be reaped do not count as running.
    pub fn is_running(&self, pid: u32) -> bool {
        let pid = sysinfo::Pid::from_u32(pid);
        let mut system = self.lock_system();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    /// Every descendant of `pid`, at any depth.
    pub fn all_children(&self, pid: u32) -> Vec<u32> {
        let mut system = self.lock_system();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let root = sysinfo::Pid::from_u32(pid);
        let mut children = vec![];
        for (child_pid, process) in system.processes() {
            let mut process = process;
            while let Some(parent) = process.parent() {
                if parent == root {
                    children.push(child_pid.as_u32());
                    break;
                }
                match system.process(parent) {
                    Some(p) => process = p,
                    None => break,
                }
            }
        }
        children
    }

    /// SIGKILL each of `pids` still present in the last refresh.
    pub fn kill_all(&self, pids: &[u32]) {
        let system = self.lock_system();
        for pid in pids {
            if let Some(process) = system.process(sysinfo::Pid::from_u32(*pid)) {
                trace!("killing process {pid}");
                let _ = process.kill_with(Signal::Kill);
            }
        }
    }
}
