//! Runtime memory and CPU introspection

use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Source of process resource usage
pub trait SystemProbe: Send + Sync {
    /// Resident memory of the current process in bytes
    fn memory_usage_bytes(&self) -> u64;

    /// Global CPU usage in percent
    fn cpu_usage_percent(&self) -> f32;
}

/// `sysinfo` backed probe for the current process
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();

        Self {
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SysinfoProbe {
    fn memory_usage_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    fn cpu_usage_percent(&self) -> f32 {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.global_cpu_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_probe_reports_current_process() {
        let probe = SysinfoProbe::new();
        assert!(probe.memory_usage_bytes() > 0);
        assert!(probe.cpu_usage_percent() >= 0.0);
    }
}
