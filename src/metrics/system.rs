//! Process resource snapshot.
//!
//! Read fresh on every stats call; the ledgers never store history of it.

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemSnapshot {
    /// Resident memory of this process, bytes
    pub memory_bytes: u64,
    /// CPU usage of this process, percent of one core
    pub cpu_percent: f32,
}

/// Source of the current process snapshot.
pub trait SystemProbe: Send + Sync {
    fn sample(&self) -> SystemSnapshot;
}

/// Reads the current process through `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            tracing::warn!("cannot determine current pid, process snapshot will be empty");
        }
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SysinfoProbe {
    fn sample(&self) -> SystemSnapshot {
        let Some(pid) = self.pid else {
            return SystemSnapshot::default();
        };
        // CPU usage is a delta between two refreshes, so the System is kept
        // alive between calls; the first sample reports 0%.
        let mut sys = self.system.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid)
            .map(|p| SystemSnapshot {
                memory_bytes: p.memory(),
                cpu_percent: p.cpu_usage(),
            })
            .unwrap_or_default()
    }
}

/// Always reports the same snapshot.
#[cfg(test)]
pub struct FixedProbe(pub SystemSnapshot);

#[cfg(test)]
impl FixedProbe {
    pub fn idle() -> Self {
        Self(SystemSnapshot {
            memory_bytes: 64 * 1024 * 1024,
            cpu_percent: 1.0,
        })
    }

    pub fn with_memory_mb(mb: u64) -> Self {
        Self(SystemSnapshot {
            memory_bytes: mb * 1024 * 1024,
            cpu_percent: 1.0,
        })
    }
}

#[cfg(test)]
impl SystemProbe for FixedProbe {
    fn sample(&self) -> SystemSnapshot {
        self.0
    }
}
