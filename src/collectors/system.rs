use crate::collectors::{LoadAverage, ResourceSampler};
use sysinfo::{CpuExt, Pid, ProcessExt, System, SystemExt};
use tracing::{debug, warn};

/// `ResourceSampler` over long-lived `sysinfo::System`s.
///
/// Refreshing CPUs resets sysinfo's usage baseline, so per-core readings use
/// their own `System`. The global reading then always spans the interval
/// since the previous `cpu_usage_percent` call.
pub struct SysinfoSampler {
    system: System,
    cores: System,
    pid: Option<Pid>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        let mut cores = System::new();
        cores.refresh_cpu();
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                warn!(error = %err, "current process id unavailable");
                None
            }
        };
        Self { system, cores, pid }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn memory_used_bytes(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.used_memory()
    }

    fn cpu_usage_percent(&mut self) -> f64 {
        self.system.refresh_cpu();
        self.system.global_cpu_info().cpu_usage() as f64
    }

    fn per_core_usage_percent(&mut self) -> Vec<f64> {
        self.cores.refresh_cpu();
        self.cores
            .cpus()
            .iter()
            .map(|c| c.cpu_usage() as f64)
            .collect()
    }

    fn load_average(&mut self) -> Option<LoadAverage> {
        // sysinfo reports zeros on Windows rather than failing.
        if cfg!(target_os = "windows") {
            return None;
        }
        let load = self.system.load_average();
        Some(LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        })
    }

    fn process_resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        if !self.system.refresh_process(pid) {
            debug!(pid = %pid, "own process not found on refresh");
            return None;
        }
        self.system.process(pid).map(|p| p.memory())
    }

    fn logical_cores(&mut self) -> Option<usize> {
        let count = self.system.cpus().len();
        (count > 0).then_some(count)
    }

    fn physical_cores(&mut self) -> Option<usize> {
        self.system.physical_core_count()
    }

    fn current_frequency_mhz(&mut self) -> Option<f64> {
        let freqs: Vec<u64> = self
            .system
            .cpus()
            .iter()
            .map(|c| c.frequency())
            .filter(|f| *f > 0)
            .collect();
        if freqs.is_empty() {
            return None;
        }
        Some(freqs.iter().sum::<u64>() as f64 / freqs.len() as f64)
    }
}
