//! Process and host statistics sampling
//!
//! [`Collector`] runs on every poll tick and reports the agent process
//! itself plus `RandomValue` and the running `PollCount`. [`HostSampler`]
//! runs on the report tick and reports machine-wide memory and per-core
//! CPU load. Statistics the platform cannot provide are reported as zero.

use std::collections::BTreeMap;
use sysinfo::{Pid, System};
use tally_core::Metric;
use tracing::debug;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

/// Gauges and counters from one sampling pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub gauges: BTreeMap<String, f64>,
    pub counters: BTreeMap<String, i64>,
}

impl Sample {
    fn gauge(&mut self, id: &str, value: f64) {
        self.gauges.insert(id.to_string(), value);
    }

    /// Gauges first, then counters
    pub fn into_metrics(self) -> Vec<Metric> {
        let gauges = self.gauges.into_iter().map(|(id, v)| Metric::gauge(id, v));
        let counters = self.counters.into_iter().map(|(id, d)| Metric::counter(id, d));
        gauges.chain(counters).collect()
    }
}

/// Samples the agent's own process
pub struct Collector {
    system: System,
    pid: Option<Pid>,
    poll_count: i64,
}

impl Collector {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| debug!("Process statistics unavailable: {}", e))
            .ok();
        Self {
            system: System::new(),
            pid,
            poll_count: 0,
        }
    }

    /// Number of completed `collect` calls
    pub fn poll_count(&self) -> i64 {
        self.poll_count
    }

    pub fn collect(&mut self) -> Sample {
        let mut sample = Sample::default();

        let process = self
            .pid
            .filter(|pid| self.system.refresh_process(*pid))
            .and_then(|pid| self.system.process(pid));

        let (resident, virt, cpu, run_time, read, written) = match process {
            Some(p) => {
                let disk = p.disk_usage();
                (
                    p.memory() as f64,
                    p.virtual_memory() as f64,
                    p.cpu_usage() as f64,
                    p.run_time() as f64,
                    disk.total_read_bytes as f64,
                    disk.total_written_bytes as f64,
                )
            }
            None => (0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
        };

        sample.gauge("ResidentMemory", resident);
        sample.gauge("VirtualMemory", virt);
        sample.gauge("ProcessCPU", cpu);
        sample.gauge("RunTime", run_time);
        sample.gauge("DiskReadBytes", read);
        sample.gauge("DiskWrittenBytes", written);
        sample.gauge(RANDOM_VALUE, rand::random::<f64>());

        self.poll_count += 1;
        sample.counters.insert(POLL_COUNT.to_string(), self.poll_count);

        sample
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples machine-wide memory and CPU utilization
///
/// CPU load is measured between consecutive calls, so the first sample
/// reports zero for every core.
pub struct HostSampler {
    system: System,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system }
    }

    pub fn sample(&mut self) -> Sample {
        self.system.refresh_memory();
        self.system.refresh_cpu();

        let mut sample = Sample::default();
        sample.gauge("TotalMemory", self.system.total_memory() as f64);
        sample.gauge("FreeMemory", self.system.free_memory() as f64);
        for (idx, cpu) in self.system.cpus().iter().enumerate() {
            sample.gauge(&format!("CPUutilization{}", idx + 1), cpu.cpu_usage() as f64);
        }
        sample
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}
