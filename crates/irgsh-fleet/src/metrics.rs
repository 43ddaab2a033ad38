//! Host metrics reported in worker heartbeats.

use std::path::Path;
use std::time::Duration;

const PROC_STAT: &str = "/proc/stat";
const PROC_MEMINFO: &str = "/proc/meminfo";

/// Point-in-time resource usage of the host.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostMetrics {
    /// Percentage, 0 to 100.
    pub cpu_usage: f64,
    pub memory_usage: u64,
    pub memory_total: u64,
    pub disk_usage: u64,
    pub disk_total: u64,
}

/// Aggregate CPU jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
}

impl CpuTimes {
    pub fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(5)
            .map(|f| f.parse().unwrap_or(0))
            .collect();
        match fields[..] {
            [user, nice, system, idle, iowait] => Some(Self {
                user,
                nice,
                system,
                idle,
                iowait,
            }),
            _ => None,
        }
    }

    fn busy(&self) -> u64 {
        self.user + self.nice + self.system
    }

    fn total(&self) -> u64 {
        self.busy() + self.idle + self.iowait
    }

    /// Busy percentage between an earlier sample and this one.
    pub fn usage_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total().saturating_sub(earlier.total());
        if total == 0 {
            return 0.0;
        }
        let busy = self.busy().saturating_sub(earlier.busy());
        busy as f64 / total as f64 * 100.0
    }
}

/// CPU usage is a delta, so the sampler keeps the previous reading.
/// The first sample always reads 0.
#[derive(Debug, Default)]
pub struct CpuSampler {
    last: Option<CpuTimes>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self) -> f64 {
        let Some(current) = std::fs::read_to_string(PROC_STAT)
            .ok()
            .and_then(|s| CpuTimes::parse(&s))
        else {
            return 0.0;
        };
        let usage = self
            .last
            .map(|last| current.usage_since(&last))
            .unwrap_or(0.0);
        self.last = Some(current);
        usage
    }
}

/// `(used, total)` bytes from `/proc/meminfo` contents.
pub fn parse_meminfo(meminfo: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in meminfo.lines() {
        let mut fields = line.split_whitespace();
        let slot = match fields.next() {
            Some("MemTotal:") => &mut total,
            Some("MemAvailable:") => &mut available,
            _ => continue,
        };
        *slot = fields.next().and_then(|v| v.parse::<u64>().ok()).map(|kb| kb * 1024);
    }
    match (total, available) {
        (Some(total), Some(available)) if total > 0 => Some((total.saturating_sub(available), total)),
        _ => None,
    }
}

pub fn memory_usage() -> (u64, u64) {
    std::fs::read_to_string(PROC_MEMINFO)
        .ok()
        .and_then(|s| parse_meminfo(&s))
        .unwrap_or((0, 0))
}

/// `(used, total)` bytes of the filesystem holding `path`.
pub fn disk_usage(path: &Path) -> (u64, u64) {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => {
            let fragment = stat.fragment_size() as u64;
            let total = stat.blocks() as u64 * fragment;
            let free = stat.blocks_free() as u64 * fragment;
            (total.saturating_sub(free), total)
        }
        Err(_) => (0, 0),
    }
}

/// Gather every metric; `workdir` selects the filesystem for disk usage.
pub fn collect(sampler: &mut CpuSampler, workdir: &Path) -> HostMetrics {
    let (memory_usage, memory_total) = memory_usage();
    let (disk_usage, disk_total) = disk_usage(workdir);
    HostMetrics {
        cpu_usage: sampler.sample(),
        memory_usage,
        memory_total,
        disk_usage,
        disk_total,
    }
}

/// Binary-prefixed size, e.g. `1.5 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, PREFIXES[exp])
}

/// Coarse two-unit duration, e.g. `3h 12m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s if s < 86400 => format!("{}h {}m", s / 3600, (s / 60) % 60),
        s => format!("{}d {}h", s / 86400, (s / 3600) % 24),
    }
}
