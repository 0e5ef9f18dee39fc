//! Solver process liveness.
//!
//! Finds the running solver by executable name and reports its uptime,
//! resident memory and CPU time.
//!
//! - **Linux**: scans `/proc/<pid>/{stat,status,cmdline}` via `std::fs`
//! - **macOS**: uses `pgrep` and `ps` output (safe, no FFI)
//! - **Other**: always `None`

use serde::{Deserialize, Serialize};

/// Clock ticks per second assumed when converting `/proc` CPU counters.
pub const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Liveness and resource usage of the solver process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub pid: u32,
    /// Seconds since the process started.
    pub uptime_secs: f64,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    pub cpu_user_secs: f64,
    pub cpu_system_secs: f64,
}

impl ProcessStats {
    /// Total CPU seconds divided by wall-clock uptime.
    #[must_use]
    pub fn cpu_utilization(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            (self.cpu_user_secs + self.cpu_system_secs) / self.uptime_secs
        } else {
            0.0
        }
    }
}

/// Locate the solver process by name. `None` when it is not running or the
/// platform is unsupported.
pub fn find_solver_process(name: &str) -> Option<ProcessStats> {
    let stats = platform::find(name);
    match &stats {
        Some(found) => tracing::trace!(pid = found.pid, name, "Solver process found"),
        None => tracing::debug!(name, "Solver process not found"),
    }
    stats
}

// =============================================================================
// Parsing helpers (platform independent)
// =============================================================================

/// Fields of interest from `/proc/<pid>/stat`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
#[derive(Debug, Clone, PartialEq, Eq)]
struct StatFields {
    comm: String,
    utime_ticks: u64,
    stime_ticks: u64,
    start_ticks: u64,
}

/// Parse `/proc/<pid>/stat`: `pid (comm) state ppid ...`.
///
/// `comm` may contain spaces and parens, so split at the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat(stat: &str) -> Option<StatFields> {
    let name_start = stat.find('(')?;
    let name_end = stat.rfind(')')?;
    let comm = stat.get(name_start + 1..name_end)?.to_string();
    let fields: Vec<&str> = stat.get(name_end + 1..)?.split_whitespace().collect();
    // fields[0] is field 3 (state) in proc(5) numbering.
    let field = |n: usize| fields.get(n - 3).and_then(|v| v.parse::<u64>().ok());
    Some(StatFields {
        comm,
        utime_ticks: field(14)?,
        stime_ticks: field(15)?,
        start_ticks: field(22)?,
    })
}

/// `VmRSS` from `/proc/<pid>/status`, in bytes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss_bytes(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// First field of `/proc/uptime`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_system_uptime(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Basename of argv[0] from a NUL-separated cmdline.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn argv0_basename(cmdline: &str) -> Option<&str> {
    let argv0 = cmdline.split('\0').next().filter(|s| !s.is_empty())?;
    argv0.rsplit('/').next()
}

/// Parse `ps` durations: `[[dd-]hh:]mm:ss[.frac]`.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_clock_duration(text: &str) -> Option<f64> {
    let text = text.trim();
    let (days, clock) = match text.split_once('-') {
        Some((days, rest)) => (days.parse::<f64>().ok()?, rest),
        None => (0.0, text),
    };
    let mut total = 0.0;
    for part in clock.split(':') {
        total = total * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(days.mul_add(86_400.0, total))
}

// =============================================================================
// Linux: /proc filesystem
// =============================================================================

#[cfg(target_os = "linux")]
mod platform {
    use super::{
        CLOCK_TICKS_PER_SEC, ProcessStats, argv0_basename, parse_stat, parse_system_uptime,
        parse_vm_rss_bytes,
    };

    pub(super) fn find(name: &str) -> Option<ProcessStats> {
        let system_uptime =
            parse_system_uptime(&std::fs::read_to_string("/proc/uptime").ok()?)?;
        let own_pid = std::process::id();

        let mut pids: Vec<u32> = std::fs::read_dir("/proc")
            .ok()?
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| *pid != own_pid)
            .collect();
        pids.sort_unstable();

        pids.into_iter()
            .find_map(|pid| read_if_named(pid, name, system_uptime))
    }

    fn read_if_named(pid: u32, name: &str, system_uptime: f64) -> Option<ProcessStats> {
        let stat = parse_stat(&std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?)?;
        let cmdline = std::fs::read_to_string(format!("/proc/{pid}/cmdline")).unwrap_or_default();
        if stat.comm != name && argv0_basename(&cmdline) != Some(name) {
            return None;
        }

        let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
        let started = stat.start_ticks as f64 / CLOCK_TICKS_PER_SEC;
        Some(ProcessStats {
            pid,
            uptime_secs: (system_uptime - started).max(0.0),
            rss_bytes: parse_vm_rss_bytes(&status).unwrap_or(0),
            cpu_user_secs: stat.utime_ticks as f64 / CLOCK_TICKS_PER_SEC,
            cpu_system_secs: stat.stime_ticks as f64 / CLOCK_TICKS_PER_SEC,
        })
    }
}

// =============================================================================
// macOS: pgrep/ps (safe, no FFI)
// =============================================================================

#[cfg(target_os = "macos")]
mod platform {
    use super::{ProcessStats, parse_clock_duration};

    pub(super) fn find(name: &str) -> Option<ProcessStats> {
        let output = std::process::Command::new("pgrep")
            .args(["-x", name])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let pid = String::from_utf8(output.stdout)
            .ok()?
            .lines()
            .find_map(|line| line.trim().parse::<u32>().ok())?;

        // etime: wall clock, utime: user CPU, time: user + system CPU.
        let output = std::process::Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "etime=,rss=,utime=,time="])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let line = String::from_utf8(output.stdout).ok()?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [etime, rss_kb, utime, time] = fields.as_slice() else {
            return None;
        };

        let cpu_user_secs = parse_clock_duration(utime)?;
        let cpu_total = parse_clock_duration(time)?;
        Some(ProcessStats {
            pid,
            uptime_secs: parse_clock_duration(etime)?,
            rss_bytes: rss_kb.parse::<u64>().unwrap_or(0) * 1024,
            cpu_user_secs,
            cpu_system_secs: (cpu_total - cpu_user_secs).max(0.0),
        })
    }
}

// =============================================================================
// Other platforms: stub
// =============================================================================

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
    use super::ProcessStats;

    pub(super) fn find(_name: &str) -> Option<ProcessStats> {
        None
    }
}
