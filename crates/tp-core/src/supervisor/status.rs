//! Status lines and resource snapshots for periodic reporting.

use super::policy::ProcessState;
use serde::Serialize;
use tp_config::Role;

/// Render `role: STATE` entries joined with `" | "`.
pub fn status_line<'a>(states: impl IntoIterator<Item = (Role, &'a ProcessState)>) -> String {
    states
        .into_iter()
        .map(|(role, state)| format!("{}: {}", role, state.label()))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Host load and memory, from `/proc` on Linux.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemSnapshot {
    /// 1, 5 and 15 minute load averages; empty when unavailable.
    pub load_averages: Vec<f64>,
    pub memory_total_kb: u64,
    pub memory_available_kb: u64,
}

impl SystemSnapshot {
    pub fn collect() -> Self {
        let load_averages = std::fs::read_to_string("/proc/loadavg")
            .ok()
            .and_then(|content| parse_loadavg(&content))
            .unwrap_or_default();
        let (memory_total_kb, memory_available_kb) = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .map(|content| parse_meminfo(&content))
            .unwrap_or((0, 0));
        SystemSnapshot {
            load_averages,
            memory_total_kb,
            memory_available_kb,
        }
    }

    /// Percentage of memory in use, if known.
    pub fn memory_used_percent(&self) -> Option<f64> {
        if self.memory_total_kb == 0 {
            return None;
        }
        let used = self.memory_total_kb.saturating_sub(self.memory_available_kb);
        Some((used as f64 / self.memory_total_kb as f64 * 1000.0).round() / 10.0)
    }
}

fn parse_loadavg(content: &str) -> Option<Vec<f64>> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    parts[..3].iter().map(|p| p.parse::<f64>().ok()).collect()
}

fn parse_meminfo(content: &str) -> (u64, u64) {
    let mut total = 0;
    let mut available = 0;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = first_number(rest).unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = first_number(rest).unwrap_or(0);
        }
    }
    (total, available)
}

fn first_number(s: &str) -> Option<u64> {
    s.split_whitespace().next().and_then(|v| v.parse().ok())
}

/// Resident set size of a process in kB, from `/proc/<pid>/status`.
pub fn process_rss_kb(pid: u32) -> Option<u64> {
    let content = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    content
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(first_number)
}
