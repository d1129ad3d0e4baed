//! Host-wide process and port cleanup.
//!
//! Owned child handles cover processes this run spawned, but engines fork
//! workers and earlier runs may have left servers behind. The reaper scans
//! procfs for processes whose name or command line matches a pattern and for
//! processes holding a listening socket on a known port, kills them, waits,
//! and re-scans to confirm release.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::OrchestratorError;

/// TCP state code for LISTEN in `/proc/net/tcp`.
const TCP_LISTEN: &str = "0A";

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Pids that were signalled.
    pub killed: Vec<u32>,

    /// Pids still matching after the settle delay.
    pub lingering_pids: Vec<u32>,

    /// Ports still held after the settle delay.
    pub lingering_ports: Vec<u16>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.lingering_pids.is_empty() && self.lingering_ports.is_empty()
    }

    /// The cleanup failure this report represents, if any.
    pub fn failure(&self) -> Option<OrchestratorError> {
        if self.is_clean() {
            return None;
        }
        Some(OrchestratorError::CleanupFailure(format!(
            "pids {:?}, ports {:?}",
            self.lingering_pids, self.lingering_ports
        )))
    }
}

#[async_trait]
pub trait Reaper: Send + Sync {
    /// Kill everything matching `patterns` or listening on `ports`.
    async fn reap(&self, patterns: &[String], ports: &[u16], settle: Duration) -> CleanupReport;
}

/// procfs-backed reaper for Linux hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemReaper;

/// Processes found by a scan, with the ports they were holding.
#[derive(Debug, Default)]
struct Scan {
    by_pattern: BTreeSet<u32>,
    by_port: BTreeMap<u32, u16>,
}

impl Scan {
    fn pids(&self) -> BTreeSet<u32> {
        self.by_pattern
            .iter()
            .chain(self.by_port.keys())
            .copied()
            .collect()
    }

    fn ports(&self) -> BTreeSet<u16> {
        self.by_port.values().copied().collect()
    }
}

#[async_trait]
impl Reaper for SystemReaper {
    async fn reap(&self, patterns: &[String], ports: &[u16], settle: Duration) -> CleanupReport {
        let scan = scan_blocking(patterns, ports).await;
        let targets = scan.pids();

        let mut killed = Vec::new();
        for pid in &targets {
            match kill(Pid::from_raw(*pid as i32), Signal::SIGKILL) {
                Ok(()) => killed.push(*pid),
                Err(Errno::ESRCH) => debug!(pid, "Process already gone"),
                Err(e) => warn!(pid, error = %e, "Failed to signal process"),
            }
        }
        if !killed.is_empty() {
            info!(count = killed.len(), pids = ?killed, ports = ?scan.ports(), "Killed leftover processes");
        }

        tokio::time::sleep(settle).await;

        let after = scan_blocking(patterns, ports).await;
        let report = CleanupReport {
            killed,
            lingering_pids: after.pids().into_iter().collect(),
            lingering_ports: after.ports().into_iter().collect(),
        };
        if !report.is_clean() {
            error!(
                pids = ?report.lingering_pids,
                ports = ?report.lingering_ports,
                "Processes or ports survived cleanup"
            );
        }
        report
    }
}

async fn scan_blocking(patterns: &[String], ports: &[u16]) -> Scan {
    let patterns = patterns.to_vec();
    let ports = ports.to_vec();
    match tokio::task::spawn_blocking(move || scan(&patterns, &ports)).await {
        Ok(scan) => scan,
        Err(e) => {
            warn!(error = %e, "procfs scan panicked");
            Scan::default()
        }
    }
}

fn scan(patterns: &[String], ports: &[u16]) -> Scan {
    let own = std::process::id();
    let pids: Vec<u32> = list_pids()
        .into_iter()
        .filter(|p| *p != own && !is_defunct(*p))
        .collect();

    let by_pattern = pids
        .iter()
        .copied()
        .filter(|pid| process_matches(*pid, patterns))
        .collect();

    let mut inodes = HashMap::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(contents) = fs::read_to_string(table) {
            inodes.extend(parse_listeners(&contents, ports));
        }
    }
    let by_port = if inodes.is_empty() {
        BTreeMap::new()
    } else {
        socket_owners(&pids, &inodes)
    };

    Scan {
        by_pattern,
        by_port,
    }
}

fn list_pids() -> Vec<u32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        warn!("/proc not readable, skipping process scan");
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str()?.parse().ok())
        .collect()
}

/// Zombies and dead tasks hold no resources and cannot be killed again;
/// only their parent can clear them.
fn is_defunct(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| stat_state(&stat))
        .is_some_and(|state| matches!(state, 'Z' | 'X'))
}

/// State letter of a `/proc/<pid>/stat` line. The command name in field two
/// may itself contain spaces and parentheses, so parse after the last `)`.
fn stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

fn process_matches(pid: u32, patterns: &[String]) -> bool {
    let comm = fs::read_to_string(format!("/proc/{pid}/comm")).unwrap_or_default();
    let cmdline = fs::read(format!("/proc/{pid}/cmdline"))
        .map(|raw| render_cmdline(&raw))
        .unwrap_or_default();
    matches_any(comm.trim(), &cmdline, patterns)
}

/// `/proc/<pid>/cmdline` separates arguments with NULs.
fn render_cmdline(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .split('\0')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn matches_any(comm: &str, cmdline: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| comm.contains(p.as_str()) || cmdline.contains(p.as_str()))
}

/// Map socket inode -> port for LISTEN sockets on any of `ports`.
fn parse_listeners(contents: &str, ports: &[u16]) -> HashMap<u64, u16> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let port = u16::from_str_radix(fields[1].rsplit(':').next()?, 16).ok()?;
            if !ports.contains(&port) {
                return None;
            }
            let inode = fields[9].parse().ok()?;
            Some((inode, port))
        })
        .collect()
}

fn socket_owners(pids: &[u32], inodes: &HashMap<u64, u16>) -> BTreeMap<u32, u16> {
    let mut owners = BTreeMap::new();
    for pid in pids {
        let Ok(fds) = fs::read_dir(format!("/proc/{pid}/fd")) else {
            continue;
        };
        for fd in fds.filter_map(|e| e.ok()) {
            let Ok(target) = fs::read_link(fd.path()) else {
                continue;
            };
            if let Some(port) = socket_inode(&target.to_string_lossy()).and_then(|i| inodes.get(&i)) {
                owners.insert(*pid, *port);
                break;
            }
        }
    }
    owners
}

/// Parse `socket:[12345]`.
fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:1F40 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 4242 1 0000000000000000 100 0 0 10 0
   1: 0100007F:2008 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 4343 1 0000000000000000 100 0 0 10 0
   2: 0100007F:1FA4 0100007F:9C40 01 00000000:00000000 00:00000000 00000000  1000        0 4444 1 0000000000000000 100 0 0 10 0
   3: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 4545 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn test_parse_listeners() {
        let listeners = parse_listeners(TCP, &[8000, 8100, 8200]);
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[&4242], 8000);
        assert_eq!(listeners[&4343], 8200);
    }

    #[test]
    fn test_established_socket_ignored() {
        // 0x1FA4 = 8100, but state 01 (ESTABLISHED).
        let listeners = parse_listeners(TCP, &[8100]);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_socket_inode() {
        assert_eq!(socket_inode("socket:[4242]"), Some(4242));
        assert_eq!(socket_inode("pipe:[4242]"), None);
        assert_eq!(socket_inode("/dev/null"), None);
    }

    #[test]
    fn test_pattern_matching() {
        let patterns = vec!["pt_main_thread".to_string(), "vllm.entrypoints".to_string()];
        assert!(matches_any("pt_main_thread", "python3 worker.py", &patterns));
        assert!(matches_any(
            "python3",
            "python3 -m vllm.entrypoints.openai.api_server --port 8100",
            &patterns
        ));
        assert!(!matches_any("bash", "bash -l", &patterns));
        assert!(!matches_any("bash", "bash", &["".to_string()]));
    }

    #[test]
    fn test_stat_state() {
        assert_eq!(stat_state("4242 (sleep) S 1 4242 4242 0 -1"), Some('S'));
        assert_eq!(stat_state("4243 (pt_main_thread) Z 1 4243 4243 0 -1"), Some('Z'));
        assert_eq!(stat_state("4244 (a) b) (c) R 1 4244"), Some('R'));
        assert_eq!(stat_state("garbage"), None);
    }

    #[test]
    fn test_render_cmdline() {
        assert_eq!(render_cmdline(b"python3\0-m\0vllm\0"), "python3 -m vllm");
    }

    #[test]
    fn test_report_failure() {
        let clean = CleanupReport::default();
        assert!(clean.failure().is_none());

        let dirty = CleanupReport {
            lingering_ports: vec![8000],
            ..Default::default()
        };
        assert!(matches!(dirty.failure(), Some(OrchestratorError::CleanupFailure(_))));
    }
}
