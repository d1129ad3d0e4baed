//! procfs reaper against real processes.

#![cfg(target_os = "linux")]

use std::os::unix::process::ExitStatusExt;
use std::time::Duration;

use tokio::process::Command;

use pd_bench::server::{Reaper, SystemReaper};

#[tokio::test]
async fn test_reaps_by_command_line_pattern() {
    // An unusual duration doubles as a unique command-line marker.
    let mut child = Command::new("sleep")
        .arg("4321.125")
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let pid = child.id().unwrap();

    let report = SystemReaper
        .reap(&["4321.125".to_string()], &[], Duration::from_millis(200))
        .await;

    assert!(report.killed.contains(&pid), "{report:?}");
    assert!(report.is_clean(), "{report:?}");

    let status = child.wait().await.unwrap();
    assert_eq!(status.signal(), Some(9));
}

#[tokio::test]
async fn test_reaping_nothing_twice_is_clean() {
    let patterns = vec!["pd-bench-no-such-process-7f3a".to_string()];
    let free_port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let first = SystemReaper
        .reap(&patterns, &[free_port], Duration::from_millis(10))
        .await;
    let second = SystemReaper
        .reap(&patterns, &[free_port], Duration::from_millis(10))
        .await;

    assert!(first.killed.is_empty());
    assert!(first.is_clean());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_own_listener_is_spared() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let report = SystemReaper.reap(&[], &[port], Duration::from_millis(10)).await;

    assert!(report.killed.is_empty());
    assert!(!report.killed.contains(&std::process::id()));
}

#[tokio::test]
async fn test_unreaped_child_does_not_linger() {
    // std children are never waited on implicitly, so once killed this one
    // stays a zombie until the explicit wait below.
    let mut child = std::process::Command::new("sleep")
        .arg("4322.25")
        .spawn()
        .unwrap();
    let pid = child.id();
    let patterns = vec!["4322.25".to_string()];

    let first = SystemReaper
        .reap(&patterns, &[], Duration::from_millis(300))
        .await;
    assert!(first.killed.contains(&pid), "{first:?}");
    assert!(first.is_clean(), "{first:?}");

    let second = SystemReaper
        .reap(&patterns, &[], Duration::from_millis(10))
        .await;
    assert!(!second.killed.contains(&pid), "{second:?}");
    assert!(second.is_clean(), "{second:?}");

    let status = child.wait().unwrap();
    assert_eq!(status.signal(), Some(9));
}
