//! Scenario D: a hardware watchpoint observes a victim's repeated writes.
//!
//! Ignored by default: CI sandboxes commonly disable `ptrace` (seccomp, unprivileged
//! containers, or `yama/ptrace_scope`), and this test needs it twice over — once for
//! the supervisor's own attach and once for the watcher subprocess's per-thread
//! debug-register programming.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::Duration;

use vigil::watch::WatcherSession;
use vigil::watcher::AccessKind;
use vigil::Config;

#[test]
#[ignore]
fn watcher_reports_write_hit_and_cleans_up() {
    let watch_bin = env!("CARGO_BIN_EXE_vigil-watch");
    if let Some(dir) = std::path::Path::new(watch_bin).parent() {
        let path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{}", dir.display(), path));
    }

    let mut child = Command::new(env!("CARGO_BIN_EXE_vigil-test-fixture-writer"))
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn fixture writer");

    let stdout = child.stdout.take().unwrap();
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    reader.read_line(&mut line).expect("read fixture address line");
    let addr_hex = line.trim().strip_prefix("addr=0x").expect("fixture address line");
    let address = u64::from_str_radix(addr_hex, 16).expect("parse fixture address");

    let session = WatcherSession::start(child.id() as i32, address, AccessKind::Writes, 4)
        .expect("start watcher session");
    std::thread::sleep(Duration::from_millis(100));

    let config = Config::default();
    session.stop(&config).expect("stop watcher session");

    let snapshot = session.snapshot();
    assert!(
        snapshot.iter().any(|(_, hit)| hit.opcode.to_lowercase().contains("mov")),
        "expected at least one MOV-family hit, got {snapshot:?}"
    );

    let _ = child.kill();
    let _ = child.wait();
}
