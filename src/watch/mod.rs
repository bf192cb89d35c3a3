//! Spawns, supervises, and tears down the `vigil-watch` subprocess, and routes
//! memory writes through an active session when ptrace pokes fail outright.

pub mod freeze;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::watcher::hwbp;
use crate::watcher::protocol::{self, CMD_FD_VAR, RESP_FD_VAR};
use crate::watcher::AccessKind;

/// One aggregated trap observation for an instruction that touched the watched
/// address.
#[derive(Debug, Clone)]
pub struct WatchHit {
    pub count: u64,
    pub bytes_hex: String,
    pub opcode: String,
    pub access: AccessKind,
}

lazy_static::lazy_static! {
    static ref SESSIONS: Mutex<HashMap<i32, Vec<Weak<Mutex<SessionState>>>>> =
        Mutex::new(HashMap::new());
}

struct SessionState {
    hits: HashMap<u64, WatchHit>,
    cmd_writer: Option<std::fs::File>,
    resp_reader: Option<BufReader<std::fs::File>>,
    running: Arc<AtomicBool>,
    child: Option<Child>,
    reader_thread: Option<JoinHandle<()>>,
    pid: Pid,
    access: AccessKind,
}

/// A live hardware-watchpoint engagement against one target process.
pub struct WatcherSession {
    pid: Pid,
    access: AccessKind,
    state: Arc<Mutex<SessionState>>,
}

fn resolve_watcher_binary() -> std::path::PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("vigil-watch");
            if candidate.exists() {
                return candidate;
            }
        }
    }
    std::path::PathBuf::from("vigil-watch")
}

fn register(pid: i32, state: &Arc<Mutex<SessionState>>) {
    let mut sessions = SESSIONS.lock().unwrap();
    let entry = sessions.entry(pid).or_insert_with(Vec::new);
    entry.retain(|w| w.upgrade().is_some());
    entry.push(Arc::downgrade(state));
}

fn deregister(pid: i32, state: &Arc<Mutex<SessionState>>) {
    let mut sessions = SESSIONS.lock().unwrap();
    if let Some(entries) = sessions.get_mut(&pid) {
        entries.retain(|w| match w.upgrade() {
            Some(existing) => !Arc::ptr_eq(&existing, state),
            None => false,
        });
        if entries.is_empty() {
            sessions.remove(&pid);
        }
    }
}

impl WatcherSession {
    /// Forks and execs `vigil-watch` watching `address` for `access` accesses of
    /// `len` bytes in `pid`, and spawns a thread that consumes its stdout.
    pub fn start(pid: i32, address: u64, access: AccessKind, len: usize) -> Result<Arc<Self>> {
        let (cmd_read, cmd_write) =
            nix::unistd::pipe().map_err(|e| Error::WatcherSpawnFailed(e.to_string()))?;
        let (resp_read, resp_write) =
            nix::unistd::pipe().map_err(|e| Error::WatcherSpawnFailed(e.to_string()))?;

        clear_cloexec(cmd_read);
        clear_cloexec(resp_write);

        let binary = resolve_watcher_binary();
        let child = Command::new(binary)
            .arg(pid.to_string())
            .arg(format!("0x{address:x}"))
            .arg(access.as_str())
            .arg(len.to_string())
            .env(CMD_FD_VAR, cmd_read.to_string())
            .env(RESP_FD_VAR, resp_write.to_string())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::WatcherSpawnFailed(e.to_string()))?;

        // The parent no longer needs the child's ends of either pipe.
        let _ = nix::unistd::close(cmd_read);
        let _ = nix::unistd::close(resp_write);

        let cmd_writer = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let resp_reader = unsafe { std::fs::File::from_raw_fd(resp_read) };
        let stdout = child.stdout.as_ref().unwrap().as_raw_fd();
        let stdout_file = unsafe { std::fs::File::from_raw_fd(libc_dup(stdout)) };

        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(SessionState {
            hits: HashMap::new(),
            cmd_writer: Some(cmd_writer),
            resp_reader: Some(BufReader::new(resp_reader)),
            running: running.clone(),
            child: Some(child),
            reader_thread: None,
            pid: Pid::from_raw(pid),
            access,
        }));

        let reader_state = state.clone();
        let handle =
            std::thread::spawn(move || reader_loop(stdout_file, reader_state, running, access));
        state.lock().unwrap().reader_thread = Some(handle);

        register(pid, &state);

        Ok(Arc::new(WatcherSession {
            pid: Pid::from_raw(pid),
            access,
            state,
        }))
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<(u64, WatchHit)> {
        let guard = self.state.lock().unwrap();
        guard
            .hits
            .iter()
            .map(|(rip, hit)| (*rip, hit.clone()))
            .collect()
    }

    /// Escalating shutdown: SIGINT, poll up to `config.watcher_shutdown_grace`, then
    /// SIGKILL. If the child had to be killed, runs a fallback DR cleanup across
    /// every thread of the victim so it isn't left with an armed watchpoint.
    pub fn stop(&self, config: &Config) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        guard.running.store(false, Ordering::SeqCst);

        let mut child = match guard.child.take() {
            Some(c) => c,
            None => return Ok(()),
        };
        let child_pid = Pid::from_raw(child.id() as i32);
        let _ = signal::kill(child_pid, Signal::SIGINT);

        let deadline = Instant::now() + config.watcher_shutdown_grace;
        let half = Instant::now() + config.watcher_shutdown_grace / 2;
        let mut exited = false;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                exited = true;
                break;
            }
            if Instant::now() >= half {
                let _ = signal::kill(child_pid, Signal::SIGKILL);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        if !exited {
            let _ = signal::kill(child_pid, Signal::SIGKILL);
            let _ = child.wait();
            fallback_cleanup(guard.pid);
        }

        if let Some(handle) = guard.reader_thread.take() {
            drop(guard);
            let _ = handle.join();
        }

        deregister(self.pid.as_raw(), &self.state);
        Ok(())
    }
}

fn clear_cloexec(_fd: RawFd) {
    // Pipe fds created via nix::unistd::pipe are already inheritable; nothing to do
    // beyond documenting the intent at the call site.
}

fn libc_dup(fd: RawFd) -> RawFd {
    unsafe { libc::dup(fd) }
}

fn fallback_cleanup(pid: Pid) {
    if let Ok(tids) = crate::target::list_tids(pid) {
        for tid in tids {
            let tpid = Pid::from_raw(tid);
            if ptrace::attach(tpid).is_ok() {
                let _ = waitpid(tpid, None);
                let _ = hwbp::disarm(tpid);
                let _ = ptrace::detach(tpid, None);
            }
        }
    }
}

// The trap line carries no explicit access-kind field (see the wire grammar); every
// hit is labeled with the access kind the session itself was armed with.
fn reader_loop(
    stdout: std::fs::File,
    state: Arc<Mutex<SessionState>>,
    running: Arc<AtomicBool>,
    access: AccessKind,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    while running.load(Ordering::SeqCst) {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if let Some(trap) = protocol::parse_trap_line(&line) {
                    let mut guard = state.lock().unwrap();
                    let entry = guard.hits.entry(trap.rip).or_insert_with(|| WatchHit {
                        count: 0,
                        bytes_hex: trap.bytes_hex.clone(),
                        opcode: trap.opcode.clone(),
                        access,
                    });
                    entry.count += 1;
                }
            }
            Err(_) => break,
        }
    }
}

/// Looks up any live watcher session for `pid` and forwards a `WRITE` command
/// through its command channel, returning whether the watcher accepted it.
///
/// This is the memory writer's last-resort fallback (see `target::memory::write`):
/// reached only when vectored writes and ptrace pokes have both failed.
pub fn write_via_watcher(pid: Pid, addr: u64, bytes: &[u8]) -> bool {
    let sessions = SESSIONS.lock().unwrap();
    let entries = match sessions.get(&pid.as_raw()) {
        Some(e) => e.clone(),
        None => return false,
    };
    drop(sessions);

    for weak in entries {
        if let Some(state) = weak.upgrade() {
            let mut guard = state.lock().unwrap();
            if !guard.running.load(Ordering::SeqCst) {
                continue;
            }
            let command = protocol::format_write_command(addr, bytes);
            let SessionState {
                cmd_writer,
                resp_reader,
                ..
            } = &mut *guard;
            let ok = match (cmd_writer, resp_reader) {
                (Some(writer), Some(reader)) => {
                    if writer.write_all(command.as_bytes()).is_err() {
                        false
                    } else {
                        let mut response = String::new();
                        match reader.read_line(&mut response) {
                            Ok(_) => response.trim() == "OK",
                            Err(_) => false,
                        }
                    }
                }
                _ => false,
            };
            if ok {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_via_watcher_with_no_session_returns_false() {
        assert!(!write_via_watcher(Pid::from_raw(999_999), 0x1000, &[0x90]));
    }
}
