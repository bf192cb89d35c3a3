//! Standalone hardware-watchpoint subprocess.
//!
//! Runs as its own process, separate from the embedding application, because
//! arming per-thread debug registers requires a standing ptrace attachment to
//! every thread of the victim for the life of the watch — exactly the kind of
//! persistent stop the rest of this crate avoids holding. Isolating it here means
//! a crashed or killed watch session never drags down the caller's own process.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::io::FromRawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use vigil::disasm::{Disassembler, IcedDisassembler};
use vigil::watcher::hwbp::{self, AccessKind};
use vigil::watcher::protocol::{self, CMD_FD_VAR, RESP_FD_VAR};

#[derive(Parser, Debug)]
#[command(name = "vigil-watch", about = "Hardware watchpoint subprocess for vigil")]
struct Args {
    pid: i32,
    /// Hex (`0x...`) or decimal address to watch.
    address: String,
    /// "write" or "access".
    mode: String,
    /// Watch length in bytes: 1, 2, 4, or 8.
    #[arg(default_value_t = 4)]
    len: usize,
}

fn parse_address(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u64>().ok()
    }
}

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_signal(_: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

struct Armed {
    tids: HashSet<i32>,
}

fn install_signal_handlers() {
    unsafe {
        let handler = signal::SigHandler::Handler(on_signal);
        let action = signal::SigAction::new(handler, signal::SaFlags::empty(), signal::SigSet::empty());
        let _ = signal::sigaction(Signal::SIGINT, &action);
        let _ = signal::sigaction(Signal::SIGTERM, &action);
    }
}

fn attach_and_wait(tid: i32) -> bool {
    let pid = Pid::from_raw(tid);
    match ptrace::attach(pid) {
        Ok(()) => {}
        Err(nix::Error::EPERM) => {
            // Already attached (e.g. the main thread we stopped at startup).
        }
        Err(_) => return false,
    }
    matches!(waitpid(pid, None), Ok(_))
}

fn arm_thread(tid: i32, address: u64, kind: AccessKind, len: usize) -> bool {
    let pid = Pid::from_raw(tid);
    if hwbp::arm(pid, address, kind, len).is_err() {
        return false;
    }
    ptrace::cont(pid, None::<Signal>).is_ok()
}

fn refresh_threads(armed: &mut Armed, main_pid: i32, address: u64, kind: AccessKind, len: usize) {
    if let Ok(tids) = vigil::target::list_tids(Pid::from_raw(main_pid)) {
        for tid in tids {
            if armed.tids.contains(&tid) {
                continue;
            }
            let attached = if tid == main_pid {
                true
            } else {
                attach_and_wait(tid) && ptrace::interrupt(Pid::from_raw(tid)).is_ok() && waitpid(Pid::from_raw(tid), None).is_ok()
            };
            if attached && arm_thread(tid, address, kind, len) {
                armed.tids.insert(tid);
            }
        }
    }
}

fn handle_trap(tid: i32, mem_file: &mut File, disasm: &dyn Disassembler) -> String {
    let dr6 = hwbp::peek_and_clear_dr6(Pid::from_raw(tid)).ok();
    let regs = ptrace::getregs(Pid::from_raw(tid));
    let rip = match &regs {
        Ok(r) => r.rip,
        Err(_) => 0,
    };

    let mut buf = [0u8; 16];
    let bytes: &[u8] = if rip != 0 {
        use std::io::Seek;
        if mem_file.seek(std::io::SeekFrom::Start(rip)).is_ok() {
            match mem_file.read(&mut buf) {
                Ok(n) => &buf[..n],
                Err(_) => &[],
            }
        } else {
            &[]
        }
    } else {
        &[]
    };

    let inst = disasm
        .decode_first(rip, bytes)
        .map(|d| d.text)
        .unwrap_or_else(|| "(unknown)".to_string());

    protocol::format_trap_line(tid, rip, dr6, bytes, &inst)
}

fn handle_command(main_pid: i32, line: &str) -> String {
    match protocol::parse_command(line) {
        Ok(cmd) => {
            let pid = Pid::from_raw(main_pid);
            let result = vigil::target::memory::with_interrupted(pid, || {
                write_bytes_word_aligned(pid, cmd.address, &cmd.bytes)
            });
            match result {
                Ok(Ok(())) => "OK\n".to_string(),
                Ok(Err(e)) => format!("ERR {e}\n"),
                Err(e) => format!("ERR {e}\n"),
            }
        }
        Err(reason) => format!("ERR {reason}\n"),
    }
}

fn write_bytes_word_aligned(pid: Pid, addr: u64, bytes: &[u8]) -> Result<(), String> {
    const WORD: usize = std::mem::size_of::<usize>();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let word_addr = addr + offset as u64;
        let remaining = bytes.len() - offset;
        let existing = ptrace::read(pid, word_addr as *mut _).map_err(|e| e.to_string())?;
        let mut word_bytes = existing.to_ne_bytes();
        let take = remaining.min(WORD);
        word_bytes[..take].copy_from_slice(&bytes[offset..offset + take]);
        let word = usize::from_ne_bytes(word_bytes);
        unsafe {
            ptrace::write(pid, word_addr as *mut _, word as *mut _).map_err(|e| e.to_string())?;
        }
        offset += take;
    }
    Ok(())
}

fn cleanup(armed: &Armed) {
    for &tid in &armed.tids {
        let pid = Pid::from_raw(tid);
        let _ = vigil::target::memory::ptrace_interrupt(pid);
        let _ = waitpid(pid, None);
        let _ = hwbp::disarm(pid);
        let _ = ptrace::detach(pid, None);
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let address = match parse_address(&args.address) {
        Some(a) => a,
        None => {
            log::error!("[watcher] invalid address: {}", args.address);
            std::process::exit(1);
        }
    };
    let kind = match AccessKind::parse(&args.mode) {
        Some(k) => k,
        None => {
            log::error!("[watcher] invalid mode: {} (want write|access)", args.mode);
            std::process::exit(1);
        }
    };

    let cmd_fd: i32 = std::env::var(CMD_FD_VAR)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(-1);
    let resp_fd: i32 = std::env::var(RESP_FD_VAR)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(-1);
    if cmd_fd < 0 || resp_fd < 0 {
        log::error!("[watcher] missing {CMD_FD_VAR}/{RESP_FD_VAR} environment variables");
        std::process::exit(1);
    }

    install_signal_handlers();

    let main_pid = Pid::from_raw(args.pid);
    if ptrace::attach(main_pid).is_err() {
        log::error!("[watcher] failed to attach to pid {}", args.pid);
        std::process::exit(1);
    }
    if waitpid(main_pid, None).is_err() {
        log::error!("[watcher] failed to wait for initial stop");
        std::process::exit(1);
    }

    let mut mem_file = match File::open(format!("/proc/{}/mem", args.pid)) {
        Ok(f) => f,
        Err(e) => {
            log::error!("[watcher] failed to open /proc/{}/mem: {e}", args.pid);
            std::process::exit(1);
        }
    };

    let mut armed = Armed {
        tids: HashSet::new(),
    };
    refresh_threads(&mut armed, args.pid, address, kind, args.len);

    let disasm: Box<dyn Disassembler> = Box::new(IcedDisassembler);

    // Command FD is made non-blocking; it is read line-by-line between waitpid polls.
    unsafe {
        let flags = libc::fcntl(cmd_fd, libc::F_GETFL);
        libc::fcntl(cmd_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
    let cmd_file = unsafe { File::from_raw_fd(cmd_fd) };
    let mut cmd_reader = BufReader::new(cmd_file);
    let mut resp_file = unsafe { File::from_raw_fd(resp_fd) };
    let mut pending_line = String::new();

    while RUNNING.load(Ordering::SeqCst) {
        let mut line = String::new();
        match cmd_reader.read_line(&mut line) {
            Ok(0) => {
                // Command pipe closed: the supervisor is gone. Shut down exactly as
                // if it had sent SIGINT, rather than spinning with a live attach.
                RUNNING.store(false, Ordering::SeqCst);
            }
            Ok(_) => {
                pending_line.push_str(&line);
                if pending_line.ends_with('\n') {
                    let response = handle_command(args.pid, pending_line.trim_end());
                    let _ = resp_file.write_all(response.as_bytes());
                    pending_line.clear();
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => {}
        }

        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG | WaitPidFlag::__WALL)) {
            Ok(WaitStatus::Stopped(tid, Signal::SIGTRAP)) if armed.tids.contains(&tid.as_raw()) => {
                let line = handle_trap(tid.as_raw(), &mut mem_file, disasm.as_ref());
                print!("{line}");
                let _ = std::io::stdout().flush();
                let _ = ptrace::cont(tid, None::<Signal>);
                refresh_threads(&mut armed, args.pid, address, kind, args.len);
            }
            Ok(WaitStatus::Stopped(tid, sig)) => {
                let _ = ptrace::cont(tid, Some(sig));
            }
            Ok(WaitStatus::Exited(tid, _)) | Ok(WaitStatus::Signaled(tid, _, _)) => {
                armed.tids.remove(&tid.as_raw());
                if tid == main_pid {
                    break;
                }
            }
            _ => {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        }
    }

    cleanup(&armed);
}
