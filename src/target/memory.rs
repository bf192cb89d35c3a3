use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::io::{IoSlice, IoSliceMut};

use crate::error::{Error, Result};

const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// RAII ptrace attach used only for the duration of a single fallback read or write.
/// Mirrors the lightweight "attach-stop-detach" strategy described for `TargetHandle`:
/// the caller never holds a standing ptrace stop outside of this scope.
struct TransientAttach {
    pid: Pid,
}

impl TransientAttach {
    fn new(pid: Pid) -> Result<Self> {
        ptrace::attach(pid).map_err(|source| Error::PermissionDenied { pid, source })?;
        match waitpid(pid, None) {
            Ok(_) => {}
            Err(source) => {
                let _ = ptrace::detach(pid, None);
                return Err(source.into());
            }
        }
        Ok(TransientAttach { pid })
    }
}

impl Drop for TransientAttach {
    fn drop(&mut self) {
        let _ = ptrace::detach(self.pid, None);
    }
}

fn vectored_read(pid: Pid, addr: u64, len: usize) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut local = [IoSliceMut::new(&mut buf)];
    let remote = [RemoteIoVec {
        base: addr as usize,
        len,
    }];
    match process_vm_readv(pid, &mut local, &remote) {
        Ok(n) if n == len => Some(buf),
        _ => None,
    }
}

fn vectored_write(pid: Pid, addr: u64, bytes: &[u8]) -> bool {
    let local = [IoSlice::new(bytes)];
    let remote = [RemoteIoVec {
        base: addr as usize,
        len: bytes.len(),
    }];
    matches!(process_vm_writev(pid, &local, &remote), Ok(n) if n == bytes.len())
}

fn ptrace_read_fallback(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    let _guard = TransientAttach::new(pid)?;
    let mut out = Vec::with_capacity(len);
    let mut cursor = addr;
    while out.len() < len {
        let word = ptrace::read(pid, cursor as *mut _).map_err(Error::from)?;
        let word_bytes = word.to_ne_bytes();
        let remaining = len - out.len();
        let take = remaining.min(WORD_SIZE);
        out.extend_from_slice(&word_bytes[..take]);
        cursor += WORD_SIZE as u64;
    }
    Ok(out)
}

fn ptrace_write_fallback(pid: Pid, addr: u64, bytes: &[u8]) -> Result<()> {
    let _guard = TransientAttach::new(pid)?;
    let mut offset = 0usize;
    while offset < bytes.len() {
        let word_addr = addr + offset as u64;
        let remaining = bytes.len() - offset;
        if remaining >= WORD_SIZE {
            let mut word_bytes = [0u8; WORD_SIZE];
            word_bytes.copy_from_slice(&bytes[offset..offset + WORD_SIZE]);
            let word = usize::from_ne_bytes(word_bytes);
            unsafe {
                ptrace::write(pid, word_addr as *mut _, word as *mut _)?;
            }
            offset += WORD_SIZE;
        } else {
            // Partial final word: merge new tail bytes into the existing word.
            let existing = ptrace::read(pid, word_addr as *mut _)?;
            let mut word_bytes = existing.to_ne_bytes();
            word_bytes[..remaining].copy_from_slice(&bytes[offset..]);
            let word = usize::from_ne_bytes(word_bytes);
            unsafe {
                ptrace::write(pid, word_addr as *mut _, word as *mut _)?;
            }
            offset += remaining;
        }
    }
    Ok(())
}

/// Read `len` bytes at `addr` from `pid`'s address space.
///
/// Strategy: vectored `process_vm_readv` first; on partial transfer, a transient
/// ptrace attach with word-sized peeks.
pub fn read(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if let Some(buf) = vectored_read(pid, addr, len) {
        return Ok(buf);
    }
    ptrace_read_fallback(pid, addr, len)
}

/// Write `bytes` at `addr` in `pid`'s address space.
///
/// Strategy: vectored `process_vm_writev` first; on failure, a transient ptrace
/// attach with word-sized pokes; if that also fails (or the attach itself is
/// refused) and a hardware watchpoint session already owns `pid`, the write is
/// forwarded through that session's command channel as a last resort.
pub fn write(pid: Pid, addr: u64, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    if vectored_write(pid, addr, bytes) {
        return Ok(());
    }
    match ptrace_write_fallback(pid, addr, bytes) {
        Ok(()) => Ok(()),
        Err(err) => {
            if crate::watch::write_via_watcher(pid, addr, bytes) {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

/// Interrupts `pid`, waits for it to stop, runs `f`, then resumes it with `sig`
/// (or lets the caller resume explicitly). Used by the watcher's command handler,
/// which must stop the main thread before poking a word and always resume it
/// afterwards regardless of the poke's outcome.
pub fn with_interrupted<T>(pid: Pid, f: impl FnOnce() -> T) -> Result<T> {
    ptrace_interrupt(pid)?;
    waitpid(pid, None)?;
    let result = f();
    ptrace::cont(pid, None::<Signal>)?;
    Ok(result)
}

/// `PTRACE_INTERRUPT` has no safe wrapper in `nix`; issue it the same way the
/// debug-register pokes are issued, via the raw syscall.
pub fn ptrace_interrupt(pid: Pid) -> Result<()> {
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_INTERRUPT,
            libc::pid_t::from(pid),
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::c_void>(),
        )
    };
    if ret == -1 {
        Err(nix::errno::Errno::last().into())
    } else {
        Ok(())
    }
}
