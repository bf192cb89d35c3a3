//! Process attachment and the memory read/write/region-enumeration primitives that
//! every other subsystem is built on top of.

pub mod memory;
mod region;
mod thread;

pub use region::{is_masked_region, MemoryRegion, RegionFilter, MASKED_REGION_MARKERS};
pub use thread::{list_tids, TargetThread};

use nix::unistd::Pid;

use crate::error::{Error, Result};

/// A handle to a victim process. Attachment is deliberately lightweight — it just
/// records the PID and a flag. Every read/write acquires (and releases) whatever
/// ptrace state it needs per-operation, so holding a `TargetHandle` never leaves the
/// victim permanently stopped.
pub struct TargetHandle {
    pid: Pid,
    attached: bool,
    last_error: Option<String>,
}

impl TargetHandle {
    /// Construct a detached handle for `pid`. No syscalls are made until `attach`.
    pub fn new(pid: i32) -> Self {
        TargetHandle {
            pid: Pid::from_raw(pid),
            attached: false,
            last_error: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Marks this handle as attached to `pid`. Lightweight by design: the engine
    /// relies on transient per-operation ptrace attaches rather than a standing
    /// stop, since the victim may have many live threads that should keep running.
    pub fn attach(&mut self, pid: i32) {
        self.pid = Pid::from_raw(pid);
        self.attached = true;
        self.last_error = None;
    }

    pub fn detach(&mut self) {
        self.attached = false;
    }

    fn require_attached(&self) -> Result<()> {
        if self.attached {
            Ok(())
        } else {
            Err(Error::NotAttached(self.pid))
        }
    }

    pub fn regions(&self) -> Result<Vec<MemoryRegion>> {
        self.require_attached()?;
        region::regions_for_pid(self.pid)
    }

    pub fn list_threads(&self) -> Result<Vec<i32>> {
        self.require_attached()?;
        list_tids(self.pid)
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        self.require_attached()?;
        memory::read(self.pid, addr, len)
    }

    /// Raw read keyed by `pid` directly, bypassing the attached-flag check. Used by
    /// the scanner's worker threads, which only ever hold a `Pid` (scanning happens
    /// from a scoped thread, not through `&self`).
    pub fn read_raw(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
        memory::read(pid, addr, len)
    }

    pub fn write(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        self.require_attached()?;
        memory::write(self.pid, addr, bytes)
    }

    /// Records a rich attach failure, surfaced through [`TargetHandle::last_error`].
    pub fn note_attach_failure(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }
}

impl Drop for TargetHandle {
    fn drop(&mut self) {
        self.attached = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::mman::{mprotect, ProtFlags};
    use nix::sys::{ptrace, signal, wait};
    use nix::unistd::{fork, getpid, ForkResult};
    use std::alloc::{alloc_zeroed, dealloc, Layout};
    use std::{ptr, thread, time};

    #[test]
    fn reads_own_memory() {
        let handle = {
            let mut h = TargetHandle::new(getpid().as_raw());
            h.attach(getpid().as_raw());
            h
        };
        let var: u64 = 0x1122_3344_5566_7788;
        let bytes = handle
            .read(&var as *const _ as u64, std::mem::size_of::<u64>())
            .expect("read own memory");
        assert_eq!(u64::from_ne_bytes(bytes.try_into().unwrap()), var);
    }

    #[test]
    fn read_protected_memory_via_ptrace_fallback() {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let layout = Layout::from_size_align(2 * page, page).unwrap();
        unsafe {
            let ptr = alloc_zeroed(layout);
            match fork().unwrap() {
                ForkResult::Child => {
                    ptr::write(ptr, 42u8);
                    mprotect(ptr as *mut _, page, ProtFlags::PROT_WRITE).unwrap();
                    thread::sleep(time::Duration::from_millis(300));
                    dealloc(ptr, layout);
                }
                ForkResult::Parent { child } => {
                    thread::sleep(time::Duration::from_millis(100));
                    let mut handle = TargetHandle::new(child.as_raw());
                    ptrace::attach(child).unwrap();
                    wait::waitpid(child, None).unwrap();
                    ptrace::detach(child, None).unwrap();
                    handle.attach(child.as_raw());

                    let value = handle.read(ptr as u64, 1).expect("fallback read");
                    assert_eq!(value[0], 42);

                    dealloc(ptr, layout);
                    ptrace::cont(child, Some(signal::Signal::SIGCONT)).ok();
                    wait::waitpid(child, None).ok();
                }
            }
        }
    }
}
