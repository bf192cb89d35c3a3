//! x86-64 debug register plumbing shared by the watcher subprocess and by the
//! supervisor's fallback cleanup path.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::Result;

lazy_static::lazy_static! {
    static ref DEBUG_REG_OFFSET: usize = unsafe {
        let x = std::mem::zeroed::<libc::user>();
        (&x.u_debugreg as *const _ as usize) - (&x as *const _ as usize)
    };
}

/// What kind of memory access arms the trap: writes only, or any access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Writes,
    Accesses,
}

impl AccessKind {
    fn rw_bits(self) -> u64 {
        match self {
            AccessKind::Writes => 0b01,
            AccessKind::Accesses => 0b11,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessKind::Writes => "write",
            AccessKind::Accesses => "access",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "write" => Some(AccessKind::Writes),
            "access" => Some(AccessKind::Accesses),
            _ => None,
        }
    }
}

/// Non-monotonic by design: matches x86-64 hardware exactly (8-byte watches are
/// encoded `10`, not the naive doubling `11`).
fn length_bits(len: usize) -> u64 {
    match len {
        1 => 0b00,
        2 => 0b01,
        8 => 0b10,
        _ => 0b11, // 4, and the documented default
    }
}

/// Masks low bits of `addr` per watch length (1, 3, 7 for lengths 2, 4, 8).
/// Length-1 watches require no alignment.
pub fn align_address(addr: u64, len: usize) -> u64 {
    match len {
        2 => addr & !0b1,
        4 => addr & !0b11,
        8 => addr & !0b111,
        _ => addr,
    }
}

fn debug_reg_addr(offset: usize) -> *mut libc::c_void {
    (*DEBUG_REG_OFFSET + offset * 8) as *mut libc::c_void
}

fn peek_user(pid: Pid, offset: usize) -> Result<i64> {
    nix::errno::Errno::clear();
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_PEEKUSER,
            libc::pid_t::from(pid),
            debug_reg_addr(offset),
            std::ptr::null_mut::<libc::c_void>(),
        )
    };
    if ret == -1 {
        let errno = nix::errno::Errno::last();
        if errno != nix::errno::Errno::UnknownErrno {
            return Err(errno.into());
        }
    }
    Ok(ret)
}

fn poke_user(pid: Pid, offset: usize, value: u64) -> Result<()> {
    unsafe {
        ptrace::write_user(pid, debug_reg_addr(offset), value as *mut libc::c_void)?;
    }
    Ok(())
}

/// Arms a single hardware watchpoint for `pid` at debug-register slot 0: address in
/// DR0, RW/length bits and the local-enable bit freshly built into DR7, DR6 cleared.
/// Only slot 0 is used — this crate, like its grounding tool, supports one watched
/// address per session rather than the full four hardware slots.
pub fn arm(pid: Pid, address: u64, kind: AccessKind, len: usize) -> Result<()> {
    let aligned = align_address(address, len);
    let dr7: u64 = 1 | (kind.rw_bits() << 16) | (length_bits(len) << 18);
    poke_user(pid, 0, aligned)?;
    poke_user(pid, 7, dr7)?;
    poke_user(pid, 6, 0)?;
    Ok(())
}

/// Zeroes DR7/DR0/DR6 for `pid`, releasing any watchpoint armed on it.
pub fn disarm(pid: Pid) -> Result<()> {
    poke_user(pid, 7, 0)?;
    poke_user(pid, 0, 0)?;
    poke_user(pid, 6, 0)?;
    Ok(())
}

/// Reads DR6 (trap status) and clears it, returning the pre-clear value.
pub fn peek_and_clear_dr6(pid: Pid) -> Result<i64> {
    let value = peek_user(pid, 6)?;
    poke_user(pid, 6, 0)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_bits_matches_hardware_encoding() {
        assert_eq!(length_bits(1), 0b00);
        assert_eq!(length_bits(2), 0b01);
        assert_eq!(length_bits(8), 0b10);
        assert_eq!(length_bits(4), 0b11);
    }

    #[test]
    fn align_address_masks_low_bits() {
        assert_eq!(align_address(0x1003, 4), 0x1000);
        assert_eq!(align_address(0x1007, 8), 0x1000);
        assert_eq!(align_address(0x1001, 1), 0x1001);
    }
}
