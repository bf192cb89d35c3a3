//! Atomic byte patching with an original-byte ledger.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::target::TargetHandle;

/// One installed code patch.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    pub address: u64,
    pub original: Vec<u8>,
    pub patched: Vec<u8>,
}

/// Patch/restore with original-byte bookkeeping, bound to one [`TargetHandle`].
pub struct Injector<'a> {
    target: &'a TargetHandle,
    patches: HashMap<u64, PatchRecord>,
}

impl<'a> Injector<'a> {
    pub fn new(target: &'a TargetHandle) -> Self {
        Injector {
            target,
            patches: HashMap::new(),
        }
    }

    pub fn target(&self) -> &TargetHandle {
        self.target
    }

    pub fn patches(&self) -> &HashMap<u64, PatchRecord> {
        &self.patches
    }

    /// Captures the current bytes at `address` as `original`, writes `bytes`, and
    /// records the patch. If a record for `address` already exists, it is
    /// unconditionally overwritten — the new capture reflects whatever is there now,
    /// including another patch's own output. This is a documented design smell
    /// (see DESIGN.md): a well-behaved caller restores before re-patching the same
    /// address.
    pub fn patch(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        if !self.target.is_attached() {
            return Err(Error::NotAttached(self.target.pid()));
        }
        let original = self.target.read(address, bytes.len())?;
        self.target.write(address, bytes)?;
        self.patches.insert(
            address,
            PatchRecord {
                address,
                original,
                patched: bytes.to_vec(),
            },
        );
        Ok(())
    }

    /// Writes back `original` and removes the record. The record is only removed on
    /// a successful write, matching the invariant that a record's existence implies
    /// the victim's bytes currently equal `patched`.
    pub fn restore(&mut self, address: u64) -> Result<()> {
        let record = self
            .patches
            .get(&address)
            .ok_or(Error::NoPatchRecord(address))?;
        self.target.write(address, &record.original)?;
        self.patches.remove(&address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::getpid;

    #[test]
    fn round_trip_patch_restores_original_bytes() {
        let mut buf = [0xE8u8, 0x11, 0x22, 0x33, 0x44];
        let addr = buf.as_mut_ptr() as u64;
        let mut target = TargetHandle::new(getpid().as_raw());
        target.attach(getpid().as_raw());

        let mut injector = Injector::new(&target);
        injector.patch(addr, &[0x90, 0x90, 0x90, 0x90, 0x90]).unwrap();
        assert_eq!(buf, [0x90, 0x90, 0x90, 0x90, 0x90]);
        assert!(injector.patches().contains_key(&addr));

        injector.restore(addr).unwrap();
        assert_eq!(buf, [0xE8, 0x11, 0x22, 0x33, 0x44]);
        assert!(!injector.patches().contains_key(&addr));
    }

    #[test]
    fn restoring_unknown_address_fails() {
        let mut target = TargetHandle::new(getpid().as_raw());
        target.attach(getpid().as_raw());
        let mut injector = Injector::new(&target);
        assert!(injector.restore(0xdead_beef).is_err());
    }
}
