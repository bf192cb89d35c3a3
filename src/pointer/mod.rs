//! One-hop pointer scanning: for a known `target` address and `max_offset`, finds
//! every location whose value, plus some small offset, lands exactly on `target`.

use crate::error::Result;
use crate::target::{RegionFilter, TargetHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerHit {
    pub base: u64,
    pub offset: i64,
    pub final_address: u64,
}

/// Scans every aligned word in every readable region (optionally writable-only) for
/// a value close enough to `target` to reach it with an offset of at most
/// `max_offset` in either direction. Output order is discovery order: region order,
/// then address order within a region.
pub fn scan(
    target_handle: &TargetHandle,
    target: u64,
    max_offset: u64,
    writable_only: bool,
) -> Result<Vec<PointerHit>> {
    let filter = RegionFilter {
        require_writable: writable_only,
        require_executable: false,
        skip_masked_regions: true,
    };
    let word_size = std::mem::size_of::<u64>();
    let mut hits = Vec::new();

    for region in target_handle.regions()? {
        if !filter.admits(&region) {
            continue;
        }
        let mut addr = region.start;
        while addr + word_size as u64 <= region.end {
            if let Ok(bytes) = target_handle.read(addr, word_size) {
                let value = u64::from_le_bytes(bytes.try_into().unwrap());
                let diff = target as i128 - value as i128;
                if diff.unsigned_abs() <= max_offset as u128 {
                    hits.push(PointerHit {
                        base: addr,
                        offset: diff as i64,
                        final_address: (value as i128 + diff) as u64,
                    });
                }
            }
            addr += word_size as u64;
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::getpid;

    #[test]
    fn finds_near_pointer() {
        #[repr(C)]
        struct Victim {
            near: u64,
            target: u64,
        }
        let victim = Victim {
            near: 0x55A8,
            target: 0x55AA,
        };
        let mut target_handle = TargetHandle::new(getpid().as_raw());
        target_handle.attach(getpid().as_raw());

        let hits = scan(&target_handle, 0x55AA, 64, false).unwrap();
        let near_addr = &victim.near as *const u64 as u64;
        assert!(hits.iter().any(|h| h.base == near_addr && h.offset == 2));
    }
}
