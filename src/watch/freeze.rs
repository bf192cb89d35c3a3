//! Watch/freeze tick: re-imposes frozen values and refreshes the observed-bytes
//! history on every entry. Driven by the embedding application's own event loop —
//! this crate spawns no internal timer thread for it.

use crate::error::Result;
use crate::table::WatchEntry;
use crate::target::TargetHandle;

/// Runs one tick over `entries`: script entries are left untouched; value entries
/// that are frozen have their stored bytes rewritten to the target, and every value
/// entry has its byte history shifted (`last` → `previous`, freshly read → `last`)
/// regardless of freeze state.
pub fn tick(target: &TargetHandle, entries: &mut [WatchEntry]) -> Result<()> {
    for entry in entries.iter_mut() {
        if let WatchEntry::Value {
            address,
            frozen,
            frozen_bytes,
            last_bytes,
            previous_bytes,
            ..
        } = entry
        {
            if *frozen && !frozen_bytes.is_empty() {
                let _ = target.write(*address, frozen_bytes);
            }
            if let Ok(current) = target.read(*address, last_bytes.len().max(1)) {
                std::mem::swap(previous_bytes, last_bytes);
                *last_bytes = current;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::ValueType;

    #[test]
    fn freeze_rewrites_value_and_shifts_history() {
        let mut value: i32 = 100;
        let addr = &mut value as *mut i32 as u64;

        let mut target = TargetHandle::new(nix::unistd::getpid().as_raw());
        target.attach(nix::unistd::getpid().as_raw());

        let mut entries = vec![WatchEntry::Value {
            address: addr,
            value_type: ValueType::I32,
            description: "hp".to_string(),
            pointer: false,
            frozen: true,
            frozen_bytes: 100i32.to_le_bytes().to_vec(),
            last_bytes: 100i32.to_le_bytes().to_vec(),
            previous_bytes: 100i32.to_le_bytes().to_vec(),
        }];

        value = 55;
        tick(&target, &mut entries).unwrap();
        assert_eq!(value, 100);

        match &entries[0] {
            WatchEntry::Value { last_bytes, .. } => {
                assert_eq!(i32::from_le_bytes(last_bytes.clone().try_into().unwrap()), 100);
            }
            _ => panic!("expected value entry"),
        }
    }
}
