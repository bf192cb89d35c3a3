//! Scenario F: one-hop pointer scan finds a word near a known target value.

use vigil::pointer;
use vigil::target::TargetHandle;

#[test]
fn pointer_scan_finds_nearby_word() {
    #[repr(C)]
    struct Victim {
        near: u64,
        target: u64,
    }
    let victim = Victim {
        near: 0x55A8,
        target: 0x55AA,
    };

    let mut target_handle = TargetHandle::new(nix::unistd::getpid().as_raw());
    target_handle.attach(nix::unistd::getpid().as_raw());

    let hits = pointer::scan(&target_handle, 0x55AA, 64, false).unwrap();
    let near_addr = &victim.near as *const u64 as u64;
    assert!(hits
        .iter()
        .any(|h| h.base == near_addr && h.offset == 2 && h.final_address == 0x55AA));
}
