//! Scenario C: patch then restore bytes, checking the victim's memory and the
//! injector's ledger at each step.

use vigil::inject::Injector;
use vigil::target::TargetHandle;

#[test]
fn patch_then_restore_round_trips_original_bytes() {
    let mut buf = [0xE8u8, 0x11, 0x22, 0x33, 0x44];
    let addr = buf.as_mut_ptr() as u64;

    let mut target = TargetHandle::new(nix::unistd::getpid().as_raw());
    target.attach(nix::unistd::getpid().as_raw());

    let mut injector = Injector::new(&target);
    injector.patch(addr, &[0x90, 0x90, 0x90, 0x90, 0x90]).unwrap();
    assert_eq!(buf, [0x90, 0x90, 0x90, 0x90, 0x90]);
    assert!(injector.patches().contains_key(&addr));

    injector.restore(addr).unwrap();
    assert_eq!(buf, [0xE8, 0x11, 0x22, 0x33, 0x44]);
    assert!(!injector.patches().contains_key(&addr));
}
