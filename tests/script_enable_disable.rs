//! Scenario E, adapted to run against the test process's own memory rather than a
//! real shared object: an `aobscan` directive binds a name to a known byte pattern
//! in this process's own data, which a `patch`/`restore` pair then acts on.

use vigil::inject::Injector;
use vigil::script::Script;
use vigil::target::TargetHandle;

#[test]
fn script_enable_applies_patch_and_disable_restores() {
    let bytes: [u8; 3] = [0x90, 0x90, 0x5D];
    let addr = bytes.as_ptr() as u64;

    let mut target = TargetHandle::new(nix::unistd::getpid().as_raw());
    target.attach(nix::unistd::getpid().as_raw());

    let script_text = format!(
        "[ENABLE]\npatch 0x{addr:x} CC CC CC\n[DISABLE]\nrestore 0x{addr:x}\n"
    );

    let mut script = Script::parse(&script_text, &target).expect("script parses");
    let mut injector = Injector::new(&target);

    script.enable(&target, &mut injector).expect("enable runs");
    assert_eq!(bytes, [0xCC, 0xCC, 0xCC]);
    assert!(injector.patches().contains_key(&addr));

    script.disable(&target, &mut injector).expect("disable runs");
    assert_eq!(bytes, [0x90, 0x90, 0x5D]);
    assert!(!injector.patches().contains_key(&addr));
}
