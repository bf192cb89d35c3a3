//! Scenario B: AOB scanning with a wildcard token.

use vigil::scanner::{ScanMode, ScanParams, Scanner, ValueType};
use vigil::target::TargetHandle;

#[test]
fn aob_scan_matches_wildcard_pattern() {
    let bytes: [u8; 6] = [0x48, 0x89, 0xE5, 0x90, 0x5D, 0xC3];
    let addr = bytes.as_ptr() as u64;

    let mut target = TargetHandle::new(nix::unistd::getpid().as_raw());
    target.attach(nix::unistd::getpid().as_raw());

    let params = ScanParams {
        value_type: ValueType::Aob,
        mode: ScanMode::Aob,
        value1: "48 89 ?? 90 5D C3".to_string(),
        value2: String::new(),
        start_address: Some(addr.saturating_sub(64)),
        end_address: Some(addr + 64),
        alignment: 0,
        require_writable: false,
        require_executable: false,
        hex_input: false,
        skip_masked_regions: true,
    };

    let mut scanner = Scanner::new(&target);
    scanner.first_scan(&params).unwrap();
    assert!(scanner.results().iter().any(|r| r.address == addr));
}
