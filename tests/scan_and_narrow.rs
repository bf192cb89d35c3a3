//! Scenario A: scan, mutate the victim, and narrow with successive rescans.

use vigil::scanner::{ScanMode, ScanParams, Scanner, ValueType};
use vigil::target::TargetHandle;

fn params(value_type: ValueType, mode: ScanMode, value1: &str) -> ScanParams {
    ScanParams {
        value_type,
        mode,
        value1: value1.to_string(),
        value2: String::new(),
        start_address: None,
        end_address: None,
        alignment: 0,
        require_writable: false,
        require_executable: false,
        hex_input: false,
        skip_masked_regions: true,
    }
}

#[test]
fn scan_and_narrow_tracks_value_changes() {
    let mut hp: i32 = 100;
    let addr = &mut hp as *mut i32 as u64;

    let mut target = TargetHandle::new(nix::unistd::getpid().as_raw());
    target.attach(nix::unistd::getpid().as_raw());

    let mut scan_params = params(ValueType::I32, ScanMode::Exact, "100");
    scan_params.start_address = Some(addr - 64);
    scan_params.end_address = Some(addr + 64);

    let mut scanner = Scanner::new(&target);
    scanner.first_scan(&scan_params).unwrap();
    assert!(scanner.results().iter().any(|r| r.address == addr));

    hp = 101;
    scanner.next_scan(&params(ValueType::I32, ScanMode::Changed, "")).unwrap();
    assert!(scanner.results().iter().any(|r| r.address == addr));

    scanner.next_scan(&params(ValueType::I32, ScanMode::Exact, "101")).unwrap();
    assert!(scanner.results().iter().any(|r| r.address == addr));

    scanner.next_scan(&params(ValueType::I32, ScanMode::Exact, "100")).unwrap();
    assert!(!scanner.results().iter().any(|r| r.address == addr));

    let _ = hp;
}
