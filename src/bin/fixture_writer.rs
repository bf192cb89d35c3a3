//! Test-only fixture: prints the address of a static counter, then writes to it
//! every 10ms until killed. Used by the watcher integration test as a victim
//! process with a known, stable write site.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

static COUNTER: AtomicI32 = AtomicI32::new(0);

fn main() {
    let addr = &COUNTER as *const AtomicI32 as u64;
    println!("addr=0x{addr:x}");
    use std::io::Write;
    let _ = std::io::stdout().flush();
    loop {
        COUNTER.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
    }
}
