//! Library-side pieces of the hardware watchpoint engine: debug-register plumbing
//! (shared with the supervisor's fallback cleanup) and the wire protocol spoken
//! between the `vigil-watch` binary and its supervisor.
//!
//! The event loop itself lives in `src/bin/vigil_watch.rs` — it is a standalone
//! process by design (see the module-level docs there for why).

pub mod hwbp;
pub mod protocol;

pub use hwbp::AccessKind;
