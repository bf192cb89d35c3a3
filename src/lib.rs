//! Live memory inspection, scanning, and code-patching engine for Linux processes.
//!
//! A caller attaches a [`target::TargetHandle`] to a PID, runs [`scanner::Scanner`]
//! passes to find and narrow candidate addresses, freezes or edits them, installs
//! hardware watchpoints via [`watch::WatcherSession`] to see what touches an
//! address, and patches code bytes directly or through [`script::Script`].

pub mod config;
pub mod disasm;
pub mod error;
pub mod inject;
pub mod pointer;
pub mod scanner;
pub mod script;
pub mod symbol;
pub mod table;
pub mod target;
pub mod watch;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
pub use target::TargetHandle;
