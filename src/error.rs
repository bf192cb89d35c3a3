use std::path::PathBuf;

use nix::unistd::Pid;
use thiserror::Error;

/// Crate-wide error type. Every fallible public operation returns `Result<T, Error>`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("process {0} is not attached")]
    NotAttached(Pid),

    #[error("ptrace attach to {pid} was refused (check /proc/sys/kernel/yama/ptrace_scope, or run as root): {source}")]
    PermissionDenied { pid: Pid, source: nix::Error },

    #[error("failed to parse {what}: {detail}")]
    ParseFailed { what: &'static str, detail: String },

    #[error("{op} at 0x{addr:x} transferred {got} of {want} requested bytes")]
    IoPartial {
        op: &'static str,
        addr: u64,
        got: usize,
        want: usize,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("pattern not found{}", module.as_deref().map(|m| format!(" in module {m}")).unwrap_or_default())]
    PatternNotFound { module: Option<String> },

    #[error("failed to spawn watcher subprocess: {0}")]
    WatcherSpawnFailed(String),

    #[error("watcher subprocess for pid {pid} did not exit within the grace period and was killed")]
    WatcherDidNotExit { pid: Pid },

    #[error("no patch record for address 0x{0:x}")]
    NoPatchRecord(u64),

    #[error("script contained {} error(s)", .0.len())]
    ScriptParse(Vec<String>),

    #[error("symbol '{0}' is undefined")]
    UndefinedSymbol(String),

    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("ptrace error: {0}")]
    Ptrace(#[from] nix::Error),

    #[error("procfs error: {0}")]
    Procfs(#[from] procfs::ProcError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: Some(path.into()),
            source,
        }
    }
}
