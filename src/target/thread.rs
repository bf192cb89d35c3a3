use procfs::process::{Process, Task};
use procfs::ProcError;

/// A single kernel thread (task) belonging to a traced process.
pub struct TargetThread {
    task: Task,
}

impl TargetThread {
    fn new(task: Task) -> Self {
        TargetThread { task }
    }

    pub fn tid(&self) -> i32 {
        self.task.tid
    }

    /// `comm` of the thread, if the task is still alive and its stat page is intact.
    pub fn name(&self) -> crate::error::Result<Option<String>> {
        match self.task.stat() {
            Ok(stat) => Ok(Some(stat.comm)),
            Err(ProcError::NotFound(_)) | Err(ProcError::Incomplete(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Snapshot of every thread currently belonging to `pid`.
pub fn list_threads(pid: nix::unistd::Pid) -> crate::error::Result<Vec<TargetThread>> {
    Ok(Process::new(pid.as_raw())?
        .tasks()?
        .flatten()
        .map(TargetThread::new)
        .collect())
}

/// Thread IDs only, as used by the watcher's arming loop.
pub fn list_tids(pid: nix::unistd::Pid) -> crate::error::Result<Vec<i32>> {
    Ok(list_threads(pid)?.iter().map(|t| t.tid()).collect())
}
