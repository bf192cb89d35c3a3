/// One row of a process's memory map.
///
/// Produced fresh on each [`crate::target::TargetHandle::regions`] call; never cached
/// across operations that may race with the victim's loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub private: bool,
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Backing path basename, lowercased, for module-name matching.
    pub fn basename_lower(&self) -> Option<String> {
        self.path.as_ref().map(|p| {
            p.rsplit('/')
                .next()
                .unwrap_or(p.as_str())
                .to_ascii_lowercase()
        })
    }
}

/// Backing-path fragments that mark a region as kernel-provided rather than real
/// process memory; scans skip these when `skip_masked_regions` is set.
pub const MASKED_REGION_MARKERS: &[&str] = &[
    "[vvar]",
    "[vdso]",
    "[vsyscall]",
    "linux-vdso",
    "linux-gate",
    "[vectors]",
];

pub fn is_masked_region(path: &Option<String>) -> bool {
    match path {
        Some(p) => MASKED_REGION_MARKERS.iter().any(|marker| p.contains(marker)),
        None => false,
    }
}

/// Filter flags applied when enumerating regions for a scan or a pointer search.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionFilter {
    pub require_writable: bool,
    pub require_executable: bool,
    pub skip_masked_regions: bool,
}

impl RegionFilter {
    pub fn admits(&self, region: &MemoryRegion) -> bool {
        if !region.readable {
            return false;
        }
        if self.require_writable && !region.writable {
            return false;
        }
        if self.require_executable && !region.executable {
            return false;
        }
        if self.skip_masked_regions && is_masked_region(&region.path) {
            return false;
        }
        true
    }

    /// Clamp `[region.start, region.end)` to `[lo, hi)`. Returns `None` if the window
    /// and the region do not overlap.
    pub fn clamp(region: &MemoryRegion, lo: Option<u64>, hi: Option<u64>) -> Option<(u64, u64)> {
        let start = lo.map(|lo| lo.max(region.start)).unwrap_or(region.start);
        let end = hi.map(|hi| hi.min(region.end)).unwrap_or(region.end);
        if start < end {
            Some((start, end))
        } else {
            None
        }
    }
}

pub fn regions_for_pid(pid: nix::unistd::Pid) -> crate::error::Result<Vec<MemoryRegion>> {
    let proc = procfs::process::Process::new(pid.as_raw())?;
    let maps = proc.maps()?;
    Ok(maps
        .into_iter()
        .map(|m| {
            let mut perms = m.perms.chars();
            let path = match m.pathname {
                procfs::process::MMapPath::Path(p) => Some(p.to_string_lossy().into_owned()),
                procfs::process::MMapPath::Vdso => Some("[vdso]".to_string()),
                procfs::process::MMapPath::Vvar => Some("[vvar]".to_string()),
                procfs::process::MMapPath::Vsyscall => Some("[vsyscall]".to_string()),
                procfs::process::MMapPath::Vsys(_) => Some("[vectors]".to_string()),
                _ => None,
            };
            MemoryRegion {
                start: m.address.0,
                end: m.address.1,
                readable: perms.next() == Some('r'),
                writable: perms.next() == Some('w'),
                executable: perms.next() == Some('x'),
                private: perms.next() == Some('p'),
                path,
            }
        })
        .collect())
}
