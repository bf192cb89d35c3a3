//! First-scan/rescan pipelines across typed values, AOB patterns, and strings, with
//! a sharded worker pool and cooperative cancellation.

pub mod pattern;
pub mod value;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::target::{RegionFilter, TargetHandle};

pub use pattern::{parse_aob_pattern, PatternByte};
pub use value::ValueType;

/// Rescan/first-scan delta predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Exact,
    UnknownInitial,
    Changed,
    Unchanged,
    Increased,
    Decreased,
    GreaterThan,
    LessThan,
    Between,
    Aob,
}

/// One scan request.
#[derive(Debug, Clone)]
pub struct ScanParams {
    pub value_type: ValueType,
    pub mode: ScanMode,
    pub value1: String,
    pub value2: String,
    pub start_address: Option<u64>,
    pub end_address: Option<u64>,
    pub alignment: usize,
    pub require_writable: bool,
    pub require_executable: bool,
    pub hex_input: bool,
    pub skip_masked_regions: bool,
}

impl ScanParams {
    pub fn effective_alignment(&self) -> usize {
        if self.alignment != 0 {
            self.alignment
        } else {
            self.value_type.default_alignment()
        }
    }

    fn region_filter(&self) -> RegionFilter {
        RegionFilter {
            require_writable: self.require_writable,
            require_executable: self.require_executable,
            skip_masked_regions: self.skip_masked_regions,
        }
    }

    /// `value1`/`value2` prefixed with `0x` when `hex_input` is set and not already
    /// so prefixed.
    fn normalized_value1(&self) -> String {
        normalize_hex_input(&self.value1, self.hex_input)
    }

    fn normalized_value2(&self) -> String {
        normalize_hex_input(&self.value2, self.hex_input)
    }
}

fn normalize_hex_input(value: &str, hex_input: bool) -> String {
    if !hex_input {
        return value.to_string();
    }
    let trimmed = value.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        trimmed.to_string()
    } else {
        format!("0x{trimmed}")
    }
}

/// One surviving candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub address: u64,
    /// Packed bits of the last observed value (`memcpy` semantics). Zero and
    /// meaningless for AOB/String results.
    pub raw: u64,
}

/// Parallel memory scanner bound to one [`TargetHandle`].
pub struct Scanner<'a> {
    target: &'a TargetHandle,
    config: Config,
    results: Vec<ScanResult>,
    cancel: Arc<AtomicBool>,
    progress: Option<(Arc<AtomicU64>, u64)>,
}

impl<'a> Scanner<'a> {
    pub fn new(target: &'a TargetHandle) -> Self {
        Scanner {
            target,
            config: Config::default(),
            results: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn with_config(target: &'a TargetHandle, config: Config) -> Self {
        Scanner {
            target,
            config,
            results: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn results(&self) -> &[ScanResult] {
        &self.results
    }

    pub fn reset(&mut self) {
        self.results.clear();
    }

    pub fn restore_results(&mut self, snapshot: Vec<ScanResult>) {
        self.results = snapshot;
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    pub fn set_progress_sink(&mut self, counter: Arc<AtomicU64>, total: u64) {
        self.progress = Some((counter, total));
    }

    fn admitted_regions(&self, params: &ScanParams) -> Result<Vec<(u64, u64)>> {
        let filter = params.region_filter();
        let regions = self.target.regions()?;
        Ok(regions
            .iter()
            .filter(|r| filter.admits(r))
            .filter_map(|r| RegionFilter::clamp(r, params.start_address, params.end_address))
            .collect())
    }

    pub fn estimate_work(&self, params: &ScanParams) -> Result<u64> {
        Ok(self
            .admitted_regions(params)?
            .iter()
            .map(|(s, e)| e - s)
            .sum())
    }

    pub fn first_scan(&mut self, params: &ScanParams) -> Result<()> {
        self.reset();
        self.run_scan(params, true)
    }

    pub fn next_scan(&mut self, params: &ScanParams) -> Result<()> {
        if params.mode == ScanMode::Aob {
            return self.run_scan(params, true);
        }
        self.rescan(params)
    }

    fn run_scan(&mut self, params: &ScanParams, _is_first: bool) -> Result<()> {
        let windows = self.admitted_regions(params)?;
        let chunk_size = self.config.chunk_size;
        let worker_count = self.config.worker_count().max(1);
        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        let pid = self.target.pid();
        let params = params.clone();

        let shards: Vec<Vec<(u64, u64)>> = shard(&windows, worker_count);
        let merged = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));

        std::thread::scope(|scope| {
            for shard_windows in shards {
                let merged = Arc::clone(&merged);
                let cancel = Arc::clone(&cancel);
                let cancelled = Arc::clone(&cancelled);
                let progress = progress.clone();
                let params = params.clone();
                scope.spawn(move || {
                    let mut local = Vec::new();
                    for (start, end) in shard_windows {
                        if cancel.load(Ordering::Relaxed) {
                            cancelled.store(true, Ordering::Relaxed);
                            return;
                        }
                        scan_window(pid, start, end, &params, chunk_size, &cancel, &mut local, &progress);
                        if cancel.load(Ordering::Relaxed) {
                            cancelled.store(true, Ordering::Relaxed);
                            return;
                        }
                    }
                    merged.lock().unwrap().extend(local);
                });
            }
        });

        if cancelled.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let mut results = Arc::try_unwrap(merged).unwrap().into_inner().unwrap();
        results.sort_by_key(|r: &ScanResult| r.address);
        self.results = results;
        Ok(())
    }

    fn rescan(&mut self, params: &ScanParams) -> Result<()> {
        let mut survivors = Vec::with_capacity(self.results.len());
        for result in &self.results {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let current = match self.target.read(result.address, params.value_type.size()) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            if let Some(kept) = apply_rescan_predicate(params, result, &current)? {
                survivors.push(kept);
            }
        }
        self.results = survivors;
        Ok(())
    }
}

fn shard(windows: &[(u64, u64)], worker_count: usize) -> Vec<Vec<(u64, u64)>> {
    let mut shards = vec![Vec::new(); worker_count];
    for (i, window) in windows.iter().enumerate() {
        shards[i % worker_count].push(*window);
    }
    shards
}

#[allow(clippy::too_many_arguments)]
fn scan_window(
    pid: nix::unistd::Pid,
    start: u64,
    end: u64,
    params: &ScanParams,
    chunk_size: usize,
    cancel: &AtomicBool,
    out: &mut Vec<ScanResult>,
    progress: &Option<(Arc<AtomicU64>, u64)>,
) {
    let alignment = params.effective_alignment().max(1);
    let overlap = match params.value_type {
        ValueType::Aob => pattern_len(params).saturating_sub(1),
        _ => 0,
    };

    let mut cursor = start;
    let mut carry: Vec<u8> = Vec::new();
    while cursor < end {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let want = ((end - cursor) as usize).min(chunk_size);
        let buf = match crate::target::TargetHandle::read_raw(pid, cursor, want) {
            Ok(b) => b,
            Err(_) => {
                cursor += want as u64;
                carry.clear();
                continue;
            }
        };
        if let Some((counter, _total)) = progress {
            counter.fetch_add(buf.len() as u64, Ordering::Relaxed);
        }

        let mut window = carry.clone();
        window.extend_from_slice(&buf);
        let window_base = cursor - carry.len() as u64;

        scan_buffer(window_base, &window, params, alignment, cancel, out);

        if overlap > 0 && buf.len() >= overlap {
            carry = buf[buf.len() - overlap..].to_vec();
        } else {
            carry.clear();
        }
        cursor += want as u64;
    }
}

fn pattern_len(params: &ScanParams) -> usize {
    parse_aob_pattern(&params.value1).map(|p| p.len()).unwrap_or(0)
}

fn scan_buffer(
    base: u64,
    buf: &[u8],
    params: &ScanParams,
    alignment: usize,
    cancel: &AtomicBool,
    out: &mut Vec<ScanResult>,
) {
    match params.value_type {
        ValueType::Aob => {
            if let Ok(pattern) = parse_aob_pattern(&params.value1) {
                for offset in pattern::find_all(&pattern, buf) {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    out.push(ScanResult {
                        address: base + offset as u64,
                        raw: 0,
                    });
                }
            }
        }
        ValueType::String => {
            let needle = params.value1.as_bytes();
            if !needle.is_empty() && needle.len() <= buf.len() {
                for offset in 0..=buf.len() - needle.len() {
                    if &buf[offset..offset + needle.len()] == needle {
                        out.push(ScanResult {
                            address: base + offset as u64,
                            raw: 0,
                        });
                    }
                }
            }
        }
        _ => scan_typed(base, buf, params, alignment, cancel, out),
    }
}

fn scan_typed(
    base: u64,
    buf: &[u8],
    params: &ScanParams,
    alignment: usize,
    cancel: &AtomicBool,
    out: &mut Vec<ScanResult>,
) {
    macro_rules! scan_as {
        ($t:ty) => {{
            let needle1: Option<$t> = <$t as value::Scalar>::parse(&params.normalized_value1()).ok();
            let needle2: Option<$t> = <$t as value::Scalar>::parse(&params.normalized_value2()).ok();
            let size = std::mem::size_of::<$t>();
            let mut offset = 0usize;
            while offset + size <= buf.len() {
                if offset % alignment == 0 {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    let current = <$t as value::Scalar>::from_le_bytes_slice(&buf[offset..offset + size]);
                    let keep = match params.mode {
                        ScanMode::UnknownInitial => true,
                        ScanMode::Exact => needle1.map_or(false, |n| current == n),
                        ScanMode::GreaterThan => needle1.map_or(false, |n| current > n),
                        ScanMode::LessThan => needle1.map_or(false, |n| current < n),
                        ScanMode::Between => matches!((needle1, needle2), (Some(lo), Some(hi)) if current >= lo && current <= hi),
                        _ => false,
                    };
                    if keep {
                        out.push(ScanResult {
                            address: base + offset as u64,
                            raw: value::pack_raw(current),
                        });
                    }
                }
                offset += 1;
            }
        }};
    }

    match params.value_type {
        ValueType::Byte => scan_as!(i8),
        ValueType::I16 => scan_as!(i16),
        ValueType::I32 => scan_as!(i32),
        ValueType::I64 => scan_as!(i64),
        ValueType::F32 => scan_as!(f32),
        ValueType::F64 => scan_as!(f64),
        ValueType::Aob | ValueType::String => unreachable!(),
    }
}

fn apply_rescan_predicate(
    params: &ScanParams,
    prior: &ScanResult,
    current_bytes: &[u8],
) -> Result<Option<ScanResult>> {
    macro_rules! predicate_as {
        ($t:ty) => {{
            let current = <$t as value::Scalar>::from_le_bytes_slice(current_bytes);
            let stored = <$t as value::Scalar>::from_raw(prior.raw);
            let keep = match params.mode {
                ScanMode::Exact => {
                    let needle = <$t as value::Scalar>::parse(&params.normalized_value1())?;
                    current == needle
                }
                ScanMode::Changed => value::pack_raw(current) != prior.raw,
                ScanMode::Unchanged => value::pack_raw(current) == prior.raw,
                ScanMode::Increased => current > stored,
                ScanMode::Decreased => current < stored,
                ScanMode::UnknownInitial => true,
                ScanMode::GreaterThan => {
                    let needle = <$t as value::Scalar>::parse(&params.normalized_value1())?;
                    current > needle
                }
                ScanMode::LessThan => {
                    let needle = <$t as value::Scalar>::parse(&params.normalized_value1())?;
                    current < needle
                }
                ScanMode::Between => {
                    let lo = <$t as value::Scalar>::parse(&params.normalized_value1())?;
                    let hi = <$t as value::Scalar>::parse(&params.normalized_value2())?;
                    current >= lo && current <= hi
                }
                ScanMode::Aob => unreachable!("AOB rescans re-run the full pattern scan"),
            };
            if keep {
                Ok(Some(ScanResult {
                    address: prior.address,
                    raw: value::pack_raw(current),
                }))
            } else {
                Ok(None)
            }
        }};
    }

    match params.value_type {
        ValueType::Byte => predicate_as!(i8),
        ValueType::I16 => predicate_as!(i16),
        ValueType::I32 => predicate_as!(i32),
        ValueType::I64 => predicate_as!(i64),
        ValueType::F32 => predicate_as!(f32),
        ValueType::F64 => predicate_as!(f64),
        ValueType::Aob | ValueType::String => Ok(Some(*prior)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetHandle;

    fn default_params(value_type: ValueType, mode: ScanMode) -> ScanParams {
        ScanParams {
            value_type,
            mode,
            value1: String::new(),
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
    fn exact_scan_finds_known_value_in_own_memory() {
        let target = {
            let mut h = TargetHandle::new(nix::unistd::getpid().as_raw());
            h.attach(nix::unistd::getpid().as_raw());
            h
        };
        let needle: i32 = 0x1234_5678;
        let addr = &needle as *const i32 as u64;

        let mut params = default_params(ValueType::I32, ScanMode::Exact);
        params.value1 = needle.to_string();
        params.start_address = Some(addr - 64);
        params.end_address = Some(addr + 64);

        let mut scanner = Scanner::new(&target);
        scanner.first_scan(&params).expect("scan should succeed");
        assert!(scanner.results().iter().any(|r| r.address == addr));
    }
}
