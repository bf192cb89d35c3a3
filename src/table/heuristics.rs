//! Heuristic meta-analysis: clusters nearby scan-result addresses and scores each
//! one against a handful of independent guesses about its data type. Caller-facing
//! classification only — it never feeds back into scan or patch semantics.

use crate::target::{MemoryRegion, TargetHandle};

const CLUSTER_GAP: u64 = 32;
const FLOAT_MAGNITUDE_RANGE: std::ops::Range<f64> = 1e-6..1e10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BestGuess {
    String,
    Pointer,
    Float,
    Double,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct MetaScore {
    pub address: u64,
    pub cluster_label: Option<String>,
    pub score: i32,
    pub best_guess: BestGuess,
}

/// Groups sorted `addresses` into runs where consecutive addresses are within
/// [`CLUSTER_GAP`] bytes of each other. Returns, per input address, the label of
/// the cluster it belongs to (`None` if it forms a singleton cluster of its own).
fn cluster_labels(addresses: &[u64]) -> Vec<Option<String>> {
    if addresses.is_empty() {
        return Vec::new();
    }
    let mut labels = vec![None; addresses.len()];
    let mut run_start = 0usize;
    for i in 1..=addresses.len() {
        let breaks = i == addresses.len() || addresses[i] - addresses[i - 1] > CLUSTER_GAP;
        if breaks {
            let run_len = i - run_start;
            if run_len >= 2 {
                let label = format!("Cluster 0x{:x} ({} entries)", addresses[run_start], run_len);
                for slot in labels.iter_mut().take(i).skip(run_start) {
                    *slot = Some(label.clone());
                }
            }
            run_start = i;
        }
    }
    labels
}

fn looks_like_string(bytes: &[u8]) -> bool {
    let mut any_nonzero = false;
    for &b in bytes {
        if b != 0 {
            any_nonzero = true;
            if !(0x20..=0x7e).contains(&b) {
                return false;
            }
        }
    }
    any_nonzero
}

fn looks_like_pointer(bytes: &[u8], regions: &[MemoryRegion]) -> bool {
    if bytes.len() < 8 {
        return false;
    }
    let value = u64::from_le_bytes(bytes[..8].try_into().unwrap());
    regions.iter().any(|r| r.contains(value))
}

fn looks_like_float(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    let value = f32::from_le_bytes(bytes[..4].try_into().unwrap());
    value.is_finite() && FLOAT_MAGNITUDE_RANGE.contains(&(value.abs() as f64))
}

fn looks_like_double(bytes: &[u8]) -> bool {
    if bytes.len() < 8 {
        return false;
    }
    let value = f64::from_le_bytes(bytes[..8].try_into().unwrap());
    value.is_finite() && FLOAT_MAGNITUDE_RANGE.contains(&value.abs())
}

fn owning_region<'a>(regions: &'a [MemoryRegion], address: u64) -> Option<&'a MemoryRegion> {
    regions.iter().find(|r| r.contains(address))
}

/// Scores every address in `addresses` (which need not be pre-sorted). Reads 8
/// bytes at each address; addresses whose read fails are skipped (no score entry
/// is produced for them).
pub fn analyze(target: &TargetHandle, addresses: &[u64]) -> crate::error::Result<Vec<MetaScore>> {
    let mut sorted = addresses.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let labels = cluster_labels(&sorted);
    let regions = target.regions()?;

    let mut out = Vec::with_capacity(sorted.len());
    for (address, cluster_label) in sorted.into_iter().zip(labels) {
        let bytes = match target.read(address, 8) {
            Ok(b) => b,
            Err(_) => continue,
        };

        let mut score = 0i32;
        let mut best_guess = BestGuess::Unknown;
        let mut best_weight = 0i32;

        let mut consider = |matched: bool, weight: i32, guess: BestGuess| {
            if matched {
                score += weight;
                if weight > best_weight {
                    best_weight = weight;
                    best_guess = guess;
                }
            }
        };
        consider(looks_like_string(&bytes), 25, BestGuess::String);
        consider(looks_like_pointer(&bytes, &regions), 40, BestGuess::Pointer);
        consider(looks_like_float(&bytes), 15, BestGuess::Float);
        consider(looks_like_double(&bytes), 12, BestGuess::Double);
        if cluster_label.is_some() {
            score += 10;
        }
        if let Some(region) = owning_region(&regions, address) {
            if region.writable {
                score += 5;
            }
            if region.executable {
                score -= 3;
            }
        }

        out.push(MetaScore {
            address,
            cluster_label,
            score,
            best_guess,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clusters_nearby_addresses() {
        let labels = cluster_labels(&[0x1000, 0x1010, 0x1020, 0x9000]);
        assert!(labels[0].is_some());
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert!(labels[3].is_none());
    }

    #[test]
    fn string_heuristic_requires_printable_and_nonzero() {
        assert!(looks_like_string(b"hello\0\0\0"));
        assert!(!looks_like_string(&[0u8; 8]));
        assert!(!looks_like_string(&[0x01, 0x02, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn float_heuristic_respects_magnitude_range() {
        assert!(looks_like_float(&3.14f32.to_le_bytes()));
        assert!(!looks_like_float(&0.0f32.to_le_bytes()));
        assert!(!looks_like_float(&1e20f32.to_le_bytes()));
    }
}
