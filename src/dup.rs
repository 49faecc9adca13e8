use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::record::Record;

const KEY_BITS: usize = 22;
const SLOTS: usize = 1 << KEY_BITS;
/// Bases hashed into the duplication key.
const KEY_PREFIX_LEN: usize = 32;

/// Approximate duplication profiler shared by every worker.
///
/// Reads are keyed by a hash of their leading bases into a fixed slot
/// table; slot counters are atomic so workers feed it without locking.
/// Collisions overestimate duplication slightly, which is acceptable for
/// the report (and single-end duplication is an overestimate anyway).
pub struct DuplicateEstimator {
    counts: Vec<AtomicU32>,
    gc_percent: Vec<AtomicU8>,
}

/// Aggregate duplication numbers for the report.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicationResult {
    pub rate: f64,
    pub histogram: Vec<u64>,
    pub mean_gc: Vec<f64>,
}

impl DuplicateEstimator {
    pub fn new() -> Self {
        let mut counts = Vec::with_capacity(SLOTS);
        counts.resize_with(SLOTS, || AtomicU32::new(0));
        let mut gc_percent = Vec::with_capacity(SLOTS);
        gc_percent.resize_with(SLOTS, || AtomicU8::new(0));
        DuplicateEstimator { counts, gc_percent }
    }

    fn key(r: &Record) -> usize {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in r.seq.iter().take(KEY_PREFIX_LEN) {
            let code = match b.to_ascii_uppercase() {
                b'A' => 0u64,
                b'C' => 1,
                b'G' => 2,
                b'T' => 3,
                _ => 0,
            };
            h ^= code;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (h as usize) & (SLOTS - 1)
    }

    pub fn stat(&self, r: &Record) {
        if r.is_empty() {
            return;
        }
        let idx = Self::key(r);
        let prev = self.counts[idx].fetch_add(1, Ordering::Relaxed);
        if prev == 0 {
            let gc = r
                .seq
                .iter()
                .filter(|&&b| matches!(b.to_ascii_uppercase(), b'G' | b'C'))
                .count();
            let percent = (gc * 100 / r.len()) as u8;
            self.gc_percent[idx].store(percent, Ordering::Relaxed);
        }
    }

    /// Duplication rate plus a multiplicity histogram of `hist_size`
    /// buckets (the last bucket collects everything at or above it).
    pub fn report(&self, hist_size: usize) -> DuplicationResult {
        let hist_size = hist_size.max(2);
        let mut histogram = vec![0u64; hist_size];
        let mut gc_sums = vec![0u64; hist_size];
        let mut distinct = 0u64;
        let mut total = 0u64;
        for (count, gc) in self.counts.iter().zip(&self.gc_percent) {
            let c = count.load(Ordering::Relaxed) as u64;
            if c == 0 {
                continue;
            }
            distinct += 1;
            total += c;
            let bucket = (c as usize).min(hist_size - 1);
            histogram[bucket] += 1;
            gc_sums[bucket] += gc.load(Ordering::Relaxed) as u64;
        }
        let mean_gc = histogram
            .iter()
            .zip(&gc_sums)
            .map(|(&n, &sum)| if n == 0 { 0.0 } else { sum as f64 / n as f64 / 100.0 })
            .collect();
        let rate = if total == 0 {
            0.0
        } else {
            1.0 - distinct as f64 / total as f64
        };
        DuplicationResult {
            rate,
            histogram,
            mean_gc,
        }
    }
}
