use anyhow::{Context, Result};
use needletail::parse_fastx_file;
use std::path::Path;

use crate::filter::FilterCounters;
use crate::record::Record;

/// One tolerated mismatch per this many matching bases.
const MISMATCH_UNIT: usize = 8;
/// Hard cap on mismatches in a homopolymer run.
const POLY_MAX_MISMATCH: usize = 5;
/// Minimum adapter overlap considered a match.
const MIN_ADAPTER_OVERLAP: usize = 4;
/// Minimum tail A-run removed by polyA trimming.
const POLY_A_MIN_LEN: usize = 10;

fn same_base(a: u8, b: u8) -> bool {
    a.to_ascii_uppercase() == b.to_ascii_uppercase()
}

/// Longest tail run of `base` allowing one mismatch per `MISMATCH_UNIT`
/// bases, capped at `POLY_MAX_MISMATCH` mismatches total. The run is
/// anchored at the outermost matching base, so mismatches at the scan
/// frontier never extend the cut.
fn poly_tail_run(seq: &[u8], base: u8) -> usize {
    let len = seq.len();
    let mut mismatches = 0;
    let mut run = 0;
    for i in 0..len {
        if same_base(seq[len - 1 - i], base) {
            run = i + 1;
        } else {
            mismatches += 1;
        }
        let allowed = (i + 1) / MISMATCH_UNIT;
        if mismatches > POLY_MAX_MISMATCH || mismatches > allowed {
            break;
        }
    }
    run
}

fn trim_poly_tail(
    r: &mut Record,
    counters: &mut FilterCounters,
    base: u8,
    min_len: usize,
) -> bool {
    let run = poly_tail_run(&r.seq, base);
    if run >= min_len.max(1) {
        let keep = r.len() - run;
        r.resize(keep);
        counters.poly_trimmed_reads += 1;
        counters.poly_trimmed_bases += run as u64;
        true
    } else {
        false
    }
}

/// Remove a polyG tail (a sequencing artifact on two-color instruments).
pub fn trim_poly_g(r: &mut Record, counters: &mut FilterCounters, min_len: usize) -> bool {
    trim_poly_tail(r, counters, b'G', min_len)
}

/// Remove the longest homopolymer tail of any base.
pub fn trim_poly_x(r: &mut Record, counters: &mut FilterCounters, min_len: usize) -> bool {
    let (base, run) = [b'A', b'C', b'G', b'T']
        .iter()
        .map(|&b| (b, poly_tail_run(&r.seq, b)))
        .max_by_key(|&(_, run)| run)
        .unwrap_or((b'A', 0));
    if run >= min_len.max(1) {
        trim_poly_tail(r, counters, base, min_len)
    } else {
        false
    }
}

/// Hamming distance bounded by `limit`; returns `None` once exceeded.
/// `N` in either sequence counts as a mismatch.
fn bounded_mismatches(a: &[u8], b: &[u8], limit: usize) -> Option<usize> {
    let mut mismatches = 0;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x.to_ascii_uppercase(), y.to_ascii_uppercase());
        if x != y || x == b'N' || y == b'N' {
            mismatches += 1;
            if mismatches > limit {
                return None;
            }
        }
    }
    Some(mismatches)
}

/// Leftmost position where `adapter` matches the read with at most one
/// mismatch per `MISMATCH_UNIT` overlapping bases. Partial overlaps at the
/// read tail are accepted down to `MIN_ADAPTER_OVERLAP` bases.
fn find_adapter(seq: &[u8], adapter: &[u8]) -> Option<usize> {
    if seq.len() < MIN_ADAPTER_OVERLAP || adapter.len() < MIN_ADAPTER_OVERLAP {
        return None;
    }
    for pos in 0..=seq.len() - MIN_ADAPTER_OVERLAP {
        let overlap = adapter.len().min(seq.len() - pos);
        let allowed = overlap / MISMATCH_UNIT;
        if bounded_mismatches(&seq[pos..pos + overlap], &adapter[..overlap], allowed).is_some() {
            return Some(pos);
        }
    }
    None
}

/// Trim a known adapter sequence from the read tail. Returns whether a
/// trim happened. The read counter is only bumped when `count_trim` is
/// set, so a chain of adapter steps counts each read at most once.
pub fn trim_by_sequence(
    r: &mut Record,
    counters: &mut FilterCounters,
    adapter: &[u8],
    count_trim: bool,
) -> bool {
    match find_adapter(&r.seq, adapter) {
        Some(pos) => {
            let removed = (r.len() - pos) as u64;
            r.resize(pos);
            counters.adapter_trimmed_bases += removed;
            if count_trim {
                counters.adapter_trimmed_reads += 1;
            }
            true
        }
        None => false,
    }
}

/// Try every adapter from a FASTA set against the read.
pub fn trim_by_multi_sequences(
    r: &mut Record,
    counters: &mut FilterCounters,
    adapters: &[Vec<u8>],
    count_trim: bool,
) -> bool {
    let mut trimmed = false;
    for adapter in adapters {
        if trim_by_sequence(r, counters, adapter, count_trim && !trimmed) {
            trimmed = true;
        }
    }
    trimmed
}

/// Trim a polyA tail, counted as adapter trimming.
pub fn trim_poly_a(r: &mut Record, counters: &mut FilterCounters, count_trim: bool) -> bool {
    let run = poly_tail_run(&r.seq, b'A');
    if run >= POLY_A_MIN_LEN {
        let keep = r.len() - run;
        r.resize(keep);
        counters.adapter_trimmed_bases += run as u64;
        if count_trim {
            counters.adapter_trimmed_reads += 1;
        }
        true
    } else {
        false
    }
}

/// Load adapter sequences from a FASTA file, uppercased.
pub fn load_adapter_fasta(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut reader = parse_fastx_file(path)
        .with_context(|| format!("Failed to open adapter FASTA {}", path.display()))?;
    let mut adapters = Vec::new();
    while let Some(rec) = reader.next() {
        let rec = rec.with_context(|| format!("Failed to parse adapter FASTA {}", path.display()))?;
        adapters.push(rec.seq().to_ascii_uppercase());
    }
    Ok(adapters)
}
