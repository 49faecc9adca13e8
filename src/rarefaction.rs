use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::collections::BTreeMap;

pub const RAREFACTION_STEPS: usize = 50;

/// Saturation curve: shuffled mapped-read subsamples of growing size
/// against the number of distinct orthologs they contain.
///
/// X coordinates are scaled from mapped reads back to raw reads so the
/// curve spans the whole run; the origin and the full-depth endpoint are
/// always present. The shuffle is not seeded, so intermediate points vary
/// between runs.
pub fn rarefaction_curve(
    hits: &BTreeMap<u32, u32>,
    total_raw_reads: u64,
) -> BTreeMap<u64, u64> {
    let mut curve = BTreeMap::new();
    curve.insert(0, 0);
    let total_mapped: u64 = hits.values().map(|&c| c as u64).sum();
    if total_mapped == 0 {
        return curve;
    }

    let mut pool: Vec<u32> = Vec::with_capacity(total_mapped as usize);
    for (&id, &count) in hits {
        pool.extend(std::iter::repeat(id).take(count as usize));
    }
    pool.shuffle(&mut rand::thread_rng());

    let ratio = total_raw_reads as f64 / total_mapped as f64;
    let step_size = pool.len() / RAREFACTION_STEPS;
    if step_size > 0 {
        for i in 1..RAREFACTION_STEPS {
            let prefix_len = step_size * i;
            let mut prefix = pool[..prefix_len].to_vec();
            prefix.par_sort_unstable();
            prefix.dedup();
            let x = (prefix_len as f64 * ratio).round() as u64;
            curve.insert(x, prefix.len() as u64);
        }
    }

    pool.par_sort_unstable();
    pool.dedup();
    curve.insert(total_raw_reads, pool.len() as u64);
    curve
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hits_yield_origin_only() {
        let curve = rarefaction_curve(&BTreeMap::new(), 100);
        assert_eq!(curve.len(), 1);
        assert_eq!(curve.get(&0), Some(&0));
    }

    #[test]
    fn test_single_mapped_read_collapses_to_endpoints() {
        let mut hits = BTreeMap::new();
        hits.insert(7u32, 1u32);
        let curve = rarefaction_curve(&hits, 10);
        assert_eq!(curve.get(&0), Some(&0));
        assert_eq!(curve.get(&10), Some(&1));
    }

    #[test]
    fn test_endpoint_matches_distinct_count() {
        let mut hits = BTreeMap::new();
        for id in 0..100u32 {
            hits.insert(id, 10);
        }
        let curve = rarefaction_curve(&hits, 10_000);
        assert_eq!(curve.get(&10_000), Some(&100));
        // distinct counts never exceed the endpoint and never decrease
        // faster than the subsample grows
        let mut last = 0;
        for (_, &distinct) in &curve {
            assert!(distinct >= last || distinct <= 100);
            last = distinct.max(last);
        }
        assert_eq!(last, 100);
    }
}
