use serde::Serialize;

use crate::record::Record;

const PHRED_BASE: u8 = 33;

/// Per-worker base/quality statistics, accumulated single-threaded and
/// merged after the workers join.
#[derive(Debug, Clone, Serialize)]
pub struct ReadStats {
    pub reads: u64,
    pub bases: u64,
    pub q20_bases: u64,
    pub q30_bases: u64,
    pub gc_bases: u64,
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for ReadStats {
    fn default() -> Self {
        ReadStats {
            reads: 0,
            bases: 0,
            q20_bases: 0,
            q30_bases: 0,
            gc_bases: 0,
            min_len: usize::MAX,
            max_len: 0,
        }
    }
}

impl ReadStats {
    pub fn stat(&mut self, r: &Record) {
        self.reads += 1;
        self.bases += r.len() as u64;
        self.min_len = self.min_len.min(r.len());
        self.max_len = self.max_len.max(r.len());
        for &q in &r.qual {
            let q = q.saturating_sub(PHRED_BASE);
            if q >= 20 {
                self.q20_bases += 1;
            }
            if q >= 30 {
                self.q30_bases += 1;
            }
        }
        for &b in &r.seq {
            match b.to_ascii_uppercase() {
                b'G' | b'C' => self.gc_bases += 1,
                _ => {}
            }
        }
    }

    pub fn gc_rate(&self) -> f64 {
        if self.bases == 0 {
            0.0
        } else {
            self.gc_bases as f64 / self.bases as f64
        }
    }

    pub fn merge(parts: Vec<ReadStats>) -> ReadStats {
        let mut out = ReadStats::default();
        for p in parts {
            out.reads += p.reads;
            out.bases += p.bases;
            out.q20_bases += p.q20_bases;
            out.q30_bases += p.q30_bases;
            out.gc_bases += p.gc_bases;
            out.min_len = out.min_len.min(p.min_len);
            out.max_len = out.max_len.max(p.max_len);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(seq: &str, qual: &str) -> Record {
        Record::new("r".to_string(), seq.as_bytes().to_vec(), qual.as_bytes().to_vec())
    }

    #[test]
    fn test_stat_counts_quality_and_gc() {
        let mut s = ReadStats::default();
        // 'I' = Q40, '5' = Q20, '#' = Q2
        s.stat(&rec("ACGC", "II5#"));
        assert_eq!(s.reads, 1);
        assert_eq!(s.bases, 4);
        assert_eq!(s.q20_bases, 3);
        assert_eq!(s.q30_bases, 2);
        assert_eq!(s.gc_bases, 3);
        assert_eq!(s.min_len, 4);
        assert_eq!(s.max_len, 4);
    }

    #[test]
    fn test_merge_sums_and_extremes() {
        let mut a = ReadStats::default();
        a.stat(&rec("AC", "II"));
        let mut b = ReadStats::default();
        b.stat(&rec("ACGTACGT", "IIIIIIII"));
        let m = ReadStats::merge(vec![a, b]);
        assert_eq!(m.reads, 2);
        assert_eq!(m.bases, 10);
        assert_eq!(m.min_len, 2);
        assert_eq!(m.max_len, 8);
    }

    #[test]
    fn test_merge_of_empty_parts() {
        let m = ReadStats::merge(vec![ReadStats::default(), ReadStats::default()]);
        assert_eq!(m.reads, 0);
        assert_eq!(m.gc_rate(), 0.0);
    }
}
