use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::record::Record;

const PHRED_BASE: u8 = 33;

/// Outcome of `Filter::pass_filter` for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Pass,
    LowQuality,
    TooShort,
    TooLong,
    TooManyN,
}

impl FilterReason {
    /// Tag written to the failed-reads output.
    pub fn tag(self) -> &'static str {
        match self {
            FilterReason::Pass => "passed",
            FilterReason::LowQuality => "failed_quality_filter",
            FilterReason::TooShort => "failed_too_short",
            FilterReason::TooLong => "failed_too_long",
            FilterReason::TooManyN => "failed_too_many_N",
        }
    }
}

/// Per-worker filtering counters, merged after the workers join.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterCounters {
    pub passed: u64,
    pub low_quality: u64,
    pub too_short: u64,
    pub too_long: u64,
    pub too_many_n: u64,
    pub adapter_trimmed_reads: u64,
    pub adapter_trimmed_bases: u64,
    pub poly_trimmed_reads: u64,
    pub poly_trimmed_bases: u64,
    pub front_trimmed_bases: u64,
}

impl FilterCounters {
    pub fn add(&mut self, reason: FilterReason, n: u64) {
        match reason {
            FilterReason::Pass => self.passed += n,
            FilterReason::LowQuality => self.low_quality += n,
            FilterReason::TooShort => self.too_short += n,
            FilterReason::TooLong => self.too_long += n,
            FilterReason::TooManyN => self.too_many_n += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.passed + self.low_quality + self.too_short + self.too_long + self.too_many_n
    }

    pub fn merge(parts: Vec<FilterCounters>) -> FilterCounters {
        let mut out = FilterCounters::default();
        for p in parts {
            out.passed += p.passed;
            out.low_quality += p.low_quality;
            out.too_short += p.too_short;
            out.too_long += p.too_long;
            out.too_many_n += p.too_many_n;
            out.adapter_trimmed_reads += p.adapter_trimmed_reads;
            out.adapter_trimmed_bases += p.adapter_trimmed_bases;
            out.poly_trimmed_reads += p.poly_trimmed_reads;
            out.poly_trimmed_bases += p.poly_trimmed_bases;
            out.front_trimmed_bases += p.front_trimmed_bases;
        }
        out
    }
}

/// Stateless per-read filter, one per worker.
pub struct Filter {
    config: Arc<Config>,
}

impl Filter {
    pub fn new(config: Arc<Config>) -> Self {
        Filter { config }
    }

    /// Fixed head/tail trim followed by the sliding-window quality cut.
    ///
    /// Returns the trimmed copy, or `None` when nothing survives.
    /// `front_trimmed` reports the number of bases removed from the front.
    pub fn trim_and_cut(
        &self,
        r: &Record,
        front: usize,
        tail: usize,
        front_trimmed: &mut usize,
    ) -> Option<Record> {
        if front + tail >= r.len() {
            *front_trimmed = r.len().min(front);
            return None;
        }
        let mut rec = r.clone();
        rec.trim_front(front);
        *front_trimmed = front;
        if tail > 0 {
            let keep = rec.len() - tail;
            rec.resize(keep);
        }

        let cut = &self.config.quality_cut;
        if cut.enabled && rec.len() >= cut.window {
            let w = cut.window;
            let threshold = cut.mean_quality as u32 * w as u32;
            let mut keep = rec.len();
            while keep >= w {
                let sum: u32 = rec.qual[keep - w..keep]
                    .iter()
                    .map(|&q| q.saturating_sub(PHRED_BASE) as u32)
                    .sum();
                if sum >= threshold {
                    break;
                }
                keep -= 1;
            }
            if keep < w {
                keep = 0;
            }
            rec.resize(keep);
        }

        if rec.is_empty() {
            None
        } else {
            Some(rec)
        }
    }

    /// Classify a trimmed read.
    pub fn pass_filter(&self, r: &Record) -> FilterReason {
        let opts = &self.config.filter;
        let len = r.len();
        let low_qual = r
            .qual
            .iter()
            .filter(|&&q| q.saturating_sub(PHRED_BASE) < opts.qualified_phred)
            .count();
        if low_qual * 100 > opts.unqualified_percent as usize * len {
            return FilterReason::LowQuality;
        }
        let n_count = r.seq.iter().filter(|&&b| b == b'N' || b == b'n').count();
        if n_count > opts.n_base_limit {
            return FilterReason::TooManyN;
        }
        if len < opts.length_required {
            return FilterReason::TooShort;
        }
        if opts.length_limit > 0 && len > opts.length_limit {
            return FilterReason::TooLong;
        }
        FilterReason::Pass
    }

    /// True when the read's index (barcode) is on the drop list.
    pub fn filter_by_index(&self, r: &Record) -> bool {
        if self.config.index_filter.indexes.is_empty() {
            return false;
        }
        let token = r.name.split_whitespace().next().unwrap_or(&r.name);
        match token.rsplit(':').next() {
            Some(index) => self.config.index_filter.indexes.contains(index),
            None => false,
        }
    }
}
