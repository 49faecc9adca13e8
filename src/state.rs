use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Per-sample results published once the pipeline has finished.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleResult {
    pub prefix: String,
    pub total_raw_reads: u64,
    pub total_clean_reads: u64,
    pub clean_reads_rate: f64,
    pub mapped_reads: u64,
    pub mapped_reads_rate: f64,
    pub distinct_ids: u64,
    pub db_ids: u64,
    pub id_rate: f64,
    pub seconds: f64,
    pub rarefaction: BTreeMap<u64, u64>,
}

/// Process-wide run record. Created before the pipeline starts; fields are
/// set monotonically at phase boundaries and read by the report writers
/// after the pipeline ends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunState {
    pub total_raw_reads: u64,
    pub total_clean_reads: u64,
    pub total_mapped_reads: u64,
    pub distinct_mapped_ids: u64,
    pub db_ids: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub seconds: f64,
    pub rarefaction: BTreeMap<u64, u64>,
    pub samples: Vec<SampleResult>,
}

impl RunState {
    pub fn start() -> Self {
        RunState {
            start_time: unix_seconds(SystemTime::now()),
            ..RunState::default()
        }
    }

    pub fn mark_finished(&mut self) {
        self.end_time = unix_seconds(SystemTime::now());
        self.seconds = self.end_time.saturating_sub(self.start_time) as f64;
    }

    pub fn clean_reads_rate(&self) -> f64 {
        percentage(self.total_clean_reads, self.total_raw_reads)
    }

    pub fn mapped_reads_rate(&self) -> f64 {
        percentage(self.total_mapped_reads, self.total_raw_reads)
    }

    /// Record this run's numbers as a per-sample entry.
    pub fn publish_sample(&mut self, prefix: &str) {
        let sample = SampleResult {
            prefix: prefix.to_string(),
            total_raw_reads: self.total_raw_reads,
            total_clean_reads: self.total_clean_reads,
            clean_reads_rate: self.clean_reads_rate(),
            mapped_reads: self.total_mapped_reads,
            mapped_reads_rate: self.mapped_reads_rate(),
            distinct_ids: self.distinct_mapped_ids,
            db_ids: self.db_ids,
            id_rate: percentage(self.distinct_mapped_ids, self.db_ids),
            seconds: self.seconds,
            rarefaction: self.rarefaction.clone(),
        };
        self.samples.push(sample);
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        let mut run = RunState::start();
        run.total_raw_reads = 200;
        run.total_clean_reads = 150;
        run.total_mapped_reads = 50;
        assert_eq!(run.clean_reads_rate(), 75.0);
        assert_eq!(run.mapped_reads_rate(), 25.0);
    }

    #[test]
    fn test_zero_raw_reads_rate_is_zero() {
        let run = RunState::default();
        assert_eq!(run.clean_reads_rate(), 0.0);
    }

    #[test]
    fn test_publish_sample_snapshot() {
        let mut run = RunState::start();
        run.total_raw_reads = 10;
        run.total_mapped_reads = 4;
        run.distinct_mapped_ids = 2;
        run.db_ids = 8;
        run.mark_finished();
        run.publish_sample("sampleA");
        assert_eq!(run.samples.len(), 1);
        let s = &run.samples[0];
        assert_eq!(s.prefix, "sampleA");
        assert_eq!(s.mapped_reads, 4);
        assert_eq!(s.id_rate, 25.0);
    }
}
