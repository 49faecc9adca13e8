use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::io::FastqSource;
use crate::pipeline::{BATCH_SIZE, MEM_LIMIT, QUEUE_CAPACITY};
use crate::queue::{Batch, BatchQueue};
use crate::record::Record;
use crate::writer::WriterSink;

const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(1);

/// Demultiplex configuration: inputs are annotated FASTQ files whose read
/// names carry a feature id in the second tab-separated field.
#[derive(Debug, Clone, Default)]
pub struct ExtractConfig {
    pub inputs: Vec<PathBuf>,
    /// Features routed to their own bucket, in bucket order.
    pub targets_sub: Vec<String>,
    /// The full feature list; matches outside the subset go to the
    /// overflow bucket.
    pub targets_full: Vec<String>,
    pub out_dir: PathBuf,
    pub gzip: bool,
    pub verbose: bool,
}

impl ExtractConfig {
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            bail!("no input files given");
        }
        if self.targets_sub.is_empty() {
            bail!("no target features given");
        }
        Ok(())
    }
}

/// Load one feature id per line, `#` comments allowed.
pub fn load_target_list(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open target list {}", path.display()))?;
    let mut targets = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("Failed to read target list {}", path.display()))?;
        let token = line.trim();
        if token.is_empty() || token.starts_with('#') {
            continue;
        }
        targets.push(token.to_string());
    }
    Ok(targets)
}

/// Numbers reported after a demultiplex run.
#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    pub reads: u64,
    pub num_features: usize,
}

/// Routes annotated reads into one output per subset feature plus an
/// overflow bucket. Same producer/queue skeleton as the read pipeline,
/// with a single consumer feeding `K+1` writer sinks.
pub struct FeatureExtractor {
    config: ExtractConfig,
    feature_set: Mutex<HashSet<String>>,
    num_features: AtomicUsize,
}

impl FeatureExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        FeatureExtractor {
            config,
            feature_set: Mutex::new(HashSet::new()),
            num_features: AtomicUsize::new(0),
        }
    }

    /// Features seen so far, published after each batch.
    pub fn num_features(&self) -> usize {
        self.num_features.load(Ordering::Acquire)
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        let ext = if self.config.gzip { "fastq.gz" } else { "fastq" };
        self.config.out_dir.join(format!("{}.{}", name, ext))
    }

    pub fn run(&self) -> Result<ExtractSummary> {
        self.config.validate()?;
        std::fs::create_dir_all(&self.config.out_dir).with_context(|| {
            format!("Failed to create output dir {}", self.config.out_dir.display())
        })?;

        let mut sinks: Vec<WriterSink> = self
            .config
            .targets_sub
            .iter()
            .map(|t| WriterSink::new(&self.bucket_path(t)))
            .collect();
        sinks.push(WriterSink::new(&self.bucket_path("ungrouped")));

        let queue = BatchQueue::new(QUEUE_CAPACITY);

        let (producer_out, consumer_out, writer_outs) = thread::scope(|s| {
            let producer = {
                let queue = &queue;
                s.spawn(move || self.produce(queue))
            };
            let consumer = {
                let queue = &queue;
                let sinks = &sinks;
                s.spawn(move || self.consume(queue, sinks))
            };
            let writer_handles: Vec<_> = sinks
                .iter()
                .map(|sink| s.spawn(move || sink.run()))
                .collect();

            let producer_out = producer.join();
            let consumer_out = consumer.join();
            let writer_outs: Vec<_> = writer_handles.into_iter().map(|h| h.join()).collect();
            (producer_out, consumer_out, writer_outs)
        });

        let reads = producer_out.map_err(|_| anyhow!("producer thread panicked"))??;
        consumer_out.map_err(|_| anyhow!("consumer thread panicked"))??;
        for out in writer_outs {
            out.map_err(|_| anyhow!("writer thread panicked"))??;
        }

        Ok(ExtractSummary {
            reads,
            num_features: self.num_features(),
        })
    }

    fn produce(&self, queue: &BatchQueue) -> Result<u64> {
        let result = self.produce_inner(queue);
        queue.mark_produce_finished();
        result
    }

    fn produce_inner(&self, queue: &BatchQueue) -> Result<u64> {
        let mut total: u64 = 0;
        for input in &self.config.inputs {
            if self.config.verbose {
                eprintln!("[orthomap] processing sample {}", input.display());
            }
            let mut source = FastqSource::open(input, false, 1 << 20)?;
            let mut batch: Batch = Vec::with_capacity(BATCH_SIZE);
            loop {
                let Some(record) = source.read()? else {
                    break;
                };
                batch.push(record);
                total += 1;
                if batch.len() == BATCH_SIZE {
                    queue.enqueue(std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE)));
                    while queue.residency() > MEM_LIMIT {
                        thread::sleep(BACKPRESSURE_PAUSE);
                    }
                    if self.config.verbose && total % 100_000 == 0 {
                        eprintln!(
                            "[orthomap] loaded {}00K reads, detected {} of {} features",
                            total / 100_000,
                            self.num_features(),
                            self.config.targets_full.len()
                        );
                    }
                }
            }
            if !batch.is_empty() {
                queue.enqueue(batch);
            }
        }
        Ok(total)
    }

    fn consume(&self, queue: &BatchQueue, sinks: &[WriterSink]) -> Result<()> {
        while let Some(batch) = queue.dequeue() {
            self.route_batch(batch, sinks);
        }
        for sink in sinks {
            sink.mark_input_completed();
        }
        Ok(())
    }

    /// Route one batch into per-bucket buffers and submit the non-empty
    /// ones. Only subset matches count into the feature set.
    fn route_batch(&self, batch: Batch, sinks: &[WriterSink]) {
        let overflow = self.config.targets_sub.len();
        let mut outputs: Vec<String> = vec![String::new(); overflow + 1];
        for r in batch {
            if let Some(bucket) = self.route(&r) {
                outputs[bucket].push_str(&r.to_fastq());
            }
        }
        for (buf, sink) in outputs.into_iter().zip(sinks) {
            if !buf.is_empty() {
                sink.submit(buf.into_bytes());
            }
        }
        let count = self.feature_set.lock().unwrap().len();
        self.num_features.store(count, Ordering::Release);
    }

    fn route(&self, r: &Record) -> Option<usize> {
        let mut fields = r.name.split('\t');
        let _name = fields.next()?;
        let feature = fields.next()?;
        if !feature.starts_with('K') {
            return None;
        }
        if let Some(pos) = self
            .config
            .targets_sub
            .iter()
            .position(|t| t == feature)
        {
            self.feature_set
                .lock()
                .unwrap()
                .insert(feature.to_string());
            return Some(pos);
        }
        if self.config.targets_full.iter().any(|t| t == feature) {
            return Some(self.config.targets_sub.len());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn extractor(sub: &[&str], full: &[&str]) -> FeatureExtractor {
        FeatureExtractor::new(ExtractConfig {
            inputs: vec![],
            targets_sub: sub.iter().map(|s| s.to_string()).collect(),
            targets_full: full.iter().map(|s| s.to_string()).collect(),
            out_dir: PathBuf::from("."),
            gzip: false,
            verbose: false,
        })
    }

    fn rec(name: &str) -> Record {
        Record::new(name.to_string(), b"ACGT".to_vec(), b"IIII".to_vec())
    }

    #[test]
    fn test_route_subset_overflow_and_drop() {
        let x = extractor(&["K1", "K2"], &["K1", "K2", "K3"]);
        assert_eq!(x.route(&rec("r1\tK1")), Some(0));
        assert_eq!(x.route(&rec("r2\tK2")), Some(1));
        // full-list match outside the subset goes to the overflow bucket
        assert_eq!(x.route(&rec("r3\tK3")), Some(2));
        // unknown and non-K features are dropped
        assert_eq!(x.route(&rec("r4\tX9")), None);
        assert_eq!(x.route(&rec("r5\tK9")), None);
        // names without a feature field are dropped
        assert_eq!(x.route(&rec("r6")), None);
        // only subset matches count as detected features
        assert_eq!(x.feature_set.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_run_routes_reads_to_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("annotated.fastq");
        let mut f = File::create(&input).unwrap();
        for (name, feature) in [("r1", "K1"), ("r2", "K2"), ("r3", "K3"), ("r4", "X1")] {
            write!(f, "@{}\t{}\nACGT\n+\nIIII\n", name, feature).unwrap();
        }
        drop(f);

        let out_dir = dir.path().join("out");
        let x = FeatureExtractor::new(ExtractConfig {
            inputs: vec![input],
            targets_sub: vec!["K1".to_string(), "K2".to_string()],
            targets_full: vec!["K1".to_string(), "K2".to_string(), "K3".to_string()],
            out_dir: out_dir.clone(),
            gzip: false,
            verbose: false,
        });
        let summary = x.run().unwrap();
        assert_eq!(summary.reads, 4);
        assert_eq!(summary.num_features, 2);

        let k1 = std::fs::read_to_string(out_dir.join("K1.fastq")).unwrap();
        assert!(k1.contains("@r1\tK1"));
        let k2 = std::fs::read_to_string(out_dir.join("K2.fastq")).unwrap();
        assert!(k2.contains("@r2\tK2"));
        let ungrouped = std::fs::read_to_string(out_dir.join("ungrouped.fastq")).unwrap();
        assert!(ungrouped.contains("@r3\tK3"));
        assert!(!ungrouped.contains("r4"));
    }
}
