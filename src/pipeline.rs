use anyhow::{anyhow, Context, Result};
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::dict::{abundance_line, Dictionary};
use crate::dup::{DuplicateEstimator, DuplicationResult};
use crate::filter::{Filter, FilterCounters, FilterReason};
use crate::io::{FastqSource, SplitWriter};
use crate::queue::{Batch, BatchQueue};
use crate::rarefaction::rarefaction_curve;
use crate::search::{PeptideIndex, TransSearcher};
use crate::state::RunState;
use crate::stats::ReadStats;
use crate::trimmer::{
    trim_by_multi_sequences, trim_by_sequence, trim_poly_a, trim_poly_g, trim_poly_x,
};
use crate::umi::UmiExtractor;
use crate::writer::WriterSink;

pub const BATCH_SIZE: usize = 1000;
pub const QUEUE_CAPACITY: usize = 1000;
/// Queue residency (in batches) above which the producer pauses.
pub const MEM_LIMIT: u64 = 5;
/// Primary-sink backlog (in bytes) above which the producer pauses.
pub const WRITER_BACKLOG_LIMIT: usize = 16 << 20;
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(1);

/// The writer sinks of one run. Split mode bypasses only the primary
/// output (workers write their own shard files); the failed and KO-map
/// sinks stay shared.
struct Sinks {
    left: Option<WriterSink>,
    failed: Option<WriterSink>,
    ko_map: Option<WriterSink>,
}

impl Sinks {
    fn build(config: &Config) -> Self {
        let left = match (&config.out1, config.output_to_stdout, config.split.enabled) {
            (Some(path), false, false) => Some(WriterSink::new(path)),
            _ => None,
        };
        Sinks {
            left,
            failed: config.failed_out.as_deref().map(WriterSink::new),
            ko_map: config.reads_ko_map.as_deref().map(WriterSink::new),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &WriterSink> {
        self.left
            .iter()
            .chain(self.failed.iter())
            .chain(self.ko_map.iter())
    }

    fn mark_all_completed(&self) {
        for sink in self.iter() {
            sink.mark_input_completed();
        }
    }
}

/// Per-worker mutable state: local stats, counters and the partial hit
/// map inside the searcher. Consumed by the merge phase.
struct WorkerContext {
    filter: Filter,
    umi: UmiExtractor,
    searcher: TransSearcher,
    pre_stats: ReadStats,
    post_stats: ReadStats,
    counters: FilterCounters,
    reads_passed: u64,
    split_writer: Option<SplitWriter>,
}

impl WorkerContext {
    fn new(config: &Arc<Config>, index: &Arc<PeptideIndex>, worker_id: usize) -> Self {
        let split_writer = match (&config.out1, config.split.enabled) {
            (Some(out1), true) => Some(SplitWriter::new(
                out1,
                worker_id,
                config.thread,
                config.split.limit,
            )),
            _ => None,
        };
        WorkerContext {
            filter: Filter::new(config.clone()),
            umi: UmiExtractor::new(config.umi.len),
            searcher: TransSearcher::new(index.clone()),
            pre_stats: ReadStats::default(),
            post_stats: ReadStats::default(),
            counters: FilterCounters::default(),
            reads_passed: 0,
            split_writer,
        }
    }
}

struct ProducerSummary {
    raw_reads: u64,
    slept: u64,
}

/// Everything the report writers need once a run has finished.
pub struct PipelineResult {
    pub pre_stats: ReadStats,
    pub post_stats: ReadStats,
    pub counters: FilterCounters,
    pub global_hits: BTreeMap<u32, u32>,
    pub run: RunState,
    pub duplication: Option<DuplicationResult>,
    /// Producer backpressure pauses, for diagnostics.
    pub slept: u64,
}

/// Single-producer / many-worker / multi-writer read pipeline.
pub struct ReadProcessor {
    config: Arc<Config>,
    dict: Arc<Dictionary>,
    index: Arc<PeptideIndex>,
}

impl ReadProcessor {
    pub fn new(config: Arc<Config>, dict: Arc<Dictionary>, index: Arc<PeptideIndex>) -> Self {
        ReadProcessor {
            config,
            dict,
            index,
        }
    }

    pub fn run(&self) -> Result<PipelineResult> {
        self.config.validate()?;
        let mut run = RunState::start();
        run.db_ids = self.index.id_count() as u64;

        let queue = BatchQueue::new(QUEUE_CAPACITY);
        let sinks = Sinks::build(&self.config);
        let output_lock = Mutex::new(());
        let finished_workers = AtomicUsize::new(0);
        let dup = self.config.duplicate.enabled.then(DuplicateEstimator::new);

        let (producer_out, worker_outs, writer_outs) = thread::scope(|s| {
            let producer = {
                let queue = &queue;
                let left = sinks.left.as_ref();
                s.spawn(move || self.produce(queue, left))
            };
            let worker_handles: Vec<_> = (0..self.config.thread)
                .map(|worker_id| {
                    let queue = &queue;
                    let sinks = &sinks;
                    let output_lock = &output_lock;
                    let finished = &finished_workers;
                    let dup = dup.as_ref();
                    s.spawn(move || self.consume(worker_id, queue, sinks, output_lock, finished, dup))
                })
                .collect();
            let writer_handles: Vec<_> = sinks
                .iter()
                .map(|sink| s.spawn(move || sink.run()))
                .collect();

            let producer_out = producer.join();
            let worker_outs: Vec<_> = worker_handles.into_iter().map(|h| h.join()).collect();
            let writer_outs: Vec<_> = writer_handles.into_iter().map(|h| h.join()).collect();
            (producer_out, worker_outs, writer_outs)
        });

        let producer_summary =
            producer_out.map_err(|_| anyhow!("producer thread panicked"))??;

        if self.config.verbose {
            eprintln!("[orthomap] all threads joined, start to generate results");
        }

        let mut pre_parts = Vec::new();
        let mut post_parts = Vec::new();
        let mut counter_parts = Vec::new();
        let mut global_hits: BTreeMap<u32, u32> = BTreeMap::new();
        let mut clean_reads = 0u64;
        let mut mapped_reads = 0u64;
        for out in worker_outs {
            let ctx = out.map_err(|_| anyhow!("worker thread panicked"))??;
            pre_parts.push(ctx.pre_stats);
            post_parts.push(ctx.post_stats);
            counter_parts.push(ctx.counters);
            clean_reads += ctx.reads_passed;
            mapped_reads += ctx.searcher.mapped_reads;
            for (id, count) in ctx.searcher.hits {
                *global_hits.entry(id).or_insert(0) += count;
            }
        }
        for out in writer_outs {
            out.map_err(|_| anyhow!("writer thread panicked"))??;
        }

        run.total_raw_reads = producer_summary.raw_reads;
        run.total_clean_reads = clean_reads;
        run.total_mapped_reads = global_hits.values().map(|&c| c as u64).sum();
        run.distinct_mapped_ids = global_hits.len() as u64;
        debug_assert_eq!(run.total_mapped_reads, mapped_reads);

        self.prepare_results(&global_hits, &mut run)?;

        Ok(PipelineResult {
            pre_stats: ReadStats::merge(pre_parts),
            post_stats: ReadStats::merge(post_parts),
            counters: FilterCounters::merge(counter_parts),
            global_hits,
            run,
            duplication: dup.map(|d| d.report(self.config.duplicate.hist_size)),
            slept: producer_summary.slept,
        })
    }

    fn produce(&self, queue: &BatchQueue, left: Option<&WriterSink>) -> Result<ProducerSummary> {
        let result = self.produce_inner(queue, left);
        // unblock workers on every exit path
        queue.mark_produce_finished();
        result
    }

    fn produce_inner(
        &self,
        queue: &BatchQueue,
        left: Option<&WriterSink>,
    ) -> Result<ProducerSummary> {
        let config = &self.config;
        let mut source =
            FastqSource::open(&config.in1, config.phred64, config.fastq_buffer_size)?;
        let progress = config.verbose.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_message("loading reads");
            pb
        });
        let mut batch: Batch = Vec::with_capacity(BATCH_SIZE);
        let mut total: u64 = 0;
        let mut slept: u64 = 0;
        let cap = config.reads_to_process;

        loop {
            let Some(record) = source.read()? else {
                break;
            };
            batch.push(record);
            total += 1;
            let cap_hit = cap > 0 && total >= cap;
            if batch.len() == BATCH_SIZE || cap_hit {
                queue.enqueue(std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE)));
                // pace against the workers
                while queue.residency() > MEM_LIMIT {
                    slept += 1;
                    thread::sleep(BACKPRESSURE_PAUSE);
                }
                // pace against the primary writer, checked only every
                // MEM_LIMIT batches
                if total % (BATCH_SIZE as u64 * MEM_LIMIT) == 0 {
                    if let Some(sink) = left {
                        while sink.pending_bytes() > WRITER_BACKLOG_LIMIT {
                            slept += 1;
                            thread::sleep(BACKPRESSURE_PAUSE);
                        }
                    }
                }
                if let Some(pb) = &progress {
                    if total % 1_000_000 == 0 {
                        pb.set_message(format!("loaded {}M reads", total / 1_000_000));
                    }
                }
                if cap_hit {
                    break;
                }
            }
        }
        if !batch.is_empty() {
            queue.enqueue(batch);
        }
        if let Some(pb) = &progress {
            pb.finish_with_message(format!("loaded {} reads", total));
        }
        Ok(ProducerSummary {
            raw_reads: total,
            slept,
        })
    }

    fn consume(
        &self,
        worker_id: usize,
        queue: &BatchQueue,
        sinks: &Sinks,
        output_lock: &Mutex<()>,
        finished: &AtomicUsize,
        dup: Option<&DuplicateEstimator>,
    ) -> Result<WorkerContext> {
        let mut ctx = WorkerContext::new(&self.config, &self.index, worker_id);
        let mut result = Ok(());
        while let Some(batch) = queue.dequeue() {
            if let Err(e) = self.process_batch(batch, &mut ctx, sinks, output_lock, dup) {
                result = Err(e);
                // keep draining so the producer never blocks on a full queue
                while queue.dequeue().is_some() {}
                break;
            }
        }
        if let Some(w) = ctx.split_writer.as_mut() {
            if let Err(e) = w.finish() {
                result = result.and(Err(e));
            }
        }
        // the last worker out signals the sinks, on success and failure alike
        if finished.fetch_add(1, Ordering::AcqRel) + 1 == self.config.thread {
            sinks.mark_all_completed();
        }
        result.map(|()| ctx)
    }

    fn process_batch(
        &self,
        batch: Batch,
        ctx: &mut WorkerContext,
        sinks: &Sinks,
        output_lock: &Mutex<()>,
        dup: Option<&DuplicateEstimator>,
    ) -> Result<()> {
        let config = &self.config;
        let want_out =
            config.output_to_stdout || config.split.enabled || sinks.left.is_some();
        let mut out_buf = String::new();
        let mut failed_buf = String::new();
        let mut ko_buf = String::new();
        let mut batch_reads = 0u64;
        let mut batch_passed = 0u64;

        for mut r0 in batch {
            batch_reads += 1;
            ctx.pre_stats.stat(&r0);
            if let Some(d) = dup {
                d.stat(&r0);
            }
            if config.index_filter.enabled && ctx.filter.filter_by_index(&r0) {
                continue;
            }
            if config.fix_mgi {
                r0.fix_mgi();
            }
            if config.umi.enabled {
                ctx.umi.process(&mut r0);
            }

            let mut front_trimmed = 0usize;
            let mut r1 = ctx.filter.trim_and_cut(
                &r0,
                config.trim.front1,
                config.trim.tail1,
                &mut front_trimmed,
            );
            ctx.counters.front_trimmed_bases += front_trimmed as u64;

            if let Some(r) = r1.as_mut() {
                if config.poly_g.enabled {
                    trim_poly_g(r, &mut ctx.counters, config.poly_g.min_len);
                }
                if config.adapter.enabled {
                    let mut trimmed = false;
                    if let Some(seq) = &config.adapter.sequence {
                        trimmed = trim_by_sequence(r, &mut ctx.counters, seq, true);
                    }
                    let count_trim = !trimmed;
                    if !config.adapter.fasta.is_empty() {
                        trim_by_multi_sequences(r, &mut ctx.counters, &config.adapter.fasta, count_trim);
                    }
                    if config.adapter.poly_a {
                        trim_poly_a(r, &mut ctx.counters, count_trim);
                    }
                }
                if config.poly_x.enabled {
                    trim_poly_x(r, &mut ctx.counters, config.poly_x.min_len);
                }
                if config.trim.max_len1 > 0 && config.trim.max_len1 < r.len() {
                    r.resize(config.trim.max_len1);
                }
            }

            let reason = match r1.as_ref() {
                Some(r) => ctx.filter.pass_filter(r),
                None => FilterReason::TooShort,
            };
            ctx.counters.add(reason, 1);

            if let (Some(r), FilterReason::Pass) = (r1.as_ref(), reason) {
                match ctx.searcher.search(r) {
                    Some(id) => {
                        if want_out {
                            out_buf.push_str(&r.to_fastq_with_tag(&format!("s2f_{}", id)));
                        }
                        if sinks.ko_map.is_some() {
                            ko_buf.push_str(&format!("{}\ts2f_{}\n", r.trimmed_name(), id));
                        }
                    }
                    // a search miss is not a failure: the read passes
                    // through untagged
                    None => {
                        if want_out {
                            out_buf.push_str(&r.to_fastq());
                        }
                    }
                }
                ctx.post_stats.stat(r);
                batch_passed += 1;
            } else if sinks.failed.is_some() {
                failed_buf.push_str(&r0.to_fastq_with_tag(reason.tag()));
            }
        }
        ctx.reads_passed += batch_passed;

        // split mode: the primary stream goes to this worker's own shard,
        // no lock needed for it
        if config.split.enabled {
            if let Some(w) = ctx.split_writer.as_mut() {
                w.write(out_buf.as_bytes())?;
                let units = if config.split.by_file_lines {
                    batch_passed
                } else {
                    batch_reads
                };
                w.mark_processed(units)?;
            }
        }

        // one worker's buffers land as an atomic group
        let _guard = output_lock.lock().unwrap();
        if !config.split.enabled {
            if config.output_to_stdout {
                std::io::stdout()
                    .lock()
                    .write_all(out_buf.as_bytes())
                    .context("Failed to write to stdout")?;
            }
            if let Some(left) = &sinks.left {
                left.submit(out_buf.into_bytes());
            }
        }
        if let Some(failed) = &sinks.failed {
            if !failed_buf.is_empty() {
                failed.submit(failed_buf.into_bytes());
            }
        }
        if let Some(ko) = &sinks.ko_map {
            if !ko_buf.is_empty() {
                ko.submit(ko_buf.into_bytes());
            }
        }
        Ok(())
    }

    /// Post-processing on the main thread: abundance table first, then the
    /// one-shot rarefaction task (joined before the reports), then
    /// run-level metrics.
    fn prepare_results(&self, global_hits: &BTreeMap<u32, u32>, run: &mut RunState) -> Result<()> {
        let config = &self.config;
        let path = PathBuf::from(format!("{}_s2fid_abundance.txt", config.prefix));
        let file = File::create(&path)
            .with_context(|| format!("Can not open abundance file {}", path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(b"#s2f_id\tReads_count\tannotation\n")?;
        for (&id, &count) in global_hits {
            out.write_all(abundance_line(&self.dict, id, count).as_bytes())?;
        }
        out.flush()
            .with_context(|| format!("Failed to write abundance file {}", path.display()))?;
        if config.verbose {
            eprintln!("[orthomap] wrote abundance table {}", path.display());
        }

        if config.profiling && run.total_mapped_reads > 0 {
            let hits = global_hits.clone();
            let total_raw = run.total_raw_reads;
            let handle = thread::spawn(move || rarefaction_curve(&hits, total_raw));
            run.rarefaction = handle
                .join()
                .map_err(|_| anyhow!("rarefaction thread panicked"))?;
        }
        run.mark_finished();
        run.publish_sample(&config.prefix);
        Ok(())
    }
}
