use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use orthomap::config::Config;
use orthomap::demux::{load_target_list, ExtractConfig, FeatureExtractor};
use orthomap::dict::Dictionary;
use orthomap::pipeline::ReadProcessor;
use orthomap::prefix_outputs;
use orthomap::report::{write_html_report, write_json_report, RunReport};
use orthomap::search::{PeptideIndex, DEFAULT_PEPTIDE_K};
use orthomap::trimmer::load_adapter_fasta;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Quantify protein ortholog groups from FASTQ reads"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter and trim reads, then map them against a protein ortholog database
    Quantify(QuantifyArgs),
    /// Split feature-annotated reads into per-feature FASTQ files
    Extract(ExtractArgs),
}

#[derive(Parser, Debug)]
struct QuantifyArgs {
    /// Input FASTQ file (plain or gzipped)
    #[arg(short, long)]
    input: PathBuf,

    /// Protein database FASTA; headers carry numeric ortholog ids
    #[arg(short, long)]
    database: PathBuf,

    /// Ortholog annotation table (tab-separated: id, KO, GO, symbol, gene)
    #[arg(short, long)]
    annotation: PathBuf,

    /// Sample prefix for the abundance table and reports
    #[arg(short, long)]
    prefix: String,

    /// Output FASTQ for mapped/clean reads (.gz supported)
    #[arg(short, long)]
    out1: Option<PathBuf>,

    /// Output for reads rejected by the filters, tagged with the reason
    #[arg(long)]
    failed_out: Option<PathBuf>,

    /// Output mapping read names to ortholog ids
    #[arg(long)]
    reads_ko_map: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 4)]
    thread: usize,

    /// Stop after this many reads (0 = no limit)
    #[arg(long, default_value_t = 0)]
    reads_to_process: u64,

    /// Input qualities are phred+64 encoded
    #[arg(long, default_value_t = false)]
    phred64: bool,

    /// Input buffer size in bytes
    #[arg(long, default_value_t = 1 << 20)]
    fastq_buffer_size: usize,

    /// Write clean reads to stdout instead of out1
    #[arg(long, default_value_t = false)]
    stdout: bool,

    /// Split output into shards of this many reads per file
    #[arg(long)]
    split_by_reads: Option<u64>,

    /// Split output into shards of this many passed lines per file
    #[arg(long, conflicts_with = "split_by_reads")]
    split_by_lines: Option<u64>,

    /// Peptide k-mer size for the translated search
    #[arg(long, default_value_t = DEFAULT_PEPTIDE_K)]
    kmer: usize,

    /// Bases trimmed from the read front
    #[arg(long, default_value_t = 0)]
    trim_front: usize,

    /// Bases trimmed from the read tail
    #[arg(long, default_value_t = 0)]
    trim_tail: usize,

    /// Clip reads longer than this (0 = no limit)
    #[arg(long, default_value_t = 0)]
    max_len: usize,

    /// Disable the sliding-window quality trim
    #[arg(long, default_value_t = false)]
    disable_quality_trim: bool,

    /// Sliding window size for the quality trim
    #[arg(long, default_value_t = 4)]
    cut_window: usize,

    /// Mean phred threshold for the quality trim window
    #[arg(long, default_value_t = 20)]
    cut_mean_quality: u8,

    /// Phred score at or above which a base counts as qualified
    #[arg(long, default_value_t = 15)]
    qualified_phred: u8,

    /// Maximum percent of unqualified bases in a passing read
    #[arg(long, default_value_t = 40, value_parser = clap::value_parser!(u8).range(0..=100))]
    unqualified_percent: u8,

    /// Maximum number of N bases in a passing read
    #[arg(long, default_value_t = 5)]
    n_base_limit: usize,

    /// Minimum length of a passing read
    #[arg(long, default_value_t = 30)]
    length_required: usize,

    /// Maximum length of a passing read (0 = no limit)
    #[arg(long, default_value_t = 0)]
    length_limit: usize,

    /// Disable polyG tail trimming
    #[arg(long, default_value_t = false)]
    disable_poly_g: bool,

    /// Minimum polyG run length to trim
    #[arg(long, default_value_t = 10)]
    poly_g_min_len: usize,

    /// Enable polyX tail trimming
    #[arg(long, default_value_t = false)]
    enable_poly_x: bool,

    /// Minimum polyX run length to trim
    #[arg(long, default_value_t = 10)]
    poly_x_min_len: usize,

    /// Adapter sequence to trim
    #[arg(long)]
    adapter_sequence: Option<String>,

    /// FASTA file of adapter sequences to trim
    #[arg(long)]
    adapter_fasta: Option<PathBuf>,

    /// Trim polyA tails after adapter trimming
    #[arg(long, default_value_t = false)]
    trim_poly_a: bool,

    /// Move a UMI prefix from the sequence into the read name
    #[arg(long, default_value_t = false)]
    umi: bool,

    /// UMI length in base pairs
    #[arg(long, default_value_t = 12)]
    umi_len: usize,

    /// Rewrite MGI-style read names
    #[arg(long, default_value_t = false)]
    fix_mgi: bool,

    /// Drop reads whose index (barcode) is listed in this file
    #[arg(long)]
    filter_index: Option<PathBuf>,

    /// Enable duplication profiling
    #[arg(long, default_value_t = false)]
    dedup_profiling: bool,

    /// Duplication histogram size
    #[arg(long, default_value_t = 32)]
    dup_hist_size: usize,

    /// Skip the rarefaction computation
    #[arg(long, default_value_t = false)]
    no_profiling: bool,

    /// Verbose progress output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct ExtractArgs {
    /// Annotated input FASTQ files
    #[arg(short, long, num_args = 1.., required = true)]
    inputs: Vec<PathBuf>,

    /// File listing the features that get their own output, one per line
    #[arg(short, long)]
    subset: PathBuf,

    /// File listing all known features; matches outside the subset go to
    /// the ungrouped output. Defaults to the subset list.
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Gzip the outputs
    #[arg(long, default_value_t = false)]
    gzip: bool,

    /// Verbose progress output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn load_index_list(path: &Path) -> Result<std::collections::HashSet<String>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open index filter list {}", path.display()))?;
    let mut indexes = std::collections::HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let token = line.trim();
        if !token.is_empty() {
            indexes.insert(token.to_ascii_uppercase());
        }
    }
    Ok(indexes)
}

fn build_config(args: &QuantifyArgs) -> Result<Config> {
    let mut config = Config {
        in1: args.input.clone(),
        out1: args.out1.clone(),
        failed_out: args.failed_out.clone(),
        reads_ko_map: args.reads_ko_map.clone(),
        prefix: args.prefix.clone(),
        thread: args.thread,
        reads_to_process: args.reads_to_process,
        phred64: args.phred64,
        fastq_buffer_size: args.fastq_buffer_size,
        verbose: args.verbose,
        output_to_stdout: args.stdout,
        profiling: !args.no_profiling,
        fix_mgi: args.fix_mgi,
        ..Config::default()
    };

    if let Some(limit) = args.split_by_reads.or(args.split_by_lines) {
        config.split.enabled = true;
        config.split.by_file_lines = args.split_by_lines.is_some();
        config.split.limit = limit;
    }

    config.trim.front1 = args.trim_front;
    config.trim.tail1 = args.trim_tail;
    config.trim.max_len1 = args.max_len;

    config.quality_cut.enabled = !args.disable_quality_trim;
    config.quality_cut.window = args.cut_window.max(1);
    config.quality_cut.mean_quality = args.cut_mean_quality;

    config.filter.qualified_phred = args.qualified_phred;
    config.filter.unqualified_percent = args.unqualified_percent;
    config.filter.n_base_limit = args.n_base_limit;
    config.filter.length_required = args.length_required;
    config.filter.length_limit = args.length_limit;

    config.poly_g.enabled = !args.disable_poly_g;
    config.poly_g.min_len = args.poly_g_min_len;
    config.poly_x.enabled = args.enable_poly_x;
    config.poly_x.min_len = args.poly_x_min_len;

    config.adapter.sequence = args
        .adapter_sequence
        .as_ref()
        .map(|s| s.to_ascii_uppercase().into_bytes());
    if let Some(path) = &args.adapter_fasta {
        config.adapter.fasta = load_adapter_fasta(path)?;
    }
    config.adapter.poly_a = args.trim_poly_a;
    config.adapter.enabled = config.adapter.sequence.is_some()
        || !config.adapter.fasta.is_empty()
        || config.adapter.poly_a;

    config.umi.enabled = args.umi;
    config.umi.len = args.umi_len;

    if let Some(path) = &args.filter_index {
        config.index_filter.enabled = true;
        config.index_filter.indexes = load_index_list(path)?;
    }

    config.duplicate.enabled = args.dedup_profiling;
    config.duplicate.hist_size = args.dup_hist_size;

    config.validate()?;
    Ok(config)
}

fn run_quantify(args: &QuantifyArgs) -> Result<()> {
    let start = std::time::Instant::now();
    let config = Arc::new(build_config(args)?);

    if config.verbose {
        eprintln!("[orthomap] loading annotation table and protein database");
    }
    let dict = Arc::new(Dictionary::load(&args.annotation)?);
    let index = Arc::new(PeptideIndex::from_fasta(&args.database, args.kmer)?);

    let processor = ReadProcessor::new(config.clone(), dict, index);
    let result = processor.run()?;

    let (_, json_path, html_path) = prefix_outputs(&config.prefix);
    let report = RunReport::new(
        &result.run,
        &result.pre_stats,
        &result.post_stats,
        &result.counters,
        result.duplication.as_ref(),
    );
    write_json_report(Path::new(&json_path), &report)?;
    write_html_report(Path::new(&html_path), &report)?;

    // tab-separated summary: input, raw, clean, mapped, mapped%, distinct ids
    let fname = args
        .input
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| args.input.to_string_lossy().to_string());
    println!(
        "{}\t{}\t{}\t{}\t{:.2}\t{}",
        fname,
        result.run.total_raw_reads,
        result.run.total_clean_reads,
        result.run.total_mapped_reads,
        result.run.mapped_reads_rate(),
        result.run.distinct_mapped_ids
    );

    if args.verbose {
        eprintln!(
            "[orthomap] producer paused {} times, elapsed {:.3}s",
            result.slept,
            start.elapsed().as_secs_f64()
        );
    }
    Ok(())
}

fn run_extract(args: &ExtractArgs) -> Result<()> {
    let start = std::time::Instant::now();
    let targets_sub = load_target_list(&args.subset)?;
    let targets_full = match &args.targets {
        Some(path) => load_target_list(path)?,
        None => targets_sub.clone(),
    };

    let extractor = FeatureExtractor::new(ExtractConfig {
        inputs: args.inputs.clone(),
        targets_sub,
        targets_full,
        out_dir: args.out_dir.clone(),
        gzip: args.gzip,
        verbose: args.verbose,
    });
    let summary = extractor.run()?;

    println!("{}\t{}", summary.reads, summary.num_features);
    if args.verbose {
        eprintln!("[orthomap] elapsed {:.3}s", start.elapsed().as_secs_f64());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Quantify(args) => run_quantify(args),
        Command::Extract(args) => run_extract(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantify_args_defaults() {
        let cli = Cli::try_parse_from([
            "orthomap", "quantify", "-i", "reads.fastq", "-d", "db.fasta", "-a", "anno.tsv",
            "-p", "sample",
        ])
        .unwrap();
        let Command::Quantify(args) = cli.command else {
            panic!("expected quantify");
        };
        assert_eq!(args.thread, 4);
        assert_eq!(args.kmer, DEFAULT_PEPTIDE_K);
        assert_eq!(args.length_required, 30);
        assert!(!args.phred64);
        assert!(args.out1.is_none());
    }

    #[test]
    fn test_unqualified_percent_range_enforced() {
        let bad = Cli::try_parse_from([
            "orthomap", "quantify", "-i", "r.fq", "-d", "d.fa", "-a", "a.tsv", "-p", "s",
            "--unqualified-percent", "150",
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_split_modes_conflict() {
        let bad = Cli::try_parse_from([
            "orthomap", "quantify", "-i", "r.fq", "-d", "d.fa", "-a", "a.tsv", "-p", "s",
            "--split-by-reads", "100", "--split-by-lines", "400",
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_extract_args_require_inputs() {
        let bad = Cli::try_parse_from(["orthomap", "extract", "-s", "subset.txt"]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_build_config_wires_split_and_adapter() {
        let cli = Cli::try_parse_from([
            "orthomap", "quantify", "-i", "r.fq", "-d", "d.fa", "-a", "a.tsv", "-p", "s",
            "-o", "out.fq", "--split-by-reads", "500", "--adapter-sequence", "agatcgga",
        ])
        .unwrap();
        let Command::Quantify(args) = cli.command else {
            panic!("expected quantify");
        };
        let config = build_config(&args).unwrap();
        assert!(config.split.enabled);
        assert!(!config.split.by_file_lines);
        assert_eq!(config.split.limit, 500);
        assert!(config.adapter.enabled);
        assert_eq!(config.adapter.sequence.as_deref(), Some(&b"AGATCGGA"[..]));
    }
}
