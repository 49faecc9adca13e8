use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use orthomap::config::Config;
use orthomap::dict::Dictionary;
use orthomap::pipeline::{PipelineResult, ReadProcessor};
use orthomap::search::PeptideIndex;

/// Encode a peptide into DNA, one fixed codon per residue, matching the
/// standard table used by the translated search.
fn encode_peptide(peptide: &str) -> String {
    peptide
        .chars()
        .map(|aa| match aa {
            'A' => "GCT",
            'D' => "GAT",
            'E' => "GAA",
            'G' => "GGT",
            'H' => "CAT",
            'K' => "AAA",
            'L' => "CTT",
            'M' => "ATG",
            'V' => "GTT",
            'W' => "TGG",
            'Y' => "TAT",
            other => panic!("no codon for residue {}", other),
        })
        .collect()
}

const PEPTIDE_A: &str = "MKVLDEAGHW";
const PEPTIDE_B: &str = "YYHHKKWWGA";

fn write_database(dir: &Path) -> PathBuf {
    let path = dir.join("db.fasta");
    let mut f = File::create(&path).unwrap();
    writeln!(f, ">s2f_7 ortholog A\n{}", PEPTIDE_A).unwrap();
    writeln!(f, ">s2f_9 ortholog B\n{}", PEPTIDE_B).unwrap();
    path
}

fn write_annotation(dir: &Path) -> PathBuf {
    let path = dir.join("annotation.tsv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "7\tK00001\tGO:0005737\tadh\talcohol dehydrogenase").unwrap();
    writeln!(f, "9\tK00002\tGO:0005829\takr\taldo-keto reductase").unwrap();
    path
}

fn write_fastq(path: &Path, reads: &[(&str, String)]) {
    let mut f = File::create(path).unwrap();
    for (name, seq) in reads {
        write!(f, "@{}\n{}\n+\n{}\n", name, seq, "I".repeat(seq.len())).unwrap();
    }
}

struct TestRun {
    dir: TempDir,
    config: Config,
}

impl TestRun {
    fn new(reads: &[(&str, String)]) -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("reads.fastq");
        write_fastq(&input, reads);
        let config = Config {
            in1: input,
            out1: Some(dir.path().join("out.fastq")),
            failed_out: Some(dir.path().join("failed.fastq")),
            reads_ko_map: Some(dir.path().join("reads_ko.tsv")),
            prefix: dir.path().join("sample").to_string_lossy().into_owned(),
            thread: 1,
            ..Config::default()
        };
        TestRun { dir, config }
    }

    fn execute(&self) -> PipelineResult {
        let dict = Arc::new(Dictionary::load(&write_annotation(self.dir.path())).unwrap());
        let index =
            Arc::new(PeptideIndex::from_fasta(&write_database(self.dir.path()), 7).unwrap());
        let processor = ReadProcessor::new(Arc::new(self.config.clone()), dict, index);
        processor.run().unwrap()
    }

    fn read_output(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).unwrap()
    }

    fn abundance(&self) -> String {
        std::fs::read_to_string(format!("{}_s2fid_abundance.txt", self.config.prefix)).unwrap()
    }
}

#[test]
fn test_single_thread_pass_through() {
    let dna = encode_peptide(PEPTIDE_A);
    let reads: Vec<(&str, String)> = vec![
        ("r1", dna.clone()),
        ("r2", dna.clone()),
        ("r3", dna.clone()),
    ];
    let run = TestRun::new(&reads);
    let result = run.execute();

    assert_eq!(result.run.total_raw_reads, 3);
    assert_eq!(result.run.total_clean_reads, 3);
    assert_eq!(result.run.total_mapped_reads, 3);
    assert_eq!(result.global_hits, BTreeMap::from([(7, 3)]));

    let out = run.read_output("out.fastq");
    assert_eq!(out.matches("\ts2f_7\n").count(), 3);
    assert_eq!(run.read_output("failed.fastq"), "");
    let ko = run.read_output("reads_ko.tsv");
    let ko_lines: Vec<&str> = ko.lines().collect();
    assert_eq!(ko_lines, vec!["r1\ts2f_7", "r2\ts2f_7", "r3\ts2f_7"]);

    let abundance = run.abundance();
    assert_eq!(
        abundance,
        "#s2f_id\tReads_count\tannotation\n\
         s2f_7\t3\tK00001|GO:0005737|adh|alcohol dehydrogenase\n"
    );

    // one mapped ortholog: the curve starts at the origin and saturates at 1
    assert_eq!(result.run.rarefaction.get(&0), Some(&0));
    assert_eq!(result.run.rarefaction.get(&3), Some(&1));
}

#[test]
fn test_mixed_pass_and_fail() {
    let dna_a = encode_peptide(PEPTIDE_A);
    let dna_b = encode_peptide(PEPTIDE_B);
    let short = "ACGTACGTAC".to_string();
    let reads: Vec<(&str, String)> = vec![
        ("r1", dna_a.clone()),
        ("r2", dna_a.clone()),
        ("r3", dna_b.clone()),
        ("r4", short.clone()),
        ("r5", short.clone()),
    ];
    let run = TestRun::new(&reads);
    let result = run.execute();

    assert_eq!(result.global_hits, BTreeMap::from([(7, 2), (9, 1)]));
    assert_eq!(result.run.total_mapped_reads, 3);
    assert_eq!(result.counters.passed, 3);
    assert_eq!(result.counters.too_short, 2);

    let failed = run.read_output("failed.fastq");
    assert_eq!(failed.matches("\tfailed_too_short\n").count(), 2);

    // the abundance table read back sums to the mapped-read total
    let mut sum = 0u64;
    for line in run.abundance().lines().skip(1) {
        sum += line.split('\t').nth(1).unwrap().parse::<u64>().unwrap();
    }
    assert_eq!(sum, result.run.total_mapped_reads);
}

#[test]
fn test_multi_worker_counts_are_exact() {
    // enough reads to span several batches with W=8
    let dna_a = encode_peptide(PEPTIDE_A);
    let dna_b = encode_peptide(PEPTIDE_B);
    let mut reads: Vec<(&str, String)> = Vec::new();
    for i in 0..3000 {
        reads.push(("m", if i % 3 == 0 { dna_b.clone() } else { dna_a.clone() }));
    }
    let mut run = TestRun::new(&reads);
    run.config.thread = 8;
    let result = run.execute();

    assert_eq!(result.run.total_raw_reads, 3000);
    assert_eq!(result.global_hits, BTreeMap::from([(7, 2000), (9, 1000)]));
    assert_eq!(result.run.distinct_mapped_ids, 2);
    assert_eq!(result.pre_stats.reads, 3000);
}

#[test]
fn test_reads_to_process_cap() {
    let dna = encode_peptide(PEPTIDE_A);
    let reads: Vec<(&str, String)> = (0..100).map(|_| ("c", dna.clone())).collect();
    let mut run = TestRun::new(&reads);
    run.config.reads_to_process = 7;
    let result = run.execute();

    // exactly one partial batch of 7 reads passes through pre-stats
    assert_eq!(result.run.total_raw_reads, 7);
    assert_eq!(result.pre_stats.reads, 7);
    assert_eq!(result.run.total_mapped_reads, 7);
}

#[test]
fn test_zero_input_records() {
    let run = TestRun::new(&[]);
    let result = run.execute();

    assert_eq!(result.run.total_raw_reads, 0);
    assert_eq!(result.global_hits.len(), 0);
    // sinks were created and produced empty files
    assert_eq!(run.read_output("out.fastq"), "");
    assert_eq!(run.read_output("failed.fastq"), "");
    assert_eq!(run.read_output("reads_ko.tsv"), "");
    // abundance file contains only the header
    assert_eq!(run.abundance(), "#s2f_id\tReads_count\tannotation\n");
}

#[test]
fn test_split_mode_writes_worker_shards() {
    let dna = encode_peptide(PEPTIDE_A);
    let short = "ACGTACGTAC".to_string();
    let mut reads: Vec<(&str, String)> = (0..40).map(|_| ("s", dna.clone())).collect();
    reads.push(("f1", short.clone()));
    reads.push(("f2", short.clone()));
    reads.push(("f3", short));
    let mut run = TestRun::new(&reads);
    run.config.thread = 2;
    run.config.split.enabled = true;
    run.config.split.limit = 10;
    let result = run.execute();
    assert_eq!(result.run.total_mapped_reads, 40);
    assert_eq!(result.counters.too_short, 3);

    // shard files exist and together hold all 40 mapped reads; the
    // primary out.fastq itself is not written in split mode
    let mut total = 0;
    for entry in std::fs::read_dir(run.dir.path()).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".out.fastq") && name != "out.fastq" {
            let content = std::fs::read_to_string(entry.path()).unwrap();
            total += content.matches("\ts2f_7\n").count();
        }
    }
    assert_eq!(total, 40);
    assert!(!run.dir.path().join("out.fastq").exists());

    // failed and KO-map sinks stay shared in split mode
    let failed = run.read_output("failed.fastq");
    assert_eq!(failed.matches("\tfailed_too_short\n").count(), 3);
    let ko = run.read_output("reads_ko.tsv");
    assert_eq!(ko.matches("\ts2f_7\n").count(), 40);
}

#[test]
fn test_failed_output_not_configured() {
    let short = "ACGTACGTAC".to_string();
    let mut run = TestRun::new(&[("r1", short)]);
    run.config.failed_out = None;
    let result = run.execute();
    assert_eq!(result.counters.too_short, 1);
    assert!(!run.dir.path().join("failed.fastq").exists());
}
