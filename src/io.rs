use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use needletail::parse_fastx_reader;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::record::Record;

/// `Read` wrapper that counts consumed bytes, so the source can report
/// progress through compressed and plain inputs alike.
struct CountingReader {
    inner: File,
    consumed: Arc<AtomicU64>,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Streaming FASTQ source over plain or gzipped input.
///
/// Quality values are rescaled to phred+33 on the way in when the input is
/// phred+64 encoded. Records missing a quality line (FASTA input) get a
/// constant high-quality fill so the rest of the pipeline stays uniform.
pub struct FastqSource {
    /// `None` for a zero-byte input, which is a valid empty source rather
    /// than a parse error.
    reader: Option<Box<dyn needletail::parser::FastxReader>>,
    phred64: bool,
    bytes_read: Arc<AtomicU64>,
    bytes_total: u64,
}

const PHRED64_OFFSET: u8 = 31;

impl FastqSource {
    pub fn open(path: &Path, phred64: bool, buf_size: usize) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open input {}", path.display()))?;
        let bytes_total = file.metadata().map(|m| m.len()).unwrap_or(0);
        let bytes_read = Arc::new(AtomicU64::new(0));
        if bytes_total == 0 {
            return Ok(FastqSource {
                reader: None,
                phred64,
                bytes_read,
                bytes_total,
            });
        }
        let counting = CountingReader {
            inner: file,
            consumed: bytes_read.clone(),
        };
        let buffered = std::io::BufReader::with_capacity(buf_size.max(4096), counting);
        let reader = parse_fastx_reader(buffered)
            .with_context(|| format!("Failed to parse FASTQ input {}", path.display()))?;
        Ok(FastqSource {
            reader: Some(reader),
            phred64,
            bytes_read,
            bytes_total,
        })
    }

    /// Next record, or `None` at end of input. Parse errors are fatal.
    pub fn read(&mut self) -> Result<Option<Record>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next() {
            None => Ok(None),
            Some(rec) => {
                let rec = rec.context("Failed to read FASTQ record")?;
                let name = String::from_utf8_lossy(rec.id()).into_owned();
                let seq = rec.seq().into_owned();
                let mut qual = match rec.qual() {
                    Some(q) => q.to_vec(),
                    None => vec![b'I'; seq.len()],
                };
                if self.phred64 {
                    for q in qual.iter_mut() {
                        *q = q.saturating_sub(PHRED64_OFFSET);
                    }
                }
                Ok(Some(Record::new(name, seq, qual)))
            }
        }
    }

    /// `(bytes_read, bytes_total)` of the underlying file.
    pub fn bytes(&self) -> (u64, u64) {
        (self.bytes_read.load(Ordering::Relaxed), self.bytes_total)
    }
}

/// Create a text/FASTQ output writer. If `path` ends with `.gz`, returns a
/// gzip-wrapped writer.
pub fn create_output_writer(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let writer = BufWriter::new(file);
    if path.extension().map_or(false, |e| e == "gz") {
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    } else {
        Ok(Box::new(writer))
    }
}

/// Per-worker rolling output used in split mode.
///
/// Shards are named `<index>.<filename>` next to the configured output.
/// Shard indexes are striped across workers (worker t takes t, t+W, ...)
/// so writers never collide without coordination.
pub struct SplitWriter {
    base: PathBuf,
    worker_id: usize,
    workers: usize,
    limit: u64,
    shard: usize,
    processed: u64,
    writer: Option<Box<dyn Write + Send>>,
}

impl SplitWriter {
    pub fn new(base: &Path, worker_id: usize, workers: usize, limit: u64) -> Self {
        SplitWriter {
            base: base.to_path_buf(),
            worker_id,
            workers,
            limit: limit.max(1),
            shard: 0,
            processed: 0,
            writer: None,
        }
    }

    fn shard_path(&self) -> PathBuf {
        let file_no = self.shard * self.workers + self.worker_id + 1;
        let name = self
            .base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out.fastq".to_string());
        self.base.with_file_name(format!("{:04}.{}", file_no, name))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.writer.is_none() {
            self.writer = Some(create_output_writer(&self.shard_path())?);
        }
        if let Some(w) = self.writer.as_mut() {
            w.write_all(data).with_context(|| {
                format!("Failed to write split output {}", self.shard_path().display())
            })?;
        }
        Ok(())
    }

    /// Account `units` processed records (or lines) against the shard
    /// limit, rolling to a fresh shard file once it is reached.
    pub fn mark_processed(&mut self, units: u64) -> Result<()> {
        self.processed += units;
        if self.processed >= self.limit {
            if let Some(mut w) = self.writer.take() {
                w.flush().context("Failed to flush split output")?;
            }
            self.shard += 1;
            self.processed = 0;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.flush().context("Failed to flush split output")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_fastq_source_reads_records() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "@r1\nACGT\n+\nIIII\n@r2 extra\nGGGG\n+\n!!!!\n").unwrap();
        f.flush().unwrap();
        let mut src = FastqSource::open(f.path(), false, 4096).unwrap();
        let r1 = src.read().unwrap().unwrap();
        assert_eq!(r1.name, "r1");
        assert_eq!(r1.seq, b"ACGT");
        let r2 = src.read().unwrap().unwrap();
        assert_eq!(r2.seq, b"GGGG");
        assert!(src.read().unwrap().is_none());
        let (read, total) = src.bytes();
        assert!(read > 0 && total > 0);
    }

    #[test]
    fn test_empty_input_is_a_valid_empty_source() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mut src = FastqSource::open(f.path(), false, 4096).unwrap();
        assert!(src.read().unwrap().is_none());
        assert_eq!(src.bytes(), (0, 0));
    }

    #[test]
    fn test_phred64_rescale() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        // 'h' (104) in phred+64 is Q40, i.e. 'I' (73) in phred+33
        write!(f, "@r1\nACGT\n+\nhhhh\n").unwrap();
        f.flush().unwrap();
        let mut src = FastqSource::open(f.path(), true, 4096).unwrap();
        let r = src.read().unwrap().unwrap();
        assert_eq!(r.qual, b"IIII");
    }

    #[test]
    fn test_split_writer_rolls_shards() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out.fq");
        let mut w = SplitWriter::new(&base, 0, 2, 2);
        w.write(b"@a\nA\n+\nI\n").unwrap();
        w.mark_processed(2).unwrap();
        w.write(b"@b\nC\n+\nI\n").unwrap();
        w.mark_processed(2).unwrap();
        w.finish().unwrap();
        // worker 0 of 2 takes shards 1, 3, 5, ...
        assert!(dir.path().join("0001.out.fq").exists());
        assert!(dir.path().join("0003.out.fq").exists());
    }
}
