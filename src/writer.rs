use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::io::create_output_writer;

/// One output file fed by submitted byte chunks and drained by a dedicated
/// background thread.
///
/// Protocol: submitters call `submit` any number of times, then exactly one
/// party calls `mark_input_completed`. The drain loop runs one extra pass
/// after observing the completion flag; a chunk submitted between the last
/// drain and the flag check is picked up there.
pub struct WriterSink {
    path: PathBuf,
    chunks: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
    input_completed: AtomicBool,
    pending_bytes: AtomicUsize,
}

impl WriterSink {
    pub fn new(path: &Path) -> Self {
        WriterSink {
            path: path.to_path_buf(),
            chunks: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            input_completed: AtomicBool::new(false),
            pending_bytes: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand a chunk to the sink. Ownership transfers; the writer thread
    /// frees it after flushing.
    pub fn submit(&self, data: Vec<u8>) {
        let mut chunks = self.chunks.lock().unwrap();
        self.pending_bytes.fetch_add(data.len(), Ordering::Release);
        chunks.push_back(data);
        self.ready.notify_one();
    }

    /// Bytes submitted but not yet flushed to the file.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes.load(Ordering::Acquire)
    }

    pub fn queued_chunks(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    /// Sticky flag: no further chunks will be submitted.
    pub fn mark_input_completed(&self) {
        self.input_completed.store(true, Ordering::Release);
        let _chunks = self.chunks.lock().unwrap();
        self.ready.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        self.input_completed.load(Ordering::Acquire)
    }

    /// Writer thread entry point: drain until completed, then drain once
    /// more and close. I/O failures here are fatal for the run.
    pub fn run(&self) -> Result<()> {
        let mut out = create_output_writer(&self.path)?;
        loop {
            if self.is_completed() {
                self.drain(&mut out)?;
                break;
            }
            self.drain(&mut out)?;
            let chunks = self.chunks.lock().unwrap();
            if chunks.is_empty() && !self.is_completed() {
                let _unused = self
                    .ready
                    .wait_timeout(chunks, Duration::from_millis(100))
                    .unwrap();
            }
        }
        out.flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        Ok(())
    }

    fn drain(&self, out: &mut impl Write) -> Result<()> {
        loop {
            let chunk = {
                let mut chunks = self.chunks.lock().unwrap();
                chunks.pop_front()
            };
            match chunk {
                None => return Ok(()),
                Some(data) => {
                    out.write_all(&data)
                        .with_context(|| format!("Failed to write {}", self.path.display()))?;
                    self.pending_bytes.fetch_sub(data.len(), Ordering::Release);
                }
            }
        }
    }
}
