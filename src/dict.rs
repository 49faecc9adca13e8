use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Annotation metadata attached to one ortholog group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub ko: String,
    pub go: String,
    pub symbol: String,
    pub gene: String,
}

impl Annotation {
    /// Pipe-joined form used in the abundance table.
    pub fn joined(&self) -> String {
        format!("{}|{}|{}|{}", self.ko, self.go, self.symbol, self.gene)
    }
}

/// Read-only ortholog annotation table, loaded before the pipeline starts
/// and shared by reference afterwards.
///
/// Format: tab-separated `id  ko  go  symbol  gene`, `#` comments allowed.
#[derive(Debug, Default)]
pub struct Dictionary {
    map: HashMap<u32, Annotation>,
}

impl Dictionary {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open annotation table {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut map = HashMap::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read annotation table {}", path.display()))?;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let id: u32 = fields
                .next()
                .unwrap_or("")
                .parse()
                .with_context(|| format!("Bad ortholog id at {}:{}", path.display(), lineno + 1))?;
            let mut next = || fields.next().unwrap_or("").to_string();
            let annotation = Annotation {
                ko: next(),
                go: next(),
                symbol: next(),
                gene: next(),
            };
            map.insert(id, annotation);
        }
        Ok(Dictionary { map })
    }

    pub fn get(&self, id: u32) -> Option<&Annotation> {
        self.map.get(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One abundance-table line. An id missing from the dictionary is written
/// as `s2f_U` with an empty annotation column.
pub fn abundance_line(dict: &Dictionary, id: u32, count: u32) -> String {
    match dict.get(id) {
        Some(a) => format!("s2f_{}\t{}\t{}\n", id, count, a.joined()),
        None => format!("s2f_U\t{}\t\n", count),
    }
}
