use anyhow::{bail, Context, Result};
use needletail::parse_fastx_file;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::record::Record;

/// Standard codon table indexed by `16*b0 + 4*b1 + b2` with A=0 C=1 G=2 T=3.
const CODON_AA: &[u8; 64] = b"KNKNTTTTRSRSIIMIQHQHPPPPRRRRLLLLEDEDAAAAGGGGVVVV*Y*YSSSS*CWCLFLF";

pub const DEFAULT_PEPTIDE_K: usize = 7;
const MAX_PEPTIDE_K: usize = 12;

fn base_code(b: u8) -> Option<u64> {
    match b.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

fn complement(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' => b'A',
        b'G' => b'C',
        b'C' => b'G',
        _ => b'N',
    }
}

fn codon_to_aa(c0: u8, c1: u8, c2: u8) -> u8 {
    match (base_code(c0), base_code(c1), base_code(c2)) {
        (Some(a), Some(b), Some(c)) => CODON_AA[(16 * a + 4 * b + c) as usize],
        // ambiguous bases translate to an invalid residue that no window spans
        _ => b'X',
    }
}

/// 5-bit code for the 20 residues; stops and unknowns get `None`.
fn aa_code(aa: u8) -> Option<u64> {
    const ORDER: &[u8; 20] = b"ACDEFGHIKLMNPQRSTVWY";
    ORDER.iter().position(|&a| a == aa).map(|p| p as u64)
}

fn pack_window(window: &[u8]) -> Option<u64> {
    let mut packed: u64 = 0;
    for &aa in window {
        packed = (packed << 5) | aa_code(aa)?;
    }
    Some(packed)
}

/// Translate one frame of `seq` starting at `offset` into residues.
fn translate(seq: &[u8], offset: usize) -> Vec<u8> {
    seq[offset..]
        .chunks_exact(3)
        .map(|c| codon_to_aa(c[0], c[1], c[2]))
        .collect()
}

/// Immutable k-peptide index over the ortholog protein database.
///
/// FASTA headers carry the numeric ortholog id (optionally prefixed with
/// `s2f_`). Windows seen under more than one id are ambiguous and dropped,
/// so a surviving k-mer votes for exactly one ortholog.
pub struct PeptideIndex {
    k: usize,
    kmers: HashMap<u64, u32>,
    ids: HashSet<u32>,
}

impl PeptideIndex {
    pub fn from_fasta(path: &Path, k: usize) -> Result<Self> {
        if k == 0 || k > MAX_PEPTIDE_K {
            bail!("peptide k-mer size must be in 1..={}", MAX_PEPTIDE_K);
        }
        let mut reader = parse_fastx_file(path)
            .with_context(|| format!("Failed to open protein database {}", path.display()))?;
        let mut kmers: HashMap<u64, u32> = HashMap::new();
        let mut ambiguous: HashSet<u64> = HashSet::new();
        let mut ids = HashSet::new();
        while let Some(rec) = reader.next() {
            let rec = rec
                .with_context(|| format!("Failed to parse protein database {}", path.display()))?;
            let header = String::from_utf8_lossy(rec.id()).into_owned();
            let id = parse_ortholog_id(&header).with_context(|| {
                format!("No numeric ortholog id in database header '{}'", header)
            })?;
            ids.insert(id);
            let seq = rec.seq().to_ascii_uppercase();
            if seq.len() < k {
                continue;
            }
            for window in seq.windows(k) {
                let Some(packed) = pack_window(window) else {
                    continue;
                };
                match kmers.get(&packed) {
                    Some(&existing) if existing != id => {
                        ambiguous.insert(packed);
                    }
                    _ => {
                        kmers.insert(packed, id);
                    }
                }
            }
        }
        for packed in &ambiguous {
            kmers.remove(packed);
        }
        Ok(PeptideIndex { k, kmers, ids })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Distinct ortholog ids present in the database.
    pub fn id_count(&self) -> usize {
        self.ids.len()
    }

    pub fn kmer_count(&self) -> usize {
        self.kmers.len()
    }
}

fn parse_ortholog_id(header: &str) -> Option<u32> {
    let token = header.split_whitespace().next()?;
    let token = token.strip_prefix("s2f_").unwrap_or(token);
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Per-worker search context: shared index plus the worker's partial hit
/// map, merged into the global table after the workers join.
pub struct TransSearcher {
    index: Arc<PeptideIndex>,
    min_hits: u32,
    pub hits: HashMap<u32, u32>,
    pub mapped_reads: u64,
}

impl TransSearcher {
    pub fn new(index: Arc<PeptideIndex>) -> Self {
        TransSearcher {
            index,
            min_hits: 1,
            hits: HashMap::new(),
            mapped_reads: 0,
        }
    }

    /// Six-frame translated search. On a hit the worker's partial map is
    /// incremented and the winning ortholog id returned.
    pub fn search(&mut self, r: &Record) -> Option<u32> {
        let k = self.index.k;
        let mut votes: HashMap<u32, u32> = HashMap::new();
        let rc: Vec<u8> = r.seq.iter().rev().map(|&b| complement(b)).collect();
        for strand in [&r.seq, &rc] {
            for offset in 0..3 {
                if strand.len() < offset + 3 * k {
                    continue;
                }
                let peptide = translate(strand, offset);
                for window in peptide.windows(k) {
                    let Some(packed) = pack_window(window) else {
                        continue;
                    };
                    if let Some(&id) = self.index.kmers.get(&packed) {
                        *votes.entry(id).or_insert(0) += 1;
                    }
                }
            }
        }
        // deterministic winner: highest vote count, lowest id on ties
        let (&id, &count) = votes.iter().max_by_key(|&(&id, &c)| (c, std::cmp::Reverse(id)))?;
        if count < self.min_hits {
            return None;
        }
        *self.hits.entry(id).or_insert(0) += 1;
        self.mapped_reads += 1;
        Some(id)
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::encode_peptide;
    use super::*;
    use std::io::Write;

    fn index_of(entries: &[(u32, &str)], k: usize) -> Arc<PeptideIndex> {
        let mut f = tempfile::NamedTempFile::with_suffix(".fasta").unwrap();
        for (id, peptide) in entries {
            writeln!(f, ">s2f_{}\n{}", id, peptide).unwrap();
        }
        f.flush().unwrap();
        Arc::new(PeptideIndex::from_fasta(f.path(), k).unwrap())
    }

    fn read_of(dna: &str) -> Record {
        Record::new("r1".to_string(), dna.as_bytes().to_vec(), vec![b'I'; dna.len()])
    }

    #[test]
    fn test_translate_standard_codons() {
        assert_eq!(translate(b"ATGAAATGA", 0), b"MK*".to_vec());
        assert_eq!(translate(b"GATGAAA", 1), b"MK".to_vec());
        assert_eq!(codon_to_aa(b'T', b'G', b'G'), b'W');
        assert_eq!(codon_to_aa(b'N', b'G', b'G'), b'X');
    }

    #[test]
    fn test_search_forward_frame() {
        let index = index_of(&[(7, "MKVLDEAGHW"), (9, "FFYYCCNNQQ")], 7);
        assert_eq!(index.id_count(), 2);
        let mut searcher = TransSearcher::new(index);
        let dna = encode_peptide("MKVLDEAGHW");
        assert_eq!(searcher.search(&read_of(&dna)), Some(7));
        assert_eq!(searcher.hits.get(&7), Some(&1));
        assert_eq!(searcher.mapped_reads, 1);
    }

    #[test]
    fn test_search_reverse_complement() {
        let index = index_of(&[(7, "MKVLDEAGHW")], 7);
        let mut searcher = TransSearcher::new(index);
        let dna = encode_peptide("MKVLDEAGHW");
        let rc: String = dna
            .bytes()
            .rev()
            .map(|b| complement(b) as char)
            .collect();
        assert_eq!(searcher.search(&read_of(&rc)), Some(7));
    }

    #[test]
    fn test_search_miss() {
        let index = index_of(&[(7, "MKVLDEAGHW")], 7);
        let mut searcher = TransSearcher::new(index);
        let dna = encode_peptide("PPPPPPPPPP");
        assert_eq!(searcher.search(&read_of(&dna)), None);
        assert!(searcher.hits.is_empty());
    }

    #[test]
    fn test_ambiguous_kmers_dropped() {
        // identical proteins under two ids share every window
        let index = index_of(&[(7, "MKVLDEAGHW"), (9, "MKVLDEAGHW")], 7);
        assert_eq!(index.kmer_count(), 0);
        let mut searcher = TransSearcher::new(index);
        let dna = encode_peptide("MKVLDEAGHW");
        assert_eq!(searcher.search(&read_of(&dna)), None);
    }
}
