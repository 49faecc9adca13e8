/// An owned sequencing read.
///
/// `name` is stored without the leading `@`. Quality values are phred+33
/// after ingest regardless of the input encoding (see `FastqSource`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl Record {
    pub fn new(name: String, seq: Vec<u8>, qual: Vec<u8>) -> Self {
        Record { name, seq, qual }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Truncate the read to its first `n` bases.
    pub fn resize(&mut self, n: usize) {
        if n < self.seq.len() {
            self.seq.truncate(n);
            self.qual.truncate(n);
        }
    }

    /// Remove the first `n` bases.
    pub fn trim_front(&mut self, n: usize) {
        let n = n.min(self.seq.len());
        self.seq.drain(..n);
        self.qual.drain(..n);
    }

    /// Rewrite MGI-style read names.
    ///
    /// MGI instruments emit names ending in `/1` or `/2`; downstream tools
    /// expect the Illumina convention with a space-separated mate tag.
    pub fn fix_mgi(&mut self) {
        if self.name.ends_with("/1") || self.name.ends_with("/2") {
            let mate = self.name.pop();
            self.name.pop();
            self.name.push(' ');
            if let Some(m) = mate {
                self.name.push(m);
            }
        }
    }

    /// The read name up to the first whitespace, without any leading `@`.
    pub fn trimmed_name(&self) -> &str {
        let name = self.name.strip_prefix('@').unwrap_or(&self.name);
        name.split_whitespace().next().unwrap_or(name)
    }

    /// Serialize as a four-line FASTQ entry.
    pub fn to_fastq(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 2 * self.seq.len() + 8);
        out.push('@');
        out.push_str(&self.name);
        out.push('\n');
        out.push_str(&String::from_utf8_lossy(&self.seq));
        out.push_str("\n+\n");
        out.push_str(&String::from_utf8_lossy(&self.qual));
        out.push('\n');
        out
    }

    /// Serialize as FASTQ with `tag` appended to the name line after a tab.
    pub fn to_fastq_with_tag(&self, tag: &str) -> String {
        let mut out = String::with_capacity(self.name.len() + tag.len() + 2 * self.seq.len() + 9);
        out.push('@');
        out.push_str(&self.name);
        out.push('\t');
        out.push_str(tag);
        out.push('\n');
        out.push_str(&String::from_utf8_lossy(&self.seq));
        out.push_str("\n+\n");
        out.push_str(&String::from_utf8_lossy(&self.qual));
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, seq: &str) -> Record {
        Record::new(name.to_string(), seq.as_bytes().to_vec(), vec![b'I'; seq.len()])
    }

    #[test]
    fn test_resize_and_trim_front() {
        let mut r = rec("r1", "ACGTACGT");
        r.resize(6);
        assert_eq!(r.seq, b"ACGTAC");
        assert_eq!(r.qual.len(), 6);
        r.trim_front(2);
        assert_eq!(r.seq, b"GTAC");
        // trimming more than the length empties the read
        r.trim_front(10);
        assert!(r.is_empty());
    }

    #[test]
    fn test_fix_mgi() {
        let mut r = rec("V300012345L2C001R0010001/1", "ACGT");
        r.fix_mgi();
        assert_eq!(r.name, "V300012345L2C001R0010001 1");

        let mut plain = rec("read1", "ACGT");
        plain.fix_mgi();
        assert_eq!(plain.name, "read1");
    }

    #[test]
    fn test_trimmed_name() {
        let r = rec("read1 1:N:0:ACGT", "ACGT");
        assert_eq!(r.trimmed_name(), "read1");
        let r2 = rec("@read2", "ACGT");
        assert_eq!(r2.trimmed_name(), "read2");
    }

    #[test]
    fn test_fastq_serialization() {
        let r = rec("r1", "ACGT");
        assert_eq!(r.to_fastq(), "@r1\nACGT\n+\nIIII\n");
        assert_eq!(r.to_fastq_with_tag("s2f_7"), "@r1\ts2f_7\nACGT\n+\nIIII\n");
    }
}
