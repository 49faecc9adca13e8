use crate::record::Record;

/// Moves a fixed-length UMI from the start of the sequence into the read
/// name, `READ_ID:UMI` style, so downstream deduplication can find it.
pub struct UmiExtractor {
    len: usize,
}

impl UmiExtractor {
    pub fn new(len: usize) -> Self {
        UmiExtractor { len }
    }

    pub fn process(&self, r: &mut Record) {
        if self.len == 0 || r.len() < self.len {
            return;
        }
        let umi: String = r.seq[..self.len]
            .iter()
            .map(|&b| b.to_ascii_uppercase() as char)
            .collect();
        r.trim_front(self.len);
        match r.name.find(char::is_whitespace) {
            Some(pos) => r.name.insert_str(pos, &format!(":{}", umi)),
            None => {
                r.name.push(':');
                r.name.push_str(&umi);
            }
        }
    }
}
