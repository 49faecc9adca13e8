use anyhow::{bail, Result};
use std::collections::HashSet;
use std::path::PathBuf;

/// Fixed head/tail trimming and length clipping.
#[derive(Debug, Clone, Default)]
pub struct TrimOpts {
    pub front1: usize,
    pub tail1: usize,
    pub max_len1: usize,
}

/// Sliding-window quality cut applied after the fixed trims.
#[derive(Debug, Clone)]
pub struct QualityCutOpts {
    pub enabled: bool,
    pub window: usize,
    pub mean_quality: u8,
}

impl Default for QualityCutOpts {
    fn default() -> Self {
        QualityCutOpts {
            enabled: true,
            window: 4,
            mean_quality: 20,
        }
    }
}

/// Read classification thresholds.
#[derive(Debug, Clone)]
pub struct FilterOpts {
    pub qualified_phred: u8,
    pub unqualified_percent: u8,
    pub n_base_limit: usize,
    pub length_required: usize,
    pub length_limit: usize,
}

impl Default for FilterOpts {
    fn default() -> Self {
        FilterOpts {
            qualified_phred: 15,
            unqualified_percent: 40,
            n_base_limit: 5,
            length_required: 30,
            length_limit: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolyOpts {
    pub enabled: bool,
    pub min_len: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AdapterOpts {
    pub enabled: bool,
    pub sequence: Option<Vec<u8>>,
    pub fasta: Vec<Vec<u8>>,
    pub poly_a: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UmiOpts {
    pub enabled: bool,
    pub len: usize,
}

#[derive(Debug, Clone, Default)]
pub struct IndexFilterOpts {
    pub enabled: bool,
    pub indexes: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SplitOpts {
    pub enabled: bool,
    pub by_file_lines: bool,
    pub limit: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DupOpts {
    pub enabled: bool,
    pub hist_size: usize,
}

/// Immutable run configuration, shared by reference with every thread.
#[derive(Debug, Clone)]
pub struct Config {
    pub in1: PathBuf,
    pub out1: Option<PathBuf>,
    pub failed_out: Option<PathBuf>,
    pub reads_ko_map: Option<PathBuf>,
    pub prefix: String,
    pub thread: usize,
    pub reads_to_process: u64,
    pub phred64: bool,
    pub fastq_buffer_size: usize,
    pub verbose: bool,
    pub output_to_stdout: bool,
    pub profiling: bool,
    pub fix_mgi: bool,
    pub split: SplitOpts,
    pub index_filter: IndexFilterOpts,
    pub umi: UmiOpts,
    pub trim: TrimOpts,
    pub quality_cut: QualityCutOpts,
    pub filter: FilterOpts,
    pub poly_g: PolyOpts,
    pub poly_x: PolyOpts,
    pub adapter: AdapterOpts,
    pub duplicate: DupOpts,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            in1: PathBuf::new(),
            out1: None,
            failed_out: None,
            reads_ko_map: None,
            prefix: String::new(),
            thread: 4,
            reads_to_process: 0,
            phred64: false,
            fastq_buffer_size: 1 << 20,
            verbose: false,
            output_to_stdout: false,
            profiling: true,
            fix_mgi: false,
            split: SplitOpts::default(),
            index_filter: IndexFilterOpts::default(),
            umi: UmiOpts::default(),
            trim: TrimOpts::default(),
            quality_cut: QualityCutOpts::default(),
            filter: FilterOpts::default(),
            poly_g: PolyOpts {
                enabled: true,
                min_len: 10,
            },
            poly_x: PolyOpts {
                enabled: false,
                min_len: 10,
            },
            adapter: AdapterOpts::default(),
            duplicate: DupOpts {
                enabled: false,
                hist_size: 32,
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.in1.as_os_str().is_empty() {
            bail!("no input file given");
        }
        if self.thread == 0 {
            bail!("thread count must be at least 1");
        }
        if self.prefix.is_empty() {
            bail!("sample prefix is not set, quit now");
        }
        if self.split.enabled && self.out1.is_none() {
            bail!("split output requires an output file");
        }
        if self.split.enabled && self.output_to_stdout {
            bail!("split output cannot be combined with stdout output");
        }
        if self.umi.enabled && self.umi.len == 0 {
            bail!("UMI length must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            in1: PathBuf::from("reads.fastq"),
            prefix: "sample".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_prefix() {
        let mut c = valid();
        c.prefix.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_split_without_output() {
        let mut c = valid();
        c.split.enabled = true;
        assert!(c.validate().is_err());
    }
}
