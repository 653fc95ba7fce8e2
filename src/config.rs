//! Run configuration.
//!
//! One plain value carrying every knob the pipeline stages need, built from
//! the command line and passed by reference into component constructors.
//! Nothing here is global or mutable after startup.

use std::path::PathBuf;

/// Pipeline configuration shared by all stages.
#[derive(Clone, Debug)]
pub struct Configuration {
    /// K-mer length.
    pub ksize: usize,

    /// Length of the sample reads.
    pub read_length: usize,

    /// Search radius around each approximate breakpoint, in bases.
    pub radius: usize,

    /// Mean read depth of the sample. Required by the genotyping program.
    pub coverage: f64,

    /// Number of worker threads.
    pub max_threads: usize,

    /// Candidate SV intervals. The penultimate filename component selects
    /// the SV type (`*.DEL.bed` or `*.INV.bed`).
    pub bed_file: PathBuf,

    /// Reference genome FASTA.
    pub reference: PathBuf,

    /// K-mer count index over the reference genome.
    pub reference_index: Option<PathBuf>,

    /// K-mer count index over the sample reads.
    pub sample_index: Option<PathBuf>,

    /// Use in-memory count maps produced by earlier stages instead of
    /// on-disk indexes.
    pub simulation: bool,

    /// Directory receiving intermediate manifests and solver files.
    pub workdir: PathBuf,

    /// Tag written in the last column of the output BED.
    pub batch_tag: String,
}

impl Configuration {
    /// Width of the flanking sequence recorded around each k-mer occurrence.
    pub fn slack(&self) -> usize {
        (self.read_length - self.ksize) / 2
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            ksize: 31,
            read_length: 100,
            radius: 50,
            coverage: 0.0,
            max_threads: num_cpus::get(),
            bed_file: PathBuf::new(),
            reference: PathBuf::new(),
            reference_index: None,
            sample_index: None,
            simulation: false,
            workdir: PathBuf::from("output"),
            batch_tag: String::from("unique_inner_kmers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_default() {
        let config = Configuration::default();
        assert_eq!(config.slack(), (100 - 31) / 2);
    }

    #[test]
    fn test_slack_custom() {
        let config = Configuration {
            ksize: 15,
            read_length: 31,
            ..Configuration::default()
        };
        assert_eq!(config.slack(), 8);
    }
}
