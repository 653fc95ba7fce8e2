//! Reference genome loading.
//!
//! The whole reference is held in memory, uppercased, with case-insensitive
//! chromosome lookup. Boundary refinement and occurrence scanning both walk
//! these sequences; after loading, the genome is strictly read-only.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::info;
use needletail::parse_fastx_file;

/// In-memory reference genome.
pub struct Reference {
    chroms: HashMap<String, String>,
}

impl Reference {
    /// Loads every sequence of a FASTA file (gzip handled transparently).
    /// The chromosome name is the first whitespace-separated token of the
    /// header.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = parse_fastx_file(path)
            .with_context(|| format!("failed to open reference {}", path.display()))?;
        let mut chroms = HashMap::new();
        while let Some(record) = reader.next() {
            let record =
                record.with_context(|| format!("malformed record in {}", path.display()))?;
            let id = String::from_utf8_lossy(record.id()).to_string();
            let name = id
                .split_whitespace()
                .next()
                .ok_or_else(|| anyhow!("unnamed sequence in {}", path.display()))?
                .to_lowercase();
            let sequence = String::from_utf8_lossy(&record.seq()).to_ascii_uppercase();
            chroms.insert(name, sequence);
        }
        if chroms.is_empty() {
            return Err(anyhow!("no sequences in {}", path.display()));
        }
        info!("loaded {} reference sequences", chroms.len());
        Ok(Reference { chroms })
    }

    /// Builds a reference from in-memory sequences.
    pub fn from_sequences<I>(sequences: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let chroms = sequences
            .into_iter()
            .map(|(name, seq)| (name.to_lowercase(), seq.to_ascii_uppercase()))
            .collect();
        Reference { chroms }
    }

    /// Case-insensitive chromosome lookup.
    pub fn chrom(&self, name: &str) -> Option<&str> {
        self.chroms.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Chromosome names in lexicographic order, so every whole-genome walk
    /// is deterministic.
    pub fn chrom_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.chroms.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Extracts `[begin, end)` of a chromosome, or None when the window
    /// falls outside it.
    pub fn extract(&self, chrom: &str, begin: usize, end: usize) -> Option<&str> {
        let sequence = self.chrom(chrom)?;
        if begin > end || end > sequence.len() {
            return None;
        }
        Some(&sequence[begin..end])
    }
}
