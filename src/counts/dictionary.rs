//! In-memory count provider.
//!
//! Backed by the JSON aggregate a previous counting stage wrote. Used in
//! simulation runs and whenever the k-mer universe is small enough to hold
//! in memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};

use crate::bio::kmers::canonicalize;
use crate::counts::{CountedKmer, KmerCountProvider};

/// Count provider over a map of canonical k-mers to their records.
pub struct DictionaryCountsProvider {
    kmers: HashMap<String, CountedKmer>,
}

impl DictionaryCountsProvider {
    /// Wraps an already-built record map. Keys are canonicalized.
    pub fn from_records(records: HashMap<String, CountedKmer>) -> Self {
        let kmers = records
            .into_iter()
            .map(|(kmer, record)| (canonicalize(&kmer), record))
            .collect();
        DictionaryCountsProvider { kmers }
    }

    /// Builds a provider from bare counts, for stores that carry no
    /// attribution metadata.
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        let kmers = counts
            .into_iter()
            .map(|(kmer, count)| {
                let record = CountedKmer {
                    count,
                    ..CountedKmer::default()
                };
                (canonicalize(&kmer), record)
            })
            .collect();
        DictionaryCountsProvider { kmers }
    }

    /// Loads the JSON aggregate written by the counting stage.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open count dictionary {}", path.display()))?;
        let records: HashMap<String, CountedKmer> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("malformed count dictionary {}", path.display()))?;
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.kmers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kmers.is_empty()
    }
}

impl KmerCountProvider for DictionaryCountsProvider {
    fn count(&self, kmer: &str) -> u32 {
        self.kmers
            .get(&canonicalize(kmer))
            .map(|record| record.count)
            .unwrap_or(0)
    }

    fn metadata(&self, kmer: &str) -> Option<&CountedKmer> {
        self.kmers.get(&canonicalize(kmer))
    }
}
