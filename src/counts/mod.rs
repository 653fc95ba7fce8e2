//! Count providers.
//!
//! Uniform lookup of k-mer counts, polymorphic over the backing store: an
//! in-memory map loaded from a previous stage, or a memory-mapped on-disk
//! index. Providers are read-only and shared freely across workers.

pub mod dictionary;
pub mod index;

pub use dictionary::DictionaryCountsProvider;
pub use index::{IndexCountsProvider, IndexError};

use serde::{Deserialize, Serialize};

/// Aggregate tallies attributed to a k-mer by the location-aware counter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CountedKmer {
    /// Confident attributions to the owning track's locus.
    pub count: u32,
    /// Observations that could not be attributed either way.
    pub doubt: u32,
    /// All observations of the k-mer in the sample.
    pub total: u32,
    /// Name of the track the k-mer diagnoses.
    pub track: String,
    /// Occurrences of the k-mer in the reference genome.
    pub reference: u32,
}

/// Lookup of k-mer counts. Keys are canonical k-mers; lookups under either
/// orientation resolve to the same entry. Missing keys count as zero.
pub trait KmerCountProvider: Send + Sync {
    /// Number of occurrences recorded for the k-mer. Pure and total.
    fn count(&self, kmer: &str) -> u32;

    /// Full record for the k-mer, when the backing store carries one.
    fn metadata(&self, _kmer: &str) -> Option<&CountedKmer> {
        None
    }
}

/// A provider where every k-mer counts once. Stands in for a real store in
/// contexts that only need the filtering plumbing.
pub struct UnitCountsProvider;

impl KmerCountProvider for UnitCountsProvider {
    fn count(&self, _kmer: &str) -> u32 {
        1
    }
}
