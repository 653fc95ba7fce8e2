//! Intermediate manifests.
//!
//! The stages hand each other JSON: per-track inner-kmer manifests, the
//! per-batch merge map, breakpoint reports, and the counted-kmer aggregate.
//! All maps are `BTreeMap`s so files come out key-sorted and byte-stable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One reference occurrence of an inner k-mer, with the flanking context
/// that identifies it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KmerOccurrence {
    pub chrom: String,
    pub position: usize,
    /// Bases immediately left of the occurrence, `slack` wide.
    pub left_flank: String,
    /// Bases immediately right of the occurrence, `slack` wide.
    pub right_flank: String,
    /// Canonical k-mers of the two flanks.
    pub flank_kmers: BTreeSet<String>,
    /// Flank k-mers found at no other occurrence of the parent k-mer.
    pub unique_markers: BTreeSet<String>,
}

impl KmerOccurrence {
    /// `chrom_position`, the key the original attribution logic was built
    /// around.
    pub fn name(&self) -> String {
        format!("{}_{}", self.chrom, self.position)
    }
}

/// An inner k-mer and its reference census.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InnerKmer {
    /// Occurrence multiplicity within the event interior.
    pub multiplicity: u32,
    /// Reference-wide count.
    pub reference: u32,
    /// Where the k-mer appears in the reference, either orientation.
    pub occurrences: Vec<KmerOccurrence>,
}

/// Per-track output of the inner-kmer extraction stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackManifest {
    /// Inner k-mers with reference count exactly one.
    pub unique_inner_kmers: BTreeMap<String, InnerKmer>,
    /// Inner k-mers with reference count above one.
    pub inner_kmers: BTreeMap<String, InnerKmer>,
    /// Junction k-mers of the unshifted breakpoints, absent from (or rare
    /// in) the reference.
    pub novel_kmers: BTreeMap<String, u32>,
}

impl TrackManifest {
    /// True when no inner k-mer survived filtering; such tracks default to
    /// genotype (0, 0) downstream.
    pub fn is_degenerate(&self) -> bool {
        self.unique_inner_kmers.is_empty() && self.inner_kmers.is_empty()
    }

    /// Unique and repeated inner k-mers together.
    pub fn all_inner_kmers(&self) -> impl Iterator<Item = (&String, &InnerKmer)> {
        self.unique_inner_kmers.iter().chain(self.inner_kmers.iter())
    }
}

/// One surviving offset pair from boundary refinement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakPointCandidate {
    pub begin: i64,
    pub end: i64,
    /// Signature k-mers with their counts in the source sample.
    pub kmers: BTreeMap<String, i64>,
    /// The same positions in the untouched reference; counts stay at the
    /// -1 sentinel until a caller fills them in.
    pub reference_kmers: BTreeMap<String, i64>,
}

impl BreakPointCandidate {
    pub fn name(&self) -> String {
        format!("({},{})", self.begin, self.end)
    }
}

/// Frontier of a single track after boundary refinement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakPointReport {
    /// Number of surviving offset pairs.
    pub candidates: usize,
    /// Survivors keyed by `(begin,end)`.
    pub break_points: BTreeMap<String, BreakPointCandidate>,
}

/// Map from track name to its manifest path, written once per batch.
pub type BatchMerge = BTreeMap<String, std::path::PathBuf>;
