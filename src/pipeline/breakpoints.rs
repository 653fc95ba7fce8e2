//! Boundary refinement.
//!
//! The upstream caller only knows approximate breakpoints; the true ones may
//! sit anywhere within the search radius. For every offset pair in
//! `[-R, R]^2` the variant allele is synthesized and its junction k-mers
//! looked up in the genome the event was originally detected in. A pair
//! survives only when every one of its signature k-mers is present there;
//! the survivors form the track's frontier.

use std::collections::BTreeMap;

use itertools::Itertools;
use log::debug;

use crate::counts::KmerCountProvider;
use crate::pipeline::manifest::{BreakPointCandidate, BreakPointReport};
use crate::sv::StructuralVariation;

/// Grid search over breakpoint offsets for one batch of tracks.
pub struct BreakPointScan<'a> {
    source_counts: &'a dyn KmerCountProvider,
}

impl<'a> BreakPointScan<'a> {
    pub fn new(source_counts: &'a dyn KmerCountProvider) -> Self {
        BreakPointScan { source_counts }
    }

    /// Refines one track, returning its frontier.
    pub fn refine(&self, sv: &StructuralVariation) -> BreakPointReport {
        let radius = sv.radius() as i64;
        let mut break_points = BTreeMap::new();
        for (begin, end) in (-radius..=radius).cartesian_product(-radius..=radius) {
            if let Some(candidate) = self.inspect(sv, begin, end) {
                break_points.insert(candidate.name(), candidate);
            }
        }
        debug!(
            "{}: {} boundary candidates",
            sv.track().name(),
            break_points.len()
        );
        BreakPointReport {
            candidates: break_points.len(),
            break_points,
        }
    }

    fn inspect(
        &self,
        sv: &StructuralVariation,
        begin: i64,
        end: i64,
    ) -> Option<BreakPointCandidate> {
        let signature = sv.signature_kmers(begin, end)?;
        if signature.is_empty() {
            return None;
        }
        // every junction k-mer must be supported in the source genome
        let mut kmers = BTreeMap::new();
        for kmer in signature.keys() {
            let count = self.source_counts.count(kmer);
            if count == 0 {
                return None;
            }
            kmers.insert(kmer.clone(), count as i64);
        }
        // reference counts are deferred; -1 marks them as not yet computed
        let reference_kmers = sv
            .reference_signature_kmers(begin, end)
            .unwrap_or_default()
            .into_keys()
            .map(|kmer| (kmer, -1))
            .collect();
        Some(BreakPointCandidate {
            begin,
            end,
            kmers,
            reference_kmers,
        })
    }
}
