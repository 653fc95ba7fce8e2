//! Inner-kmer extraction.
//!
//! Picks the k-mers interior to each event that can distinguish it, then
//! works out where else in the reference those k-mers occur. Each occurrence
//! is annotated with its flanking sequence and the flank k-mers that appear
//! at no other occurrence; those locally-unique markers are what lets the
//! counter attribute a read to one specific locus later.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::bio;
use crate::bio::kmers::{extract_canonical_kmers, find_kmer};
use crate::config::Configuration;
use crate::counts::KmerCountProvider;
use crate::io::fasta::Reference;
use crate::pipeline::manifest::{InnerKmer, KmerOccurrence, TrackManifest};
use crate::sv::StructuralVariation;

/// Inner k-mers with a reference count above this collide with high-copy
/// regions and are discarded outright.
pub const MAX_INNER_REFERENCE_COUNT: u32 = 10;

/// At most this many inner k-mers are kept per track, rarest first.
pub const MAX_INNER_KMERS: usize = 1000;

/// Junction k-mers count as novel only up to this reference count.
pub const MAX_NOVEL_REFERENCE_COUNT: u32 = 1;

/// Per-track inner-kmer extraction over a loaded reference.
pub struct InnerKmerExtraction<'a> {
    config: &'a Configuration,
    reference: &'a Reference,
    reference_counts: &'a dyn KmerCountProvider,
}

impl<'a> InnerKmerExtraction<'a> {
    pub fn new(
        config: &'a Configuration,
        reference: &'a Reference,
        reference_counts: &'a dyn KmerCountProvider,
    ) -> Self {
        InnerKmerExtraction {
            config,
            reference,
            reference_counts,
        }
    }

    /// Builds the manifest for one track.
    pub fn extract(&self, sv: &StructuralVariation) -> TrackManifest {
        let counter = |kmer: &str| self.reference_counts.count(kmer);
        let inner = sv.inner_kmers(counter, MAX_INNER_REFERENCE_COUNT, MAX_INNER_KMERS, false, true);
        let novel_kmers = sv.boundary_kmers(counter, MAX_NOVEL_REFERENCE_COUNT);

        // a k-mer that also straddles the junction would feed the program
        // from both alleles at once
        let before = inner.len();
        let inner: BTreeMap<String, u32> = inner
            .into_iter()
            .filter(|(kmer, _)| find_kmer(kmer, &novel_kmers).is_none())
            .collect();
        if inner.len() != before {
            warn!(
                "{}: dropped {} inner k-mers colliding with the boundary",
                sv.track().name(),
                before - inner.len()
            );
        }
        if inner.is_empty() {
            warn!("no inner kmers found for {}", sv.track().name());
        }

        let mut manifest = TrackManifest::default();
        for (kmer, multiplicity) in inner {
            let reference = counter(&kmer);
            let record = InnerKmer {
                multiplicity,
                reference,
                occurrences: self.occurrences_of(&kmer),
            };
            if reference == 1 {
                manifest.unique_inner_kmers.insert(kmer, record);
            } else {
                manifest.inner_kmers.insert(kmer, record);
            }
        }
        manifest.novel_kmers = novel_kmers;
        debug!(
            "{}: {} unique, {} repeated inner k-mers",
            sv.track().name(),
            manifest.unique_inner_kmers.len(),
            manifest.inner_kmers.len()
        );
        manifest
    }

    /// Scans the whole reference, both orientations, for the k-mer and
    /// annotates every hit with flanks and locally-unique markers.
    fn occurrences_of(&self, kmer: &str) -> Vec<KmerOccurrence> {
        let k = self.config.ksize;
        let slack = self.config.slack();
        let rc = bio::reverse_complement_str(kmer);
        let mut occurrences = Vec::new();
        for chrom in self.reference.chrom_names() {
            let sequence = self.reference.chrom(chrom).unwrap_or_default();
            let mut positions = find_all(sequence, kmer);
            if rc != kmer {
                positions.extend(find_all(sequence, &rc));
            }
            positions.sort_unstable();
            positions.dedup();
            for position in positions {
                let left_begin = position.saturating_sub(slack);
                let right_begin = (position + k).min(sequence.len());
                let right_end = (position + k + slack).min(sequence.len());
                let left_flank = &sequence[left_begin..position];
                let right_flank = &sequence[right_begin..right_end];
                let flank_kmers: BTreeSet<String> =
                    extract_canonical_kmers(k, &[left_flank, right_flank])
                        .into_keys()
                        .collect();
                occurrences.push(KmerOccurrence {
                    chrom: chrom.to_string(),
                    position,
                    left_flank: left_flank.to_string(),
                    right_flank: right_flank.to_string(),
                    flank_kmers,
                    unique_markers: BTreeSet::new(),
                });
            }
        }
        mark_unique_flanks(&mut occurrences);
        occurrences
    }
}

/// A flank k-mer is locally unique to an occurrence when it appears in
/// exactly one occurrence's flank set.
fn mark_unique_flanks(occurrences: &mut [KmerOccurrence]) {
    let mut censuses: BTreeMap<&str, usize> = BTreeMap::new();
    for occurrence in occurrences.iter() {
        for flank in &occurrence.flank_kmers {
            *censuses.entry(flank.as_str()).or_insert(0) += 1;
        }
    }
    let unique: BTreeSet<String> = censuses
        .into_iter()
        .filter(|&(_, seen)| seen == 1)
        .map(|(flank, _)| flank.to_string())
        .collect();
    for occurrence in occurrences.iter_mut() {
        occurrence.unique_markers = occurrence
            .flank_kmers
            .intersection(&unique)
            .cloned()
            .collect();
    }
}

/// Every start position of `needle` in `haystack`, overlaps included.
fn find_all(haystack: &str, needle: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    if needle.is_empty() {
        return positions;
    }
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        positions.push(from + offset);
        from += offset + 1;
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::bio::kmers::canonicalize;
    use crate::counts::DictionaryCountsProvider;
    use crate::io::bed::Track;
    use crate::sv::SvKind;

    const K: usize = 15;

    fn random_sequence(len: usize, seed: u64) -> String {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len)
            .map(|_| b"ACGT"[rng.random_range(0..4)] as char)
            .collect()
    }

    fn test_config() -> Configuration {
        Configuration {
            ksize: K,
            read_length: 45, // slack of 15: one k-mer per flank
            radius: 4,
            ..Configuration::default()
        }
    }

    fn reference_counts(reference: &Reference) -> DictionaryCountsProvider {
        let mut counts = BTreeMap::new();
        for chrom in reference.chrom_names() {
            let sequence = reference.chrom(chrom).unwrap().to_string();
            for (kmer, count) in extract_canonical_kmers(K, &[sequence.as_str()]) {
                *counts.entry(kmer).or_insert(0) += count;
            }
        }
        DictionaryCountsProvider::from_counts(counts)
    }

    fn extract_for(
        reference: &Reference,
        track: &Track,
        config: &Configuration,
    ) -> TrackManifest {
        let counts = reference_counts(reference);
        let sv = StructuralVariation::from_reference(
            reference,
            track,
            SvKind::Deletion,
            config.radius,
            config.ksize,
        )
        .unwrap();
        InnerKmerExtraction::new(config, reference, &counts).extract(&sv)
    }

    #[test]
    fn test_find_all_overlapping() {
        assert_eq!(find_all("AAAA", "AA"), vec![0, 1, 2]);
        assert_eq!(find_all("ACGT", "GG"), Vec::<usize>::new());
        assert_eq!(find_all("", "A"), Vec::<usize>::new());
    }

    #[test]
    fn test_unique_interior_yields_unique_kmers() {
        let config = test_config();
        let chr1 = random_sequence(400, 23);
        let reference = Reference::from_sequences(vec![("chr1".to_string(), chr1)]);
        let track = Track::new("chr1", 150, 250);
        let manifest = extract_for(&reference, &track, &config);

        assert!(!manifest.unique_inner_kmers.is_empty());
        assert!(manifest.inner_kmers.is_empty());
        for (_, record) in manifest.unique_inner_kmers.iter() {
            assert_eq!(record.reference, 1);
            assert_eq!(record.occurrences.len(), 1);
            let occurrence = &record.occurrences[0];
            assert!(track.contains(&occurrence.chrom, occurrence.position));
            // a single occurrence owns all of its flank k-mers
            assert_eq!(occurrence.unique_markers, occurrence.flank_kmers);
        }
    }

    #[test]
    fn test_repeated_segment_split_and_marked() {
        let config = test_config();
        // the same 40-base segment sits inside the event and again outside
        let segment = random_sequence(40, 31);
        let chr1 = format!(
            "{}{}{}{}{}",
            random_sequence(150, 41),
            segment,
            random_sequence(80, 43),
            segment,
            random_sequence(100, 47),
        );
        let reference = Reference::from_sequences(vec![("chr1".to_string(), chr1)]);
        // event covers the first copy
        let track = Track::new("chr1", 140, 240);
        let manifest = extract_for(&reference, &track, &config);

        // segment k-mers land in the repeated set with two occurrences
        assert!(!manifest.inner_kmers.is_empty());
        for (_, record) in manifest.inner_kmers.iter() {
            assert_eq!(record.reference, 2);
            assert_eq!(record.occurrences.len(), 2);
            let inside: Vec<bool> = record
                .occurrences
                .iter()
                .map(|o| track.contains(&o.chrom, o.position))
                .collect();
            assert_eq!(inside.iter().filter(|&&b| b).count(), 1);
            // flanks differ between the two copies, so each occurrence
            // keeps its own markers
            for occurrence in &record.occurrences {
                assert!(!occurrence.unique_markers.is_empty());
            }
        }
    }

    #[test]
    fn test_boundary_colliding_kmers_dropped() {
        let config = test_config();
        // junction string replayed inside the event interior
        let left = random_sequence(K, 5);
        let right = random_sequence(K, 7);
        let interior = format!(
            "{}{}{}{}",
            random_sequence(20, 9),
            left,
            right,
            random_sequence(40, 13)
        );
        let chr1 = format!(
            "{}{}{}{}{}",
            random_sequence(50, 15),
            left,
            interior,
            right,
            random_sequence(50, 19)
        );
        let begin = 50 + K;
        let end = begin + interior.len();
        let reference = Reference::from_sequences(vec![("chr1".to_string(), chr1)]);
        let track = Track::new("chr1", begin, end);
        let manifest = extract_for(&reference, &track, &config);

        // a k-mer straddling the would-be junction
        let junction = format!("{}{}", left, right);
        let straddling = canonicalize(&junction[1..1 + K]);
        assert!(manifest.novel_kmers.contains_key(&straddling));
        assert!(!manifest.unique_inner_kmers.contains_key(&straddling));
        assert!(!manifest.inner_kmers.contains_key(&straddling));
        // untouched interior k-mers survive
        assert!(!manifest.is_degenerate());
    }

    #[test]
    fn test_occurrences_found_in_reverse_orientation() {
        let config = test_config();
        let segment = random_sequence(40, 61);
        let segment_rc = bio::reverse_complement_str(&segment);
        // one forward copy inside the event, one reverse-complement copy
        // elsewhere
        let chr1 = format!(
            "{}{}{}{}{}",
            random_sequence(150, 63),
            segment,
            random_sequence(80, 67),
            segment_rc,
            random_sequence(100, 71),
        );
        let reference = Reference::from_sequences(vec![("chr1".to_string(), chr1)]);
        let track = Track::new("chr1", 140, 240);
        let manifest = extract_for(&reference, &track, &config);

        assert!(!manifest.inner_kmers.is_empty());
        for (_, record) in manifest.inner_kmers.iter() {
            assert_eq!(record.occurrences.len(), 2);
        }
    }
}
