//! Location-aware counting.
//!
//! One global map from k-mer to record is frozen before any read is
//! scanned. Both orientations of every k-mer point at the same record, so
//! the scan loop never normalizes orientation; a k-mer claimed by two
//! tracks is evicted because it no longer diagnoses either. Workers own
//! disjoint read batches and thread-local tallies; the reducer sums them,
//! so final counts do not depend on read order.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use log::info;
use rayon::iter::{ParallelBridge, ParallelIterator};

use crate::bio;
use crate::bio::kmers::extract_canonical_kmers;
use crate::counts::CountedKmer;
use crate::io::bed::Track;
use crate::pipeline::manifest::TrackManifest;

/// Frozen attribution data for one diagnostic k-mer.
struct KmerSite {
    kmer: String,
    track: String,
    reference: u32,
    /// Locally-unique markers of occurrences inside the track interval.
    positive: HashSet<String>,
    /// Locally-unique markers of occurrences outside it.
    negative: HashSet<String>,
}

/// Per-site tallies a worker accumulates over its shard.
#[derive(Clone, Copy, Default)]
struct Tally {
    count: u32,
    doubt: u32,
    total: u32,
}

/// The global k-mer map plus the scan machinery.
pub struct LocationAwareCounter {
    ksize: usize,
    lookup: HashMap<String, usize>,
    sites: Vec<KmerSite>,
}

impl LocationAwareCounter {
    /// Builds the frozen map. Tracks are visited in sorted name order so
    /// site indices are deterministic; a k-mer seen under two tracks is
    /// removed for good.
    pub fn build<'a, I>(ksize: usize, tracks: I) -> Self
    where
        I: IntoIterator<Item = (&'a Track, &'a TrackManifest)>,
    {
        let mut ordered: Vec<(&Track, &TrackManifest)> = tracks.into_iter().collect();
        ordered.sort_by_key(|(track, _)| track.name());

        let mut sites: Vec<KmerSite> = Vec::new();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut evicted: HashSet<String> = HashSet::new();
        for (track, manifest) in ordered {
            for (kmer, record) in manifest.all_inner_kmers() {
                if evicted.contains(kmer) {
                    continue;
                }
                if claimed.contains(kmer) {
                    // claimed by an earlier track: no longer diagnostic
                    evicted.insert(kmer.clone());
                    continue;
                }
                let mut positive = HashSet::new();
                let mut negative = HashSet::new();
                for occurrence in &record.occurrences {
                    let markers = occurrence.unique_markers.iter().cloned();
                    if track.contains(&occurrence.chrom, occurrence.position) {
                        positive.extend(markers);
                    } else {
                        negative.extend(markers);
                    }
                }
                claimed.insert(kmer.clone());
                sites.push(KmerSite {
                    kmer: kmer.clone(),
                    track: track.name(),
                    reference: record.reference,
                    positive,
                    negative,
                });
            }
        }
        // keep only surviving sites, then key both orientations
        let sites: Vec<KmerSite> = sites
            .into_iter()
            .filter(|site| !evicted.contains(&site.kmer))
            .collect();
        let mut lookup = HashMap::with_capacity(2 * sites.len());
        for (index, site) in sites.iter().enumerate() {
            lookup.insert(site.kmer.clone(), index);
            lookup.insert(bio::reverse_complement_str(&site.kmer), index);
        }
        info!(
            "global map holds {} k-mers ({} evicted as shared)",
            sites.len(),
            evicted.len()
        );
        LocationAwareCounter {
            ksize,
            lookup,
            sites,
        }
    }

    /// Number of k-mers in the global map.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn contains(&self, kmer: &str) -> bool {
        self.lookup.contains_key(kmer)
    }

    /// Scans one shard of reads into a local tally vector.
    fn scan_batch(&self, reads: &[String]) -> Vec<Tally> {
        let mut tallies = vec![Tally::default(); self.sites.len()];
        for read in reads {
            self.scan_read(read, &mut tallies);
        }
        tallies
    }

    fn scan_read(&self, read: &str, tallies: &mut [Tally]) {
        let k = self.ksize;
        if read.len() < k {
            return;
        }
        // canonical content of the read, for marker membership tests
        let read_kmers = extract_canonical_kmers(k, &[read]);
        let mut hits: HashSet<usize> = HashSet::new();
        let bytes = read.as_bytes();
        for start in 0..=bytes.len() - k {
            if !bytes[start..start + k]
                .iter()
                .all(|&b| bio::is_valid_base(b))
            {
                continue;
            }
            if let Some(&site) = self.lookup.get(&read[start..start + k]) {
                hits.insert(site);
            }
        }
        for site_index in hits {
            let site = &self.sites[site_index];
            let tally = &mut tallies[site_index];
            tally.total += 1;
            let positive = site
                .positive
                .iter()
                .any(|marker| read_kmers.contains_key(marker));
            let negative = site
                .negative
                .iter()
                .any(|marker| read_kmers.contains_key(marker));
            if positive && !negative {
                tally.count += 1;
            } else if negative && !positive {
                // confidently somewhere else; no credit
            } else {
                tally.doubt += 1;
            }
        }
    }

    /// Counts the sample: shards of reads are scanned in parallel and the
    /// per-worker tallies summed. The result is independent of read order
    /// and sharding.
    pub fn count_reads<I>(&self, batches: I) -> Result<BTreeMap<String, CountedKmer>>
    where
        I: Iterator<Item = Result<Vec<String>>> + Send,
    {
        let zero = || vec![Tally::default(); self.sites.len()];
        let tallies = batches
            .par_bridge()
            .map(|batch| batch.map(|reads| self.scan_batch(&reads)))
            .try_reduce(zero, |mut left, right| {
                for (a, b) in left.iter_mut().zip(right) {
                    a.count += b.count;
                    a.doubt += b.doubt;
                    a.total += b.total;
                }
                Ok(left)
            })?;
        Ok(self.aggregate(&tallies))
    }

    fn aggregate(&self, tallies: &[Tally]) -> BTreeMap<String, CountedKmer> {
        self.sites
            .iter()
            .zip(tallies)
            .map(|(site, tally)| {
                (
                    site.kmer.clone(),
                    CountedKmer {
                        count: tally.count,
                        doubt: tally.doubt,
                        total: tally.total,
                        track: site.track.clone(),
                        reference: site.reference,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::manifest::{InnerKmer, KmerOccurrence};

    const K: usize = 5;

    fn occurrence(
        chrom: &str,
        position: usize,
        markers: &[&str],
    ) -> KmerOccurrence {
        KmerOccurrence {
            chrom: chrom.to_string(),
            position,
            left_flank: String::new(),
            right_flank: String::new(),
            flank_kmers: markers.iter().map(|m| m.to_string()).collect(),
            unique_markers: markers.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn manifest_with(kmer: &str, record: InnerKmer) -> TrackManifest {
        let mut manifest = TrackManifest::default();
        if record.reference == 1 {
            manifest.unique_inner_kmers.insert(kmer.to_string(), record);
        } else {
            manifest.inner_kmers.insert(kmer.to_string(), record);
        }
        manifest
    }

    // AACCG inside the track at 100, second occurrence at 500. Marker
    // strings are canonical forms, as the extractor emits them.
    fn two_locus_manifest() -> TrackManifest {
        manifest_with(
            "AACCG",
            InnerKmer {
                multiplicity: 1,
                reference: 2,
                occurrences: vec![
                    occurrence("chr1", 100, &["AAGGC"]),
                    occurrence("chr1", 500, &["ATCCG"]),
                ],
            },
        )
    }

    fn counter_for(manifests: Vec<(Track, TrackManifest)>) -> LocationAwareCounter {
        let refs: Vec<(&Track, &TrackManifest)> =
            manifests.iter().map(|(t, m)| (t, m)).collect();
        LocationAwareCounter::build(K, refs)
    }

    fn batches(reads: Vec<&str>) -> impl Iterator<Item = Result<Vec<String>>> + Send {
        std::iter::once(Ok(reads.into_iter().map(|r| r.to_string()).collect()))
    }

    #[test]
    fn test_confident_positive_and_negative() {
        let track = Track::new("chr1", 50, 150);
        let counter = counter_for(vec![(track, two_locus_manifest())]);

        let aggregate = counter
            .count_reads(batches(vec![
                "AACCGTAAGGC", // k-mer + positive marker
                "AACCGTATCCG", // k-mer + negative marker
                "AACCGTTTTTT", // k-mer alone
            ]))
            .unwrap();

        let record = &aggregate["AACCG"];
        assert_eq!(record.total, 3);
        assert_eq!(record.count, 1);
        assert_eq!(record.doubt, 1);
        assert_eq!(record.track, "chr1_50_150");
        assert_eq!(record.reference, 2);
    }

    #[test]
    fn test_both_markers_is_doubt() {
        let track = Track::new("chr1", 50, 150);
        let counter = counter_for(vec![(track, two_locus_manifest())]);
        let aggregate = counter
            .count_reads(batches(vec!["AACCGTAAGGCATCCG"]))
            .unwrap();
        let record = &aggregate["AACCG"];
        assert_eq!(record.total, 1);
        assert_eq!(record.count, 0);
        assert_eq!(record.doubt, 1);
    }

    #[test]
    fn test_reverse_orientation_read_hits_same_record() {
        let track = Track::new("chr1", 50, 150);
        let counter = counter_for(vec![(track, two_locus_manifest())]);
        // revcomp of AACCGTAAGGC
        let rc = crate::bio::reverse_complement_str("AACCGTAAGGC");
        let aggregate = counter.count_reads(batches(vec![&rc])).unwrap();
        let record = &aggregate["AACCG"];
        assert_eq!(record.total, 1);
        assert_eq!(record.count, 1);
    }

    #[test]
    fn test_shared_kmer_evicted() {
        let track_a = Track::new("chr1", 50, 150);
        let track_b = Track::new("chr2", 10, 90);
        let manifest_a = two_locus_manifest();
        let manifest_b = manifest_with(
            "AACCG",
            InnerKmer {
                multiplicity: 1,
                reference: 2,
                occurrences: vec![occurrence("chr2", 20, &["AAGGT"])],
            },
        );
        let counter = counter_for(vec![(track_a, manifest_a), (track_b, manifest_b)]);
        assert!(counter.is_empty());
        assert!(!counter.contains("AACCG"));
    }

    #[test]
    fn test_distinct_kmers_both_kept() {
        let track_a = Track::new("chr1", 50, 150);
        let track_b = Track::new("chr2", 10, 90);
        let manifest_b = manifest_with(
            "AAGGT",
            InnerKmer {
                multiplicity: 1,
                reference: 1,
                occurrences: vec![occurrence("chr2", 20, &["ATGGG"])],
            },
        );
        let counter = counter_for(vec![(track_a, two_locus_manifest()), (track_b, manifest_b)]);
        assert_eq!(counter.len(), 2);
        assert!(counter.contains("AACCG"));
        assert!(counter.contains("AAGGT"));
    }

    #[test]
    fn test_kmer_repeated_in_read_counted_once() {
        let track = Track::new("chr1", 50, 150);
        // odd k has no palindromes, so the closest case is a read carrying
        // the k-mer at two windows; it is still one observation
        let counter = counter_for(vec![(track, two_locus_manifest())]);
        let aggregate = counter
            .count_reads(batches(vec!["AACCGAACCGAAGGC"]))
            .unwrap();
        let record = &aggregate["AACCG"];
        // two windows, one read: a single observation
        assert_eq!(record.total, 1);
    }

    #[test]
    fn test_tallies_merge_across_batches() {
        let track = Track::new("chr1", 50, 150);
        let counter = counter_for(vec![(track, two_locus_manifest())]);
        let reads: Vec<Result<Vec<String>>> = vec![
            Ok(vec!["AACCGTAAGGC".to_string()]),
            Ok(vec!["AACCGTAAGGC".to_string(), "TTTTTTTTTT".to_string()]),
            Ok(vec!["AACCGTATCCG".to_string()]),
        ];
        let aggregate = counter.count_reads(reads.into_iter()).unwrap();
        let record = &aggregate["AACCG"];
        assert_eq!(record.total, 3);
        assert_eq!(record.count, 2);
        assert_eq!(record.doubt, 0);
        // confident negatives are total minus the two attributed classes
        assert_eq!(record.total - record.count - record.doubt, 1);
    }
}
