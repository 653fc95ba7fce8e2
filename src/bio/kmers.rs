//! K-mer generation and processing utilities.
//!
//! Every k-mer that crosses a module boundary in this crate is canonical:
//! the lexicographically smaller of the k-mer and its reverse complement.
//! Windows containing non-ACGT bases are skipped, never reported as errors.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bio;

/// Returns the canonical form of a k-mer: the lexicographically smaller of
/// the uppercased sequence and its reverse complement.
pub fn canonicalize(seq: &str) -> String {
    let upper = seq.to_ascii_uppercase();
    let rc = bio::reverse_complement_str(&upper);
    if upper <= rc {
        upper
    } else {
        rc
    }
}

fn window_is_valid(window: &[u8]) -> bool {
    window.iter().all(|&b| bio::is_valid_base(b))
}

/// Counts canonical k-mers over a set of sequences.
///
/// Windows advance one base at a time; windows containing a non-ACGT base
/// are skipped.
pub fn extract_canonical_kmers(k: usize, seqs: &[&str]) -> BTreeMap<String, u32> {
    extract_kmers_filtered(k, seqs, true, true, |_| 0, u32::MAX)
}

/// Counts k-mers, dropping any k-mer whose count under `counter` exceeds
/// `max_count`.
///
/// # Arguments
///
/// * `k` - k-mer length.
/// * `seqs` - input sequences.
/// * `overlap` - when false, the window advances by `k` after each emitted
///   k-mer instead of by one.
/// * `canonical` - when true, k-mers are keyed by canonical form.
/// * `counter` - reference count lookup used for filtering.
/// * `max_count` - k-mers counted above this are skipped.
pub fn extract_kmers_filtered<F>(
    k: usize,
    seqs: &[&str],
    overlap: bool,
    canonical: bool,
    counter: F,
    max_count: u32,
) -> BTreeMap<String, u32>
where
    F: Fn(&str) -> u32,
{
    let mut kmers: BTreeMap<String, u32> = BTreeMap::new();
    if k == 0 {
        return kmers;
    }
    for seq in seqs {
        let bytes = seq.as_bytes();
        if bytes.len() < k {
            continue;
        }
        let mut i = 0;
        while i + k <= bytes.len() {
            let window = &bytes[i..i + k];
            if !window_is_valid(window) {
                i += 1;
                continue;
            }
            let kmer = if canonical {
                canonicalize(&seq[i..i + k])
            } else {
                seq[i..i + k].to_ascii_uppercase()
            };
            if counter(&kmer) > max_count {
                i += 1;
                continue;
            }
            *kmers.entry(kmer).or_insert(0) += 1;
            i += if overlap { 1 } else { k };
        }
    }
    kmers
}

/// Keeps the `n` k-mers with the smallest reference count, breaking ties by
/// lexicographic order. Returns the input untouched when it already fits.
pub fn best_n_by_count<F>(
    kmers: BTreeMap<String, u32>,
    n: usize,
    counter: F,
) -> BTreeMap<String, u32>
where
    F: Fn(&str) -> u32,
{
    if kmers.len() <= n {
        return kmers;
    }
    let mut ranked: Vec<(u32, String, u32)> = kmers
        .into_iter()
        .map(|(kmer, multiplicity)| (counter(&kmer), kmer, multiplicity))
        .collect();
    ranked.sort();
    ranked
        .into_iter()
        .take(n)
        .map(|(_, kmer, multiplicity)| (kmer, multiplicity))
        .collect()
}

/// Looks a k-mer up in a map under either orientation, returning the stored
/// key that matched.
pub fn find_kmer<'a, V>(kmer: &str, kmers: &'a BTreeMap<String, V>) -> Option<&'a str> {
    if let Some((key, _)) = kmers.get_key_value(kmer) {
        return Some(key.as_str());
    }
    let rc = bio::reverse_complement_str(kmer);
    kmers.get_key_value(&rc).map(|(key, _)| key.as_str())
}

/// Extracts gapped k-mers: canonical windows of `hsize` bases with
/// `hsize - ksize` bases masked out at a fixed offset.
///
/// The mask offset is drawn once per extractor from a seeded generator, so
/// two extractors built with the same seed produce identical masks.
pub struct GappedKmerExtractor {
    hsize: usize,
    ksize: usize,
    mask_start: usize,
}

impl GappedKmerExtractor {
    pub fn new(hsize: usize, ksize: usize, seed: u64) -> Self {
        assert!(ksize >= 2 && hsize > ksize, "window must exceed kept length");
        let mut rng = StdRng::seed_from_u64(seed);
        let mask_start = rng.random_range(1..ksize);
        GappedKmerExtractor {
            hsize,
            ksize,
            mask_start,
        }
    }

    /// Offset of the masked gap within the window.
    pub fn mask_start(&self) -> usize {
        self.mask_start
    }

    pub fn extract(&self, seqs: &[&str]) -> BTreeMap<String, u32> {
        let gap = self.hsize - self.ksize;
        let mut kmers: BTreeMap<String, u32> = BTreeMap::new();
        for seq in seqs {
            let bytes = seq.as_bytes();
            if bytes.len() < self.hsize {
                continue;
            }
            for i in 0..=bytes.len() - self.hsize {
                let window = &bytes[i..i + self.hsize];
                if !window_is_valid(window) {
                    continue;
                }
                let canonical = canonicalize(&seq[i..i + self.hsize]);
                let gapped = format!(
                    "{}{}",
                    &canonical[..self.mask_start],
                    &canonical[self.mask_start + gap..]
                );
                *kmers.entry(gapped).or_insert(0) += 1;
            }
        }
        kmers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_picks_smaller_strand() {
        // revcomp(CGT) = ACG < CGT
        assert_eq!(canonicalize("CGT"), "ACG");
        assert_eq!(canonicalize("ACG"), "ACG");
    }

    #[test]
    fn test_canonicalize_involution() {
        for seq in ["TTGACCA", "TTTT", "ACGTACGTACG"] {
            let once = canonicalize(seq);
            assert_eq!(canonicalize(&once), once);
        }
    }

    #[test]
    fn test_canonicalize_matches_reverse_complement() {
        let seq = "GGATCCTTAG";
        let rc = crate::bio::reverse_complement_str(seq);
        assert_eq!(canonicalize(seq), canonicalize(&rc));
    }

    #[test]
    fn test_canonicalize_uppercases() {
        assert_eq!(canonicalize("acg"), "ACG");
    }

    #[test]
    fn test_extract_counts_simple() {
        // 3-mers of ACGTACGT: ACG CGT GTA TAC ACG CGT
        // canonical:          ACG ACG GTA GTA ACG ACG
        let kmers = extract_canonical_kmers(3, &["ACGTACGT"]);
        assert_eq!(kmers.get("ACG"), Some(&4));
        assert_eq!(kmers.get("GTA"), Some(&2));
        assert_eq!(kmers.len(), 2);
    }

    #[test]
    fn test_extract_skips_invalid_windows() {
        let kmers = extract_canonical_kmers(3, &["ACNGT"]);
        assert!(kmers.is_empty());
        let kmers = extract_canonical_kmers(3, &["ACGNTTTT"]);
        assert!(kmers.contains_key("ACG"));
        assert!(kmers.contains_key("AAA"));
    }

    #[test]
    fn test_extract_short_sequence() {
        assert!(extract_canonical_kmers(5, &["ACGT"]).is_empty());
        assert!(extract_canonical_kmers(0, &["ACGT"]).is_empty());
    }

    #[test]
    fn test_extract_without_overlap_strides_by_k() {
        // windows taken at 0, 3, 6: AAA CCC GGG -> GGG canonicalizes to CCC
        let kmers = extract_kmers_filtered(3, &["AAACCCGGG"], false, true, |_| 0, u32::MAX);
        assert_eq!(kmers.get("AAA"), Some(&1));
        assert_eq!(kmers.get("CCC"), Some(&2));
        assert_eq!(kmers.len(), 2);
    }

    #[test]
    fn test_extract_filters_by_counter() {
        let counter = |kmer: &str| if kmer == "AAA" { 5 } else { 0 };
        let kmers = extract_kmers_filtered(3, &["AAATTT"], true, true, counter, 4);
        // AAA (and TTT, whose canonical form is AAA) are filtered out;
        // the AAT/ATT windows survive.
        assert!(!kmers.contains_key("AAA"));
        assert_eq!(kmers.get("AAT"), Some(&2));
        let kmers = extract_kmers_filtered(3, &["AAATTT"], true, true, counter, 5);
        assert!(kmers.contains_key("AAA"));
    }

    #[test]
    fn test_extract_non_canonical_keeps_orientation() {
        let kmers = extract_kmers_filtered(3, &["CGTCGT"], true, false, |_| 0, u32::MAX);
        assert_eq!(kmers.get("CGT"), Some(&2));
        assert!(!kmers.contains_key("ACG"));
    }

    #[test]
    fn test_palindrome_counted_once() {
        // ACGT is its own reverse complement.
        let kmers = extract_canonical_kmers(4, &["ACGT"]);
        assert_eq!(kmers.get("ACGT"), Some(&1));
        assert_eq!(kmers.len(), 1);
    }

    #[test]
    fn test_best_n_orders_by_count_then_lex() {
        let mut input = BTreeMap::new();
        input.insert("AAA".to_string(), 1);
        input.insert("CCC".to_string(), 1);
        input.insert("GGA".to_string(), 1);
        let counter = |kmer: &str| match kmer {
            "AAA" => 3,
            "CCC" => 1,
            _ => 1,
        };
        let best = best_n_by_count(input, 2, counter);
        // CCC and GGA share the smallest count; lexicographic order keeps both.
        assert!(best.contains_key("CCC"));
        assert!(best.contains_key("GGA"));
        assert!(!best.contains_key("AAA"));
    }

    #[test]
    fn test_find_kmer_either_orientation() {
        let mut kmers = BTreeMap::new();
        kmers.insert("ACG".to_string(), 1);
        assert_eq!(find_kmer("ACG", &kmers), Some("ACG"));
        assert_eq!(find_kmer("CGT", &kmers), Some("ACG"));
        assert_eq!(find_kmer("GGG", &kmers), None);
    }

    #[test]
    fn test_gapped_extractor_deterministic_per_seed() {
        let a = GappedKmerExtractor::new(35, 30, 17);
        let b = GappedKmerExtractor::new(35, 30, 17);
        assert_eq!(a.mask_start(), b.mask_start());
        let seq = "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT";
        assert_eq!(a.extract(&[seq]), b.extract(&[seq]));
    }

    #[test]
    fn test_gapped_kmer_length() {
        let extractor = GappedKmerExtractor::new(10, 8, 3);
        let kmers = extractor.extract(&["ACGTACGTACGTACGT"]);
        assert!(!kmers.is_empty());
        for kmer in kmers.keys() {
            assert_eq!(kmer.len(), 8);
        }
    }
}
