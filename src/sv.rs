//! Structural-variation model.
//!
//! One `StructuralVariation` per BED track, carrying the padded reference
//! sequence around the event:
//!
//! ```text
//! <- k bp -><- R bp -><- actual sequence -><- R bp -><- k bp ->
//! ```
//!
//! This is the largest window any signature or inner-kmer extraction needs.
//! Offsets shift the two endpoints within `[-R, R]`; signature synthesis is
//! per-kind (deletion removes the interior, inversion reverse-complements
//! it).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bio;
use crate::bio::kmers::{self, best_n_by_count};
use crate::io::bed::Track;
use crate::io::fasta::Reference;

#[derive(Error, Debug)]
pub enum SvError {
    #[error("chromosome {0} not in reference")]
    MissingChromosome(String),

    #[error("padded window for {0} falls outside its chromosome")]
    OutOfBounds(String),
}

/// SV type, derived from the penultimate component of the BED filename.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SvKind {
    Deletion,
    Inversion,
}

impl SvKind {
    /// `calls.DEL.bed` selects deletions, `calls.INV.bed` inversions.
    pub fn from_bed_path(path: &Path) -> Option<SvKind> {
        let name = path.file_name()?.to_str()?;
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() < 2 {
            return None;
        }
        match parts[parts.len() - 2] {
            "DEL" => Some(SvKind::Deletion),
            "INV" => Some(SvKind::Inversion),
            _ => None,
        }
    }
}

/// A candidate SV with its padded reference sequence.
pub struct StructuralVariation {
    track: Track,
    kind: SvKind,
    radius: usize,
    ksize: usize,
    sequence: String,
}

impl StructuralVariation {
    /// Materializes the padded sequence `[begin - R - k, end + R + k)` from
    /// the reference. Tracks too close to a chromosome edge are rejected.
    pub fn from_reference(
        reference: &Reference,
        track: &Track,
        kind: SvKind,
        radius: usize,
        ksize: usize,
    ) -> Result<Self, SvError> {
        let chrom = reference
            .chrom(&track.chrom)
            .ok_or_else(|| SvError::MissingChromosome(track.chrom.clone()))?;
        let pad = radius + ksize;
        let begin = track
            .begin
            .checked_sub(pad)
            .ok_or_else(|| SvError::OutOfBounds(track.name()))?;
        let end = track.end + pad;
        if end > chrom.len() {
            return Err(SvError::OutOfBounds(track.name()));
        }
        Ok(StructuralVariation {
            track: track.clone(),
            kind,
            radius,
            ksize,
            sequence: chrom[begin..end].to_string(),
        })
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn kind(&self) -> SvKind {
        self.kind
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// The event interior, `reference[begin..end)`.
    pub fn interior(&self) -> &str {
        let pad = self.radius + self.ksize;
        &self.sequence[pad..self.sequence.len() - pad]
    }

    /// Padded sequence trimmed to the endpoints shifted by `(begin, end)`,
    /// keeping `k` bases of context on each side. None when the shifts eat
    /// the context up.
    fn trimmed(&self, begin: i64, end: i64) -> Option<&str> {
        let left = self.radius as i64 + begin;
        let right = self.radius as i64 - end;
        if left < 0 || right < 0 {
            return None;
        }
        let (left, right) = (left as usize, right as usize);
        let len = self.sequence.len();
        if left + right + 2 * self.ksize > len {
            return None;
        }
        Some(&self.sequence[left..len - right])
    }

    /// Head and tail of the shifted endpoints as they read in the
    /// unmodified reference: the first and last `2k` bases of the trimmed
    /// window.
    pub fn reference_signature(&self, begin: i64, end: i64) -> Option<(String, String)> {
        let seq = self.trimmed(begin, end)?;
        Some((
            seq[..2 * self.ksize].to_string(),
            seq[seq.len() - 2 * self.ksize..].to_string(),
        ))
    }

    /// Head and tail around the synthesized junction(s) of the variant
    /// allele. Empty for inversions whose interior is shorter than `2k`.
    pub fn variant_signature(&self, begin: i64, end: i64) -> Option<(String, String)> {
        let seq = self.trimmed(begin, end)?;
        let k = self.ksize;
        let synthesized = match self.kind {
            SvKind::Deletion => {
                // the interior vanishes; k bases on each side meet
                format!("{}{}", &seq[..k], &seq[seq.len() - k..])
            }
            SvKind::Inversion => {
                let interior = &seq[k..seq.len() - k];
                if 2 * k > interior.len() {
                    return None;
                }
                format!(
                    "{}{}{}",
                    &seq[..k],
                    bio::reverse_complement_str(interior),
                    &seq[seq.len() - k..]
                )
            }
        };
        Some((
            synthesized[..2 * k].to_string(),
            synthesized[synthesized.len() - 2 * k..].to_string(),
        ))
    }

    /// Canonical k-mers straddling the variant junction at the given
    /// offsets.
    pub fn signature_kmers(&self, begin: i64, end: i64) -> Option<BTreeMap<String, u32>> {
        let (head, tail) = self.variant_signature(begin, end)?;
        Some(kmers::extract_canonical_kmers(self.ksize, &[&head, &tail]))
    }

    /// Canonical k-mers at the same positions in the untouched reference.
    pub fn reference_signature_kmers(&self, begin: i64, end: i64) -> Option<BTreeMap<String, u32>> {
        let (head, tail) = self.reference_signature(begin, end)?;
        Some(kmers::extract_canonical_kmers(self.ksize, &[&head, &tail]))
    }

    /// Junction k-mers at the unshifted endpoints whose reference count does
    /// not exceed `max_count`. These are the k-mers a read only carries when
    /// the variant allele is present.
    pub fn boundary_kmers<F>(&self, counter: F, max_count: u32) -> BTreeMap<String, u32>
    where
        F: Fn(&str) -> u32,
    {
        match self.variant_signature(0, 0) {
            Some((head, tail)) => kmers::extract_kmers_filtered(
                self.ksize,
                &[&head, &tail],
                true,
                true,
                counter,
                max_count,
            ),
            None => BTreeMap::new(),
        }
    }

    /// K-mers of the event interior, filtered by reference count and capped
    /// at the `n` rarest (ties broken lexicographically).
    pub fn inner_kmers<F>(
        &self,
        counter: F,
        max_count: u32,
        n: usize,
        overlap: bool,
        canonical: bool,
    ) -> BTreeMap<String, u32>
    where
        F: Fn(&str) -> u32 + Copy,
    {
        let extracted = kmers::extract_kmers_filtered(
            self.ksize,
            &[self.interior()],
            overlap,
            canonical,
            counter,
            max_count,
        );
        best_n_by_count(extracted, n, counter)
    }
}
