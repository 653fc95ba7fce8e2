//! Genotype decoding and output.
//!
//! The solved dosage `c` measures how much of the reference sequence inside
//! the event is still present in the sample: a full dose means the variant
//! is absent, half a dose means one haplotype carries it, none means both
//! do. `round(2c)` picks among the three calls.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::io::bed::Track;

/// Diploid genotype of one event, ordered (0, 0) < (1, 0) < (1, 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Genotype {
    Absent,
    Heterozygous,
    Homozygous,
}

impl Genotype {
    /// Decodes a reference dosage in `[0, 1]`.
    pub fn from_dosage(c: f64) -> Genotype {
        let s = (2.0 * c).round() as i64;
        match s {
            s if s >= 2 => Genotype::Absent,
            1 => Genotype::Heterozygous,
            _ => Genotype::Homozygous,
        }
    }
}

impl std::fmt::Display for Genotype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Genotype::Absent => "(0, 0)",
            Genotype::Heterozygous => "(1, 0)",
            Genotype::Homozygous => "(1, 1)",
        };
        write!(f, "{}", s)
    }
}

/// One genotyped track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenotypeCall {
    pub track: Track,
    pub genotype: Genotype,
    /// The dosage the program assigned.
    pub c: f64,
}

/// Adds an absent call (full reference dosage) for every track the program
/// never saw, then orders all calls by track.
pub fn fill_missing(calls: &mut Vec<GenotypeCall>, all_tracks: &[Track]) {
    for track in all_tracks {
        if !calls.iter().any(|call| &call.track == track) {
            calls.push(GenotypeCall {
                track: track.clone(),
                genotype: Genotype::Absent,
                c: 1.0,
            });
        }
    }
    calls.sort_by(|a, b| a.track.cmp(&b.track));
}

/// Writes the output BED:
/// `chrom\tstart\tend\tgenotype\tc\tbatch_tag`.
pub fn write_genotype_bed<W: Write>(
    writer: &mut W,
    calls: &[GenotypeCall],
    batch_tag: &str,
) -> io::Result<()> {
    for call in calls {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            call.track.chrom, call.track.begin, call.track.end, call.genotype, call.c, batch_tag
        )?;
    }
    Ok(())
}
