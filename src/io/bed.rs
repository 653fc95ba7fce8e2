//! BED track input.
//!
//! Candidate SV intervals arrive as tab-separated `chrom\tstart\tend\t...`
//! lines, 0-based half-open. Malformed lines and oversized events are logged
//! and skipped; a BED file that yields no tracks at all is an error.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Events larger than this are dropped upstream of the pipeline.
pub const MAX_TRACK_LENGTH: usize = 1_000_000;

#[derive(Error, Debug)]
pub enum BedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no usable tracks in {0}")]
    Empty(String),

    #[error("malformed track name: {0}")]
    BadName(String),
}

/// One interval from the input BED, immutable once parsed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Track {
    pub chrom: String,
    pub begin: usize,
    pub end: usize,
}

impl Track {
    pub fn new(chrom: &str, begin: usize, end: usize) -> Self {
        Track {
            chrom: chrom.to_string(),
            begin,
            end,
        }
    }

    /// Stable identifier: `chrom_begin_end`, whitespace collapsed to
    /// underscores.
    pub fn name(&self) -> String {
        let raw = format!("{}_{}_{}", self.chrom, self.begin, self.end);
        raw.split_whitespace().collect::<Vec<_>>().join("_")
    }

    /// Reverses [`Track::name`]. The chromosome itself may contain
    /// underscores, so the numeric fields are taken from the right.
    pub fn from_name(name: &str) -> Result<Self, BedError> {
        let mut parts = name.rsplitn(3, '_');
        let end = parts
            .next()
            .and_then(|t| t.parse::<usize>().ok())
            .ok_or_else(|| BedError::BadName(name.to_string()))?;
        let begin = parts
            .next()
            .and_then(|t| t.parse::<usize>().ok())
            .ok_or_else(|| BedError::BadName(name.to_string()))?;
        let chrom = parts
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BedError::BadName(name.to_string()))?;
        Ok(Track::new(chrom, begin, end))
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    /// Whether a reference position on `chrom` falls inside the interval.
    pub fn contains(&self, chrom: &str, position: usize) -> bool {
        self.chrom.eq_ignore_ascii_case(chrom) && position >= self.begin && position < self.end
    }
}

fn parse_line(line: &str) -> Option<Track> {
    let mut fields = line.split('\t');
    let chrom = fields.next()?.trim();
    if chrom.is_empty() || chrom.starts_with('#') || chrom == "track" {
        return None;
    }
    let begin = fields.next()?.trim().parse::<usize>().ok()?;
    let end = fields.next()?.trim().parse::<usize>().ok()?;
    if end <= begin {
        return None;
    }
    Some(Track::new(chrom, begin, end))
}

/// Reads the tracks of a BED file, skipping anything unusable.
pub fn read_tracks(path: &Path) -> Result<Vec<Track>, BedError> {
    let file = File::open(path)?;
    let mut tracks = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let track = match parse_line(&line) {
            Some(track) => track,
            None => {
                warn!(
                    "skipping malformed line {} in {}: {:?}",
                    number + 1,
                    path.display(),
                    line
                );
                continue;
            }
        };
        if track.len() > MAX_TRACK_LENGTH {
            warn!("skipping {}, too large", track.name());
            continue;
        }
        tracks.push(track);
    }
    if tracks.is_empty() {
        return Err(BedError::Empty(path.display().to_string()));
    }
    Ok(tracks)
}
