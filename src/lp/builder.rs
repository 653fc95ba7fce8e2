//! Genotyping program construction.
//!
//! Counted k-mers come in from the manifests, get re-keyed into one flat
//! vector, and become the rows of the program: per-track dosage variables
//! `c`, per-kmer signed errors `e`, and absolute-value surrogates `l` whose
//! sum is minimized. The expected sample count of a k-mer is
//! `coverage * (residue + sum(multiplicity * dosage))`; each row balances
//! that against the observed count with a signed slack.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::warn;

use crate::counts::{CountedKmer, KmerCountProvider};
use crate::io::bed::Track;
use crate::lp::genotype::{Genotype, GenotypeCall};
use crate::lp::solver::LpSolver;
use crate::lp::{LinearProgram, Sense};
use crate::pipeline::manifest::TrackManifest;

/// How the sample counts were produced, which decides what the residue
/// means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountingMode {
    /// Counts are raw sample-wide tallies; reference copies outside any
    /// catalogued event still contribute, so the residue absorbs them.
    Raw,
    /// Counts were already attributed to one locus by the location-aware
    /// counter; nothing is left to absorb.
    LocationAware,
}

/// One k-mer's aggregated inputs to the program.
#[derive(Clone, Debug, PartialEq)]
pub struct KmerEntry {
    pub count: u32,
    pub reference: u32,
    /// Multiplicity of the k-mer inside each claiming event.
    pub tracks: BTreeMap<String, u32>,
}

impl KmerEntry {
    fn multiplicity_sum(&self) -> u32 {
        self.tracks.values().sum()
    }
}

/// Accumulates k-mers across tracks, then builds and solves the program.
pub struct GenotypingProblem {
    coverage: f64,
    mode: CountingMode,
    kmers: IndexMap<String, KmerEntry>,
    pinned: BTreeMap<String, f64>,
}

impl GenotypingProblem {
    pub fn new(coverage: f64, mode: CountingMode) -> Self {
        GenotypingProblem {
            coverage,
            mode,
            kmers: IndexMap::new(),
            pinned: BTreeMap::new(),
        }
    }

    /// Registers one k-mer for one track, merging with earlier claims.
    pub fn add_kmer(&mut self, kmer: &str, count: u32, reference: u32, track: &str, multiplicity: u32) {
        let entry = self.kmers.entry(kmer.to_string()).or_insert(KmerEntry {
            count,
            reference,
            tracks: BTreeMap::new(),
        });
        entry.tracks.insert(track.to_string(), multiplicity);
    }

    /// Ingests the unique inner k-mers of a manifest, with sample counts
    /// looked up in a count provider. Returns how many k-mers the track
    /// contributed.
    pub fn ingest_raw(
        &mut self,
        track: &str,
        manifest: &TrackManifest,
        sample_counts: &dyn KmerCountProvider,
    ) -> usize {
        if manifest.unique_inner_kmers.is_empty() {
            warn!("no inner kmers found for {}", track);
            return 0;
        }
        for (kmer, record) in &manifest.unique_inner_kmers {
            let count = sample_counts.count(kmer);
            self.add_kmer(kmer, count, record.reference, track, record.multiplicity);
        }
        manifest.unique_inner_kmers.len()
    }

    /// Ingests location-aware counts: only k-mers the counter attributed to
    /// this very track are usable.
    pub fn ingest_location_aware(
        &mut self,
        track: &str,
        manifest: &TrackManifest,
        counted: &BTreeMap<String, CountedKmer>,
    ) -> usize {
        let mut added = 0;
        for (kmer, record) in manifest.all_inner_kmers() {
            if let Some(aggregate) = counted.get(kmer) {
                if aggregate.track == track {
                    self.add_kmer(
                        kmer,
                        aggregate.count,
                        aggregate.reference,
                        track,
                        record.multiplicity,
                    );
                    added += 1;
                }
            }
        }
        if added == 0 {
            warn!("no inner kmers found for {}", track);
        }
        added
    }

    /// Pins a track's dosage to a known label; the bounds collapse to
    /// `label ± 0.01` on the next build.
    pub fn pin(&mut self, track: &str, label: f64) {
        self.pinned.insert(track.to_string(), label);
    }

    /// Tracks with at least one usable k-mer, sorted by name. Their order
    /// is the dosage column order.
    pub fn tracks(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .kmers
            .values()
            .flat_map(|entry| entry.tracks.keys())
            .collect();
        names.into_iter().cloned().collect()
    }

    pub fn num_kmers(&self) -> usize {
        self.kmers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kmers.is_empty()
    }

    fn residue(&self, entry: &KmerEntry) -> f64 {
        match self.mode {
            CountingMode::Raw => entry.reference as f64 - entry.multiplicity_sum() as f64,
            CountingMode::LocationAware => 0.0,
        }
    }

    /// Builds the program restricted to a set of dosage columns. K-mers
    /// touching none of them are left out; coupling terms to excluded
    /// tracks are dropped from their rows.
    fn build_for(&self, tracks: &[String]) -> LinearProgram {
        let track_columns: BTreeMap<&str, usize> = tracks
            .iter()
            .enumerate()
            .map(|(column, name)| (name.as_str(), column))
            .collect();
        let relevant: Vec<&KmerEntry> = self
            .kmers
            .values()
            .filter(|entry| entry.tracks.keys().any(|t| track_columns.contains_key(t.as_str())))
            .collect();

        let mut program = LinearProgram::new();
        for name in tracks {
            let (lb, ub) = match self.pinned.get(name) {
                Some(&label) => (label - 0.01, label + 0.01),
                None => (0.0, 1.0),
            };
            program.add_variable(&format!("c_{}", name), lb, ub, 0.0);
        }
        let errors_at = tracks.len();
        for (row, entry) in relevant.iter().enumerate() {
            let ub = entry.count as f64 - self.coverage * self.residue(entry);
            let lb = ub - self.coverage * entry.multiplicity_sum() as f64;
            program.add_variable(&format!("e{}", row), lb, ub, 0.0);
        }
        let surrogates_at = errors_at + relevant.len();
        for row in 0..relevant.len() {
            program.add_variable(&format!("l{}", row), 0.0, f64::INFINITY, 1.0);
        }

        for (row, entry) in relevant.iter().enumerate() {
            let mut terms: Vec<(usize, f64)> = entry
                .tracks
                .iter()
                .filter_map(|(track, &multiplicity)| {
                    track_columns
                        .get(track.as_str())
                        .map(|&column| (column, self.coverage * multiplicity as f64))
                })
                .collect();
            terms.push((errors_at + row, 1.0));
            let rhs = entry.count as f64 - self.coverage * self.residue(entry);
            program.add_constraint(terms, Sense::Equal, rhs);
            program.add_constraint(
                vec![(surrogates_at + row, 1.0), (errors_at + row, 1.0)],
                Sense::GreaterEqual,
                0.0,
            );
            program.add_constraint(
                vec![(surrogates_at + row, 1.0), (errors_at + row, -1.0)],
                Sense::GreaterEqual,
                0.0,
            );
        }
        program
    }

    /// The full program over every claiming track.
    pub fn build(&self) -> LinearProgram {
        self.build_for(&self.tracks())
    }

    /// Builds, solves and decodes the joint program. Tracks that
    /// contributed no k-mers are absent from the result.
    pub fn solve(&self, solver: &dyn LpSolver, lp_path: &Path) -> Result<Vec<GenotypeCall>> {
        let tracks = self.tracks();
        if tracks.is_empty() {
            warn!("genotyping program has no usable k-mers");
            return Ok(Vec::new());
        }
        let program = self.build_for(&tracks);
        let solution = solver
            .solve(&program, lp_path)
            .with_context(|| format!("solving {}", lp_path.display()))?;
        tracks
            .iter()
            .enumerate()
            .map(|(column, name)| decode_call(name, solution.values[column]))
            .collect()
    }

    /// Solves a one-track program per event instead of the joint one.
    /// Shared k-mers stop coupling events; accuracy is traded for
    /// isolation.
    pub fn solve_per_event(
        &self,
        solver: &dyn LpSolver,
        workdir: &Path,
    ) -> Result<Vec<GenotypeCall>> {
        let mut calls = Vec::new();
        for name in self.tracks() {
            let restricted = [name.clone()];
            let program = self.build_for(&restricted);
            let lp_path = workdir.join(format!("{}_program.lp", name));
            let solution = solver
                .solve(&program, &lp_path)
                .with_context(|| format!("solving {}", lp_path.display()))?;
            calls.push(decode_call(&name, solution.values[0])?);
        }
        Ok(calls)
    }
}

fn decode_call(track_name: &str, c: f64) -> Result<GenotypeCall> {
    let track = Track::from_name(track_name)
        .with_context(|| format!("undecodable track name {:?}", track_name))?;
    Ok(GenotypeCall {
        track,
        genotype: Genotype::from_dosage(c),
        c,
    })
}
