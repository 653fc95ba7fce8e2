//! Pipeline stages.
//!
//! Four stages, each reading the previous one's JSON: boundary refinement,
//! inner-kmer extraction, location-aware counting, genotyping. Tracks are
//! dealt round-robin across worker shards; workers write per-shard files
//! and the reducer merges them, so a rerun with the same inputs and worker
//! count reproduces every intermediate byte-for-byte.

pub mod breakpoints;
pub mod counting;
pub mod inner_kmers;
pub mod manifest;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::config::Configuration;
use crate::counts::{CountedKmer, KmerCountProvider};
use crate::io::bed::Track;
use crate::io::fasta::Reference;
use crate::io::fastq::{ReadBatches, DEFAULT_BATCH_SIZE};
use crate::io::write_json;
use crate::lp::builder::{CountingMode, GenotypingProblem};
use crate::lp::genotype::{fill_missing, write_genotype_bed, GenotypeCall};
use crate::lp::solver::LpSolver;
use crate::pipeline::breakpoints::BreakPointScan;
use crate::pipeline::counting::LocationAwareCounter;
use crate::pipeline::inner_kmers::InnerKmerExtraction;
use crate::pipeline::manifest::{BatchMerge, BreakPointReport, TrackManifest};
use crate::sv::{StructuralVariation, SvKind};
use crate::utils::parallel::{merge_shards, parallel_process, round_robin, ParallelConfig};

/// Where the sample counts for genotyping come from.
pub enum GenotypeCounts<'a> {
    /// Raw sample-wide counts from an index.
    Raw(&'a dyn KmerCountProvider),
    /// The location-aware counter's aggregate.
    LocationAware(&'a BTreeMap<String, CountedKmer>),
}

fn worker_config(config: &Configuration) -> ParallelConfig {
    ParallelConfig {
        threads: config.max_threads,
        continue_on_error: false,
    }
}

/// Materializes the SV models, logging and skipping tracks the reference
/// cannot support.
fn load_svs(
    config: &Configuration,
    reference: &Reference,
    kind: SvKind,
    tracks: &[Track],
) -> Vec<(String, StructuralVariation)> {
    let mut svs = Vec::with_capacity(tracks.len());
    for track in tracks {
        match StructuralVariation::from_reference(
            reference,
            track,
            kind,
            config.radius,
            config.ksize,
        ) {
            Ok(sv) => svs.push((track.name(), sv)),
            Err(e) => warn!("skipping {}: {}", track.name(), e),
        }
    }
    svs
}

/// Boundary refinement over all tracks. Writes one JSON per worker shard
/// and the merged `breakpoints.json`.
pub fn refine_breakpoints(
    config: &Configuration,
    reference: &Reference,
    kind: SvKind,
    tracks: &[Track],
    source_counts: &dyn KmerCountProvider,
) -> Result<BTreeMap<String, BreakPointReport>> {
    let svs = load_svs(config, reference, kind, tracks);
    let shards: Vec<(usize, Vec<(String, StructuralVariation)>)> =
        round_robin(svs, config.max_threads).into_iter().enumerate().collect();
    let scan = BreakPointScan::new(source_counts);
    let shard_reports: Vec<BTreeMap<String, BreakPointReport>> = parallel_process(
        shards,
        |item| -> Result<BTreeMap<String, BreakPointReport>> {
            let (index, shard) = item;
            let reports: BTreeMap<String, BreakPointReport> = shard
                .iter()
                .map(|(name, sv)| (name.clone(), scan.refine(sv)))
                .collect();
            write_json(
                &config.workdir.join(format!("breakpoints_batch_{}.json", index)),
                &reports,
            )?;
            Ok(reports)
        },
        &worker_config(config),
    )?;
    let merged = merge_shards(shard_reports);
    write_json(&config.workdir.join("breakpoints.json"), &merged)?;
    info!("refined boundaries for {} tracks", merged.len());
    Ok(merged)
}

/// Inner-kmer extraction over all tracks. Writes one manifest per track
/// plus `batch_merge.json` pointing at them.
pub fn extract_inner_kmers(
    config: &Configuration,
    reference: &Reference,
    kind: SvKind,
    tracks: &[Track],
    reference_counts: &dyn KmerCountProvider,
) -> Result<BTreeMap<String, TrackManifest>> {
    let svs = load_svs(config, reference, kind, tracks);
    let extraction = InnerKmerExtraction::new(config, reference, reference_counts);
    let shard_manifests: Vec<BTreeMap<String, TrackManifest>> = parallel_process(
        round_robin(svs, config.max_threads),
        |shard| -> Result<BTreeMap<String, TrackManifest>> {
            let mut manifests = BTreeMap::new();
            for (name, sv) in shard {
                let manifest = extraction.extract(sv);
                write_json(&manifest_path(config, name), &manifest)?;
                manifests.insert(name.clone(), manifest);
            }
            Ok(manifests)
        },
        &worker_config(config),
    )?;
    let merged = merge_shards(shard_manifests);
    let batch: BatchMerge = merged
        .keys()
        .map(|name| (name.clone(), manifest_path(config, name)))
        .collect();
    write_json(&config.workdir.join("batch_merge.json"), &batch)?;
    info!("extracted inner k-mers for {} tracks", merged.len());
    Ok(merged)
}

fn manifest_path(config: &Configuration, track_name: &str) -> PathBuf {
    config
        .workdir
        .join(format!("inner_kmers_{}.json", track_name))
}

/// Location-aware counting of the sample reads. Writes `kmers.json`.
pub fn count_sample(
    config: &Configuration,
    tracks: &[Track],
    manifests: &BTreeMap<String, TrackManifest>,
    reads: &std::path::Path,
) -> Result<BTreeMap<String, CountedKmer>> {
    let pairs: Vec<(&Track, &TrackManifest)> = tracks
        .iter()
        .filter_map(|track| manifests.get(&track.name()).map(|manifest| (track, manifest)))
        .collect();
    let counter = LocationAwareCounter::build(config.ksize, pairs);
    let batches = ReadBatches::open(reads, DEFAULT_BATCH_SIZE)?;
    let aggregate = counter
        .count_reads(batches)
        .with_context(|| format!("counting reads from {}", reads.display()))?;
    write_json(&config.workdir.join("kmers.json"), &aggregate)?;
    info!("counted {} diagnostic k-mers", aggregate.len());
    Ok(aggregate)
}

/// Builds, solves and decodes the genotyping program, then writes the
/// output BED. Every input track gets a line; tracks the program never saw
/// come out absent.
pub fn genotype(
    config: &Configuration,
    tracks: &[Track],
    manifests: &BTreeMap<String, TrackManifest>,
    counts: GenotypeCounts<'_>,
    solver: &dyn LpSolver,
    per_event: bool,
    labels: Option<&BTreeMap<String, f64>>,
) -> Result<Vec<GenotypeCall>> {
    let mut problem = match counts {
        GenotypeCounts::Raw(provider) => {
            let mut problem = GenotypingProblem::new(config.coverage, CountingMode::Raw);
            for (name, manifest) in manifests {
                problem.ingest_raw(name, manifest, provider);
            }
            problem
        }
        GenotypeCounts::LocationAware(aggregate) => {
            let mut problem =
                GenotypingProblem::new(config.coverage, CountingMode::LocationAware);
            for (name, manifest) in manifests {
                problem.ingest_location_aware(name, manifest, aggregate);
            }
            problem
        }
    };
    if let Some(labels) = labels {
        for (track, &label) in labels {
            problem.pin(track, label);
        }
    }

    let mut calls = if per_event {
        problem.solve_per_event(solver, &config.workdir)?
    } else {
        let lp_path = config
            .workdir
            .join(format!("{}_program.lp", config.batch_tag));
        problem.solve(solver, &lp_path)?
    };
    fill_missing(&mut calls, tracks);

    let bed_path = config
        .workdir
        .join(format!("{}_merge.bed", config.batch_tag));
    let mut writer = fs::File::create(&bed_path)
        .with_context(|| format!("failed to create {}", bed_path.display()))?;
    write_genotype_bed(&mut writer, &calls, &config.batch_tag)?;
    info!("wrote {} genotypes to {}", calls.len(), bed_path.display());
    Ok(calls)
}
