//! Command-line interface.
//!
//! One subcommand per pipeline stage plus `build-index` for bootstrapping
//! the binary k-mer indexes. Arguments are folded into a `Configuration`
//! that is passed down explicitly; nothing global.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use crate::bio::kmers::{extract_canonical_kmers, GappedKmerExtractor};
use crate::config::Configuration;
use crate::counts::index::write_index;
use crate::counts::{DictionaryCountsProvider, IndexCountsProvider, KmerCountProvider};
use crate::io::bed::{read_tracks, Track};
use crate::io::fasta::Reference;
use crate::io::fastq::{ReadBatches, DEFAULT_BATCH_SIZE};
use crate::io::read_json;
use crate::lp::solver::GlpsolSolver;
use crate::pipeline;
use crate::pipeline::manifest::{BatchMerge, TrackManifest};
use crate::pipeline::GenotypeCounts;
use crate::sv::SvKind;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Arguments shared by the pipeline stages.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Candidate SV intervals (`*.DEL.bed` or `*.INV.bed`).
    #[arg(short, long)]
    pub bed: PathBuf,

    /// Reference genome FASTA.
    #[arg(short, long)]
    pub reference: PathBuf,

    /// K-mer count index over the reference genome; counted in memory from
    /// the FASTA when omitted.
    #[arg(long)]
    pub reference_index: Option<PathBuf>,

    /// K-mer length.
    #[arg(short = 'k', long, default_value_t = 31)]
    pub ksize: usize,

    /// Length of the sample reads.
    #[arg(long, default_value_t = 100)]
    pub read_length: usize,

    /// Breakpoint search radius.
    #[arg(long, default_value_t = 50)]
    pub radius: usize,

    /// Worker threads.
    #[arg(short = 't', long, default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Directory for intermediate manifests and solver files.
    #[arg(long, default_value = "output")]
    pub workdir: PathBuf,

    /// Tag written in the last column of the output BED.
    #[arg(long, default_value = "unique_inner_kmers")]
    pub batch_tag: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Count canonical k-mers of a FASTA/FASTQ file into a binary index.
    BuildIndex {
        /// Sequences to count.
        #[arg(short, long)]
        input: PathBuf,

        /// Index file to write.
        #[arg(short, long)]
        output: PathBuf,

        /// K-mer length.
        #[arg(short = 'k', long, default_value_t = 31)]
        ksize: usize,

        /// Count gapped k-mers: windows of `hsize` bases masked down to
        /// `ksize`.
        #[arg(long)]
        gapped: bool,

        /// Window length for gapped k-mers.
        #[arg(long, default_value_t = 35)]
        hsize: usize,

        /// Seed for drawing the gapped-kmer mask offset.
        #[arg(long, default_value_t = 0)]
        gap_seed: u64,
    },

    /// Grid-search breakpoint offsets and report each track's frontier.
    RefineBreakpoints {
        #[command(flatten)]
        common: CommonArgs,

        /// Count index of the genome the events were detected in.
        #[arg(long)]
        source_index: PathBuf,
    },

    /// Extract per-track inner k-mers with occurrences and local markers.
    ExtractInnerKmers {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Scan sample reads and attribute k-mer observations to loci.
    CountKmers {
        #[command(flatten)]
        common: CommonArgs,

        /// Sample reads (FASTQ, optionally gzipped).
        #[arg(long)]
        reads: PathBuf,
    },

    /// Build and solve the genotyping program, writing the genotype BED.
    Genotype {
        #[command(flatten)]
        common: CommonArgs,

        /// Mean sample read depth.
        #[arg(long)]
        coverage: f64,

        /// Sample reads; required unless `kmers.json` already exists or a
        /// sample index is given.
        #[arg(long)]
        reads: Option<PathBuf>,

        /// Raw count index over the sample; selects raw counting instead of
        /// the location-aware aggregate.
        #[arg(long)]
        sample_index: Option<PathBuf>,

        /// Use in-memory count maps produced by earlier stages.
        #[arg(long)]
        simulation: bool,

        /// Solve one program per event instead of the joint one.
        #[arg(long)]
        per_event: bool,

        /// JSON map of track name to known dosage label; listed tracks are
        /// pinned to `label ± 0.01`.
        #[arg(long)]
        labels: Option<PathBuf>,

        /// Solver binary to invoke.
        #[arg(long, default_value = "glpsol")]
        solver: PathBuf,
    },
}

impl CommonArgs {
    fn configuration(&self) -> Configuration {
        Configuration {
            ksize: self.ksize,
            read_length: self.read_length,
            radius: self.radius,
            max_threads: self.threads,
            bed_file: self.bed.clone(),
            reference: self.reference.clone(),
            reference_index: self.reference_index.clone(),
            workdir: self.workdir.clone(),
            batch_tag: self.batch_tag.clone(),
            ..Configuration::default()
        }
    }
}

/// Main entry point for the CLI.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::BuildIndex {
            input,
            output,
            ksize,
            gapped,
            hsize,
            gap_seed,
        } => {
            let extractor = gapped.then(|| GappedKmerExtractor::new(hsize, ksize, gap_seed));
            build_index(&input, &output, ksize, extractor.as_ref())
        }
        Commands::RefineBreakpoints {
            common,
            source_index,
        } => {
            let config = common.configuration();
            setup(&config)?;
            let (reference, kind, tracks) = load_inputs(&config)?;
            let source = IndexCountsProvider::open(&source_index)?;
            pipeline::refine_breakpoints(&config, &reference, kind, &tracks, &source)?;
            Ok(())
        }
        Commands::ExtractInnerKmers { common } => {
            let config = common.configuration();
            setup(&config)?;
            let (reference, kind, tracks) = load_inputs(&config)?;
            let counts = reference_counts(&config, &reference)?;
            pipeline::extract_inner_kmers(&config, &reference, kind, &tracks, counts.as_ref())?;
            Ok(())
        }
        Commands::CountKmers { common, reads } => {
            let config = common.configuration();
            setup(&config)?;
            let (reference, kind, tracks) = load_inputs(&config)?;
            let manifests = load_or_extract_manifests(&config, &reference, kind, &tracks)?;
            pipeline::count_sample(&config, &tracks, &manifests, &reads)?;
            Ok(())
        }
        Commands::Genotype {
            common,
            coverage,
            reads,
            sample_index,
            simulation,
            per_event,
            labels,
            solver,
        } => {
            let mut config = common.configuration();
            config.coverage = coverage;
            config.sample_index = sample_index.clone();
            config.simulation = simulation;
            setup(&config)?;
            let (reference, kind, tracks) = load_inputs(&config)?;
            let manifests = load_or_extract_manifests(&config, &reference, kind, &tracks)?;

            let labels: Option<BTreeMap<String, f64>> = match labels {
                Some(path) => Some(read_json(&path)?),
                None => None,
            };
            let solver = GlpsolSolver::with_binary(solver);

            // the simulation flag forces the in-memory aggregate even when
            // a sample index exists
            let calls = if let (Some(index), false) = (&config.sample_index, config.simulation) {
                let provider = IndexCountsProvider::open(index)?;
                pipeline::genotype(
                    &config,
                    &tracks,
                    &manifests,
                    GenotypeCounts::Raw(&provider),
                    &solver,
                    per_event,
                    labels.as_ref(),
                )?
            } else {
                let aggregate_path = config.workdir.join("kmers.json");
                let aggregate = if aggregate_path.exists() {
                    read_json(&aggregate_path)?
                } else {
                    let reads = reads.ok_or_else(|| {
                        anyhow!(
                            "no sample counts: pass --reads or --sample-index, \
                             or run count-kmers first"
                        )
                    })?;
                    pipeline::count_sample(&config, &tracks, &manifests, &reads)?
                };
                pipeline::genotype(
                    &config,
                    &tracks,
                    &manifests,
                    GenotypeCounts::LocationAware(&aggregate),
                    &solver,
                    per_event,
                    labels.as_ref(),
                )?
            };
            info!("genotyped {} tracks", calls.len());
            Ok(())
        }
    }
}

fn setup(config: &Configuration) -> Result<()> {
    fs::create_dir_all(&config.workdir)
        .with_context(|| format!("failed to create {}", config.workdir.display()))?;
    // a repeated build_global in the same process keeps the first pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_threads)
        .build_global()
        .ok();
    Ok(())
}

fn load_inputs(config: &Configuration) -> Result<(Reference, SvKind, Vec<Track>)> {
    let kind = SvKind::from_bed_path(&config.bed_file).ok_or_else(|| {
        anyhow!(
            "cannot derive SV type from {}: expected *.DEL.bed or *.INV.bed",
            config.bed_file.display()
        )
    })?;
    let tracks = read_tracks(&config.bed_file)?;
    info!(
        "loaded {} tracks from {}",
        tracks.len(),
        config.bed_file.display()
    );
    let reference = Reference::load(&config.reference)?;
    Ok((reference, kind, tracks))
}

/// Opens the reference count index, or counts the loaded FASTA in memory
/// when none was built.
fn reference_counts(
    config: &Configuration,
    reference: &Reference,
) -> Result<Box<dyn KmerCountProvider>> {
    if let Some(path) = &config.reference_index {
        return Ok(Box::new(IndexCountsProvider::open(path)?));
    }
    info!("no reference index given; counting the reference in memory");
    let mut counts = BTreeMap::new();
    for chrom in reference.chrom_names() {
        let sequence = reference.chrom(chrom).unwrap_or_default().to_string();
        for (kmer, count) in extract_canonical_kmers(config.ksize, &[sequence.as_str()]) {
            *counts.entry(kmer).or_insert(0) += count;
        }
    }
    Ok(Box::new(DictionaryCountsProvider::from_counts(counts)))
}

/// Reuses the manifests of a previous extraction run, or extracts now.
fn load_or_extract_manifests(
    config: &Configuration,
    reference: &Reference,
    kind: SvKind,
    tracks: &[Track],
) -> Result<BTreeMap<String, TrackManifest>> {
    let batch_path = config.workdir.join("batch_merge.json");
    if batch_path.exists() {
        let batch: BatchMerge = read_json(&batch_path)?;
        let mut manifests = BTreeMap::new();
        for (name, path) in batch {
            manifests.insert(name, read_json(&path)?);
        }
        info!(
            "reusing {} manifests from {}",
            manifests.len(),
            batch_path.display()
        );
        return Ok(manifests);
    }
    let counts = reference_counts(config, reference)?;
    pipeline::extract_inner_kmers(config, reference, kind, tracks, counts.as_ref())
}

fn build_index(
    input: &PathBuf,
    output: &PathBuf,
    ksize: usize,
    gapped: Option<&GappedKmerExtractor>,
) -> Result<()> {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for batch in ReadBatches::open(input, DEFAULT_BATCH_SIZE)? {
        for sequence in batch? {
            let extracted = match gapped {
                Some(extractor) => extractor.extract(&[sequence.as_str()]),
                None => extract_canonical_kmers(ksize, &[sequence.as_str()]),
            };
            for (kmer, count) in extracted {
                *counts.entry(kmer).or_insert(0) += count;
            }
        }
    }
    write_index(output, ksize, &counts)?;
    info!(
        "indexed {} distinct k-mers from {} into {}",
        counts.len(),
        input.display(),
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_genotype_invocation() {
        let cli = Cli::parse_from([
            "svgenotyper",
            "genotype",
            "--bed",
            "calls.DEL.bed",
            "--reference",
            "ref.fa",
            "--coverage",
            "30",
            "--reads",
            "sample.fq.gz",
            "--per-event",
        ]);
        match cli.command {
            Commands::Genotype {
                common,
                coverage,
                per_event,
                ..
            } => {
                assert_eq!(common.ksize, 31);
                assert_eq!(coverage, 30.0);
                assert!(per_event);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_configuration_from_args() {
        let cli = Cli::parse_from([
            "svgenotyper",
            "extract-inner-kmers",
            "--bed",
            "calls.INV.bed",
            "--reference",
            "ref.fa",
            "-k",
            "21",
            "--radius",
            "25",
        ]);
        match cli.command {
            Commands::ExtractInnerKmers { common } => {
                let config = common.configuration();
                assert_eq!(config.ksize, 21);
                assert_eq!(config.radius, 25);
                assert_eq!(config.bed_file, PathBuf::from("calls.INV.bed"));
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
