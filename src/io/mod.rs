//! Input/Output operations module.
//!
//! Thin collaborators around the core pipeline: BED track parsing, reference
//! FASTA loading, sample FASTQ streaming, and the JSON manifests the stages
//! hand each other.

pub mod bed;
pub mod fasta;
pub mod fastq;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Writes a value as pretty-printed JSON. Map keys are `BTreeMap`-ordered
/// throughout the pipeline, so output files are byte-stable across runs.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    Ok(())
}

/// Reads a JSON value written by [`write_json`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("malformed JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_json_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("value.json");
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        value.insert("b".to_string(), 2u32);
        write_json(&path, &value).unwrap();
        let loaded: BTreeMap<String, u32> = read_json(&path).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_read_missing_file_errors() {
        let result: Result<BTreeMap<String, u32>> = read_json(Path::new("no/such/file.json"));
        assert!(result.is_err());
    }
}
