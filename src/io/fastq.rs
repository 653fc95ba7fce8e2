//! Sample read streaming.
//!
//! Leverages `needletail` for FASTQ/FASTA parsing (compressed files are
//! handled automatically). Only the sequence line of each record is kept;
//! reads are handed out in batches so scan workers amortize dispatch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use needletail::{parse_fastx_file, FastxReader};

/// Default number of reads per batch handed to a scan worker.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Iterator over batches of read sequences from one file.
pub struct ReadBatches {
    reader: Box<dyn FastxReader>,
    path: PathBuf,
    batch_size: usize,
    done: bool,
}

impl ReadBatches {
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let reader = parse_fastx_file(path)
            .with_context(|| format!("failed to open reads {}", path.display()))?;
        Ok(ReadBatches {
            reader,
            path: path.to_path_buf(),
            batch_size: batch_size.max(1),
            done: false,
        })
    }
}

impl Iterator for ReadBatches {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.reader.next() {
                Some(Ok(record)) => {
                    batch.push(String::from_utf8_lossy(&record.seq()).to_ascii_uppercase());
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e).with_context(|| {
                        format!("malformed record in {}", self.path.display())
                    }));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

/// Reads every sequence of a file into memory. Convenience for small inputs
/// and the index builder.
pub fn read_all_sequences(path: &Path) -> Result<Vec<String>> {
    let mut sequences = Vec::new();
    for batch in ReadBatches::open(path, DEFAULT_BATCH_SIZE)? {
        sequences.extend(batch?);
    }
    Ok(sequences)
}
