//! Memory-mapped k-mer count index.
//!
//! A fixed-layout binary file holding an open-addressed table of 2-bit
//! packed canonical k-mers and their counts. The file is mapped read-only
//! and queried lock-free from any number of threads.
//!
//! Layout: a 28-byte header (magic, version, k, slot count, entry count)
//! followed by 12-byte slots of `(packed key: u64, count: u32)`. A slot
//! with count zero is empty; zero counts are never stored.

use std::collections::BTreeMap;
use std::fs::File;
use std::hash::Hasher;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use fnv::FnvHasher;
use memmap2::Mmap;
use thiserror::Error;

use crate::bio::kmers::canonicalize;
use crate::counts::KmerCountProvider;

const MAGIC: &[u8; 4] = b"SVKX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 28;
const SLOT_LEN: usize = 12;

/// Largest k the 2-bit packing fits in a u64 key.
pub const MAX_INDEX_K: usize = 32;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a k-mer index (bad magic)")]
    BadMagic,

    #[error("unsupported index version {0}")]
    UnsupportedVersion(u32),

    #[error("index file truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("k = {0} does not fit the packed index (max {MAX_INDEX_K})")]
    KTooLarge(usize),
}

/// Packs an ACGT string into two bits per base. Returns None for any other
/// character.
fn pack(kmer: &str) -> Option<u64> {
    if kmer.len() > MAX_INDEX_K {
        return None;
    }
    let mut packed: u64 = 0;
    for &base in kmer.as_bytes() {
        let bits = match base {
            b'A' => 0,
            b'C' => 1,
            b'G' => 2,
            b'T' => 3,
            _ => return None,
        };
        packed = (packed << 2) | bits;
    }
    Some(packed)
}

fn slot_of(key: u64, n_slots: u64) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(&key.to_le_bytes());
    hasher.finish() % n_slots
}

/// Read-only count provider over a mapped index file.
pub struct IndexCountsProvider {
    mmap: Mmap,
    ksize: usize,
    n_slots: u64,
}

impl IndexCountsProvider {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_LEN {
            return Err(IndexError::Truncated {
                expected: HEADER_LEN,
                found: mmap.len(),
            });
        }
        if &mmap[0..4] != MAGIC {
            return Err(IndexError::BadMagic);
        }
        let version = LittleEndian::read_u32(&mmap[4..8]);
        if version != VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }
        let ksize = LittleEndian::read_u32(&mmap[8..12]) as usize;
        let n_slots = LittleEndian::read_u64(&mmap[12..20]);
        let expected = HEADER_LEN + (n_slots as usize) * SLOT_LEN;
        if mmap.len() < expected {
            return Err(IndexError::Truncated {
                expected,
                found: mmap.len(),
            });
        }
        Ok(IndexCountsProvider {
            mmap,
            ksize,
            n_slots,
        })
    }

    /// K-mer length the index was built for.
    pub fn ksize(&self) -> usize {
        self.ksize
    }

    /// Stored entry count.
    pub fn len(&self) -> u64 {
        LittleEndian::read_u64(&self.mmap[20..28])
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, index: u64) -> (u64, u32) {
        let offset = HEADER_LEN + (index as usize) * SLOT_LEN;
        let key = LittleEndian::read_u64(&self.mmap[offset..offset + 8]);
        let count = LittleEndian::read_u32(&self.mmap[offset + 8..offset + 12]);
        (key, count)
    }

    fn lookup(&self, key: u64) -> u32 {
        if self.n_slots == 0 {
            return 0;
        }
        let mut index = slot_of(key, self.n_slots);
        // Linear probing; the writer leaves the table at most half full,
        // so an empty slot terminates every chain.
        loop {
            let (stored, count) = self.slot(index);
            if count == 0 {
                return 0;
            }
            if stored == key {
                return count;
            }
            index = (index + 1) % self.n_slots;
        }
    }
}

impl KmerCountProvider for IndexCountsProvider {
    fn count(&self, kmer: &str) -> u32 {
        if kmer.len() != self.ksize {
            return 0;
        }
        match pack(&canonicalize(kmer)) {
            Some(key) => self.lookup(key),
            None => 0,
        }
    }
}

/// Writes the canonical k-mer counts to `path` in the index layout.
///
/// Keys are canonicalized before packing; non-ACGT k-mers and zero counts
/// are dropped.
pub fn write_index(path: &Path, ksize: usize, counts: &BTreeMap<String, u32>) -> Result<(), IndexError> {
    if ksize > MAX_INDEX_K {
        return Err(IndexError::KTooLarge(ksize));
    }
    let mut entries: BTreeMap<u64, u32> = BTreeMap::new();
    for (kmer, &count) in counts {
        if count == 0 {
            continue;
        }
        if let Some(key) = pack(&canonicalize(kmer)) {
            *entries.entry(key).or_insert(0) += count;
        }
    }
    let n_slots = (entries.len().max(1) * 2).next_power_of_two() as u64;
    let mut slots: Vec<(u64, u32)> = vec![(0, 0); n_slots as usize];
    for (&key, &count) in &entries {
        let mut index = slot_of(key, n_slots);
        while slots[index as usize].1 != 0 {
            index = (index + 1) % n_slots;
        }
        slots[index as usize] = (key, count);
    }

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_u32::<LittleEndian>(VERSION)?;
    writer.write_u32::<LittleEndian>(ksize as u32)?;
    writer.write_u64::<LittleEndian>(n_slots)?;
    writer.write_u64::<LittleEndian>(entries.len() as u64)?;
    for (key, count) in slots {
        writer.write_u64::<LittleEndian>(key)?;
        writer.write_u32::<LittleEndian>(count)?;
    }
    writer.flush()?;
    Ok(())
}
