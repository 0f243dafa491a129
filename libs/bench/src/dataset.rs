//! GIST-960 dataset loading.
//!
//! The benchmark runs on the texmex GIST1M vectors in fvecs format:
//! `gist_base.fvecs` is the reference (train) set that gets ingested,
//! `gist_query.fvecs` is the query (test) set.
//!
//! ## fvecs
//! Each vector: 4 bytes (dim as i32, little-endian) + dim * 4 bytes (f32 values)
//!
//! ## Source
//! - http://corpus-texmex.irisa.fr/

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// Dimension of GIST descriptors.
pub const GIST_DIM: usize = 960;

pub const GIST_BASE_FILE: &str = "gist_base.fvecs";
pub const GIST_QUERY_FILE: &str = "gist_query.fvecs";

/// Reference and query vectors of one dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Reference vectors, id = position
    pub base_vectors: Vec<Vec<f32>>,
    /// Query vectors, id = position
    pub query_vectors: Vec<Vec<f32>>,
    pub dim: usize,
    pub base_source: VectorSource,
    pub query_source: VectorSource,
}

impl Dataset {
    /// Load the GIST files from `data_dir`.
    ///
    /// `max_base`/`max_queries` cap how many vectors are read, which keeps
    /// smoke runs cheap; the manifest records the actual counts.
    pub fn load(data_dir: &Path, max_base: usize, max_queries: usize) -> Result<Self> {
        let base_path = data_dir.join(GIST_BASE_FILE);
        let query_path = data_dir.join(GIST_QUERY_FILE);
        if !base_path.exists() || !query_path.exists() {
            bail!(
                "GIST dataset not found.\nExpected: {:?}, {:?}",
                base_path,
                query_path
            );
        }

        tracing::info!(path = %base_path.display(), max_base, "Loading base vectors");
        let base_vectors = read_fvecs_limited(&base_path, max_base)?;
        tracing::info!(path = %query_path.display(), max_queries, "Loading query vectors");
        let query_vectors = read_fvecs_limited(&query_path, max_queries)?;

        Self::from_parts(base_path, base_vectors, query_path, query_vectors)
    }

    /// Wrap vectors that are already in memory.
    pub fn from_parts(
        base_path: PathBuf,
        base_vectors: Vec<Vec<f32>>,
        query_path: PathBuf,
        query_vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        let dim = base_vectors
            .first()
            .map(|v| v.len())
            .context("Dataset has no base vectors")?;
        if let Some(bad) = query_vectors.iter().find(|v| v.len() != dim) {
            bail!(
                "Query vectors have dimension {}, base vectors have {}",
                bad.len(),
                dim
            );
        }

        let base_source = VectorSource::describe(base_path, &base_vectors);
        let query_source = VectorSource::describe(query_path, &query_vectors);
        tracing::info!(
            base = base_vectors.len(),
            queries = query_vectors.len(),
            dim,
            "Dataset loaded"
        );

        Ok(Self {
            base_vectors,
            query_vectors,
            dim,
            base_source,
            query_source,
        })
    }
}

/// Where a vector set came from and how to recognise it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorSource {
    pub path: PathBuf,
    pub count: usize,
    pub dim: usize,
    /// xxh3 over the little-endian f32 components, hex encoded
    pub checksum: String,
}

impl VectorSource {
    pub fn describe(path: PathBuf, vectors: &[Vec<f32>]) -> Self {
        Self {
            path,
            count: vectors.len(),
            dim: vectors.first().map(|v| v.len()).unwrap_or(0),
            checksum: format!("{:016x}", vectors_checksum(vectors)),
        }
    }

    /// Fail when `other` does not describe the same vectors.
    pub fn ensure_same_vectors(&self, other: &VectorSource) -> Result<()> {
        if self.count != other.count || self.dim != other.dim || self.checksum != other.checksum {
            bail!(
                "Vector set mismatch: expected {} vectors of dim {} (checksum {}), found {} of dim {} (checksum {}) at {}",
                self.count,
                self.dim,
                self.checksum,
                other.count,
                other.dim,
                other.checksum,
                other.path.display()
            );
        }
        Ok(())
    }
}

/// Content hash of a vector set, independent of the file layout.
pub fn vectors_checksum(vectors: &[Vec<f32>]) -> u64 {
    let mut hasher = Xxh3::new();
    for vector in vectors {
        hasher.update(&(vector.len() as u32).to_le_bytes());
        for v in vector {
            hasher.update(&v.to_le_bytes());
        }
    }
    hasher.digest()
}

/// Read every vector from an fvecs file.
pub fn read_fvecs(path: &Path) -> Result<Vec<Vec<f32>>> {
    read_fvecs_limited(path, usize::MAX)
}

/// Read up to `limit` vectors from an fvecs file.
pub fn read_fvecs_limited(path: &Path, limit: usize) -> Result<Vec<Vec<f32>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open fvecs file: {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut vectors: Vec<Vec<f32>> = Vec::new();
    while vectors.len() < limit {
        let mut dim_buf = [0u8; 4];
        match reader.read_exact(&mut dim_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
        let dim = i32::from_le_bytes(dim_buf);
        if dim <= 0 {
            bail!(
                "Invalid dimension {} for vector {} in {}",
                dim,
                vectors.len(),
                path.display()
            );
        }
        let dim = dim as usize;
        if let Some(first) = vectors.first() {
            if first.len() != dim {
                bail!(
                    "Vector {} in {} has dimension {}, expected {}",
                    vectors.len(),
                    path.display(),
                    dim,
                    first.len()
                );
            }
        }

        let mut raw = vec![0u8; dim * 4];
        reader
            .read_exact(&mut raw)
            .with_context(|| format!("Truncated vector {} in {}", vectors.len(), path.display()))?;
        let vector = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        vectors.push(vector);
    }

    Ok(vectors)
}

/// Write vectors in fvecs format.
pub fn write_fvecs(path: &Path, vectors: &[Vec<f32>]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create fvecs file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for vector in vectors {
        writer.write_all(&(vector.len() as i32).to_le_bytes())?;
        for v in vector {
            writer.write_all(&v.to_le_bytes())?;
        }
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}
