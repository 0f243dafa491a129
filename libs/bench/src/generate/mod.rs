//! Payload & filter generation.
//!
//! Turns a raw vector dataset into the augmented dataset every backend is
//! benchmarked with:
//! - one [`DocumentPayload`] per reference vector id
//! - one [`QuerySample`] per query vector id, carrying its [`QueryFilter`]
//!
//! All randomness comes from ChaCha8 streams seeded from the settings, so the
//! same settings and vectors reproduce the output byte for byte. Documents and
//! queries draw from separate streams; changing the number of query vectors
//! leaves the document payloads untouched.
//!
//! # On-disk layout
//!
//! ```text
//! <out>/manifest.json     settings, vector sources, counts
//! <out>/documents.jsonl   one payload per base vector, in id order
//! <out>/queries.jsonl     one query sample per query vector, in id order
//! ```
//!
//! Vectors are referenced by path and checksum rather than copied. The
//! directory is assembled in a staging sibling and renamed into place once
//! every filter validated, so a failed generation leaves nothing behind.

mod filter;
mod sampling;

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::distributions::{Alphanumeric, DistString};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GenerationSettings;
use crate::dataset::{Dataset, VectorSource};
use crate::error::GenerationError;

pub use filter::{DateFilter, DateFilterMode, LabelFilter, QueryFilter};
pub use sampling::{CountSampler, DateSampler, LabelSampler, RangeSampler};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DOCUMENTS_FILE: &str = "documents.jsonl";
pub const QUERIES_FILE: &str = "queries.jsonl";

const FORMAT_VERSION: u32 = 1;

const DOCUMENT_STREAM: u64 = 0;
const QUERY_STREAM: u64 = 1;

/// Synthetic metadata of one reference vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPayload {
    /// Unix epoch seconds
    pub publication_date: i64,
    /// Indices into the author pool
    pub authors: BTreeSet<u32>,
    /// Indices into the tag pool
    pub tags: BTreeSet<u32>,
    pub link: String,
}

/// A query vector and the filter pre-sampled for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySample {
    pub query_vector_id: u64,
    /// `None` when the sampled filter constrains nothing
    pub filter: Option<QueryFilter>,
}

/// Samplers built from [`GenerationSettings`].
#[derive(Debug, Clone)]
pub struct PayloadGenerator {
    seed: u64,
    link_length: usize,
    dates: DateSampler,
    authors: LabelSampler,
    tags: LabelSampler,
}

impl PayloadGenerator {
    pub fn new(settings: &GenerationSettings) -> Result<Self, GenerationError> {
        settings.validate()?;
        Ok(Self {
            seed: settings.seed,
            link_length: settings.link_length,
            dates: DateSampler::new(&settings.publication_date)?,
            authors: LabelSampler::new("authors", &settings.authors)?,
            tags: LabelSampler::new("tags", &settings.tags)?,
        })
    }

    fn stream(&self, stream: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(stream);
        rng
    }

    pub fn sample_document<R: Rng + ?Sized>(&self, rng: &mut R) -> DocumentPayload {
        DocumentPayload {
            publication_date: self.dates.sample_date(rng),
            authors: self.authors.sample_document(rng).into_iter().collect(),
            tags: self.tags.sample_document(rng).into_iter().collect(),
            link: Alphanumeric.sample_string(rng, self.link_length),
        }
    }

    pub fn sample_filter<R: Rng + ?Sized>(&self, rng: &mut R) -> QueryFilter {
        QueryFilter {
            publication_date: self.dates.sample_filter(rng),
            authors: self.authors.sample_filter(rng),
            tags: self.tags.sample_filter(rng),
        }
    }

    /// Payloads for ids `0..num_documents`.
    pub fn documents(&self, num_documents: usize) -> Vec<DocumentPayload> {
        let mut rng = self.stream(DOCUMENT_STREAM);
        (0..num_documents)
            .map(|_| self.sample_document(&mut rng))
            .collect()
    }

    /// Query samples for ids `0..num_queries`, every filter validated.
    pub fn queries(&self, num_queries: usize) -> Result<Vec<QuerySample>, GenerationError> {
        let mut rng = self.stream(QUERY_STREAM);
        (0..num_queries)
            .map(|index| {
                let filter = self.sample_filter(&mut rng);
                filter.validate(index)?;
                Ok(QuerySample {
                    query_vector_id: index as u64,
                    filter: filter.normalized(),
                })
            })
            .collect()
    }
}

/// Description of an augmented dataset, stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub settings: GenerationSettings,
    pub base_vectors: VectorSource,
    pub query_vectors: VectorSource,
    pub num_documents: usize,
    pub num_queries: usize,
    pub num_filtered_queries: usize,
}

/// Vectors plus their synthetic payloads and query samples.
#[derive(Debug, Clone)]
pub struct AugmentedDataset {
    pub manifest: Manifest,
    pub documents: Vec<DocumentPayload>,
    pub queries: Vec<QuerySample>,
}

impl AugmentedDataset {
    /// Generate payloads and filters for `dataset`.
    #[tracing::instrument(skip_all, fields(seed = settings.seed))]
    pub fn generate(settings: &GenerationSettings, dataset: &Dataset) -> Result<Self, GenerationError> {
        let generator = PayloadGenerator::new(settings)?;
        let documents = generator.documents(dataset.base_vectors.len());
        let queries = generator.queries(dataset.query_vectors.len())?;
        let num_filtered_queries = queries.iter().filter(|q| q.filter.is_some()).count();

        tracing::info!(
            documents = documents.len(),
            queries = queries.len(),
            filtered = num_filtered_queries,
            "Generated payloads and filters"
        );

        Ok(Self {
            manifest: Manifest {
                format_version: FORMAT_VERSION,
                settings: settings.clone(),
                base_vectors: dataset.base_source.clone(),
                query_vectors: dataset.query_source.clone(),
                num_documents: documents.len(),
                num_queries: queries.len(),
                num_filtered_queries,
            },
            documents,
            queries,
        })
    }

    /// Re-check every filter; any overlap is fatal.
    pub fn validate(&self) -> Result<(), GenerationError> {
        for (index, sample) in self.queries.iter().enumerate() {
            if let Some(filter) = &sample.filter {
                filter.validate(index)?;
            }
        }
        Ok(())
    }

    /// Default location of the augmented dataset for a base vector file.
    pub fn default_dir(base_vectors: &Path) -> PathBuf {
        let stem = base_vectors
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string());
        base_vectors.with_file_name(format!("{}.augmented", stem))
    }

    /// Persist to `dir`, replacing a previous generation only on success.
    pub fn write(&self, dir: &Path) -> Result<()> {
        self.validate()
            .context("Refusing to persist an invalid augmented dataset")?;

        let name = dir
            .file_name()
            .with_context(|| format!("Invalid output directory: {}", dir.display()))?;
        let staging = dir.with_file_name(format!(".{}.staging", name.to_string_lossy()));
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to clear {}", staging.display()))?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        let written = (|| -> Result<()> {
            let manifest = serde_json::to_string_pretty(&self.manifest)
                .context("Failed to serialize manifest")?;
            fs::write(staging.join(MANIFEST_FILE), manifest + "\n")
                .context("Failed to write manifest")?;
            write_jsonl(&staging.join(DOCUMENTS_FILE), &self.documents)?;
            write_jsonl(&staging.join(QUERIES_FILE), &self.queries)?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if dir.exists() {
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to replace {}", dir.display()))?;
        }
        fs::rename(&staging, dir)
            .with_context(|| format!("Failed to move {} into place", dir.display()))?;
        tracing::info!(dir = %dir.display(), "Augmented dataset written");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", manifest_path.display()))?;
        if manifest.format_version != FORMAT_VERSION {
            bail!(
                "Unsupported augmented dataset version {} (expected {})",
                manifest.format_version,
                FORMAT_VERSION
            );
        }

        let documents: Vec<DocumentPayload> = read_jsonl(&dir.join(DOCUMENTS_FILE))?;
        let queries: Vec<QuerySample> = read_jsonl(&dir.join(QUERIES_FILE))?;
        if documents.len() != manifest.num_documents || queries.len() != manifest.num_queries {
            bail!(
                "Augmented dataset at {} is incomplete: {} documents / {} queries, manifest says {} / {}",
                dir.display(),
                documents.len(),
                queries.len(),
                manifest.num_documents,
                manifest.num_queries
            );
        }

        let dataset = Self {
            manifest,
            documents,
            queries,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Fail unless `dataset` holds the vectors this augmentation was built for.
    pub fn ensure_matches(&self, dataset: &Dataset) -> Result<()> {
        self.manifest
            .base_vectors
            .ensure_same_vectors(&dataset.base_source)?;
        self.manifest
            .query_vectors
            .ensure_same_vectors(&dataset.query_source)
    }
}

fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)
            .with_context(|| format!("Failed to serialize into {}", path.display()))?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    BufReader::new(file)
        .lines()
        .enumerate()
        .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(|(number, line)| {
            let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: malformed entry", path.display(), number + 1))
        })
        .collect()
}
