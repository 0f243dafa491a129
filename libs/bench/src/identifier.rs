//! Benchmark identifier codec.
//!
//! A benchmark identifier is the only key tying a result log entry to the
//! configuration that produced it. It has to fit the identifier length limit of
//! the benchmark harness, hence the compact grammar:
//!
//! ```text
//! provider/bench_group/M:ef_construction_cpu:mem-k:ef:P|p:F|f-tasks:queries
//! qdrant/query_throughput/16:100_8.00:8.00-10:100:p:f-5:10
//! ```
//!
//! Resource limits always carry exactly two decimals and are stored as
//! hundredths, so `parse(render(x)) == x` holds without float drift. Integers
//! are canonical decimals (no sign, no leading zeros), which keeps rendering
//! injective.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BenchmarkIdError, IdField};

/// Upper bound on the rendered identifier length.
pub const MAX_BENCHMARK_ID_LEN: usize = 80;

// ============================================================================
// Parameter types
// ============================================================================

/// HNSW build parameters the index was ingested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngestionParameters {
    /// Max links per node
    pub m: u32,
    /// Candidates explored at insert time
    pub ef_construction: u32,
}

impl Default for IngestionParameters {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 100,
        }
    }
}

/// A non-negative amount with exactly two decimals, stored as hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hundredths(pub u32);

impl Hundredths {
    /// Whole units; `u16` keeps the hundredths within `u32`.
    pub const fn from_whole(units: u16) -> Self {
        Self(units as u32 * 100)
    }

    /// Round a float to the nearest hundredth.
    pub fn from_f64(value: f64) -> Option<Self> {
        let scaled = (value * 100.0).round();
        if scaled.is_finite() && scaled >= 0.0 && scaled <= u32::MAX as f64 {
            Some(Self(scaled as u32))
        } else {
            None
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Hundredths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// CPU and memory limits of the cluster under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU cores
    pub cpus: Hundredths,
    /// Memory in GiB
    pub memory_gb: Hundredths,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: Hundredths::from_whole(4),
            memory_gb: Hundredths::from_whole(8),
        }
    }
}

/// Query knobs shared by every query of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryParameters {
    pub k: u32,
    /// `ef` for HNSW backends, `num_candidates` for Elasticsearch; passed through raw
    pub ef: u32,
    pub fetch_payload: bool,
    pub use_filters: bool,
}

impl QueryParameters {
    /// Refuse `ef < k`: Elasticsearch rejects `num_candidates` below `k`, so
    /// every query of such a run would fail.
    pub fn ensure_ef_covers_k(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.ef >= self.k,
            "ef ({}) must be at least k ({})",
            self.ef,
            self.k
        );
        Ok(())
    }
}

/// Worker layout of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parallelism {
    pub num_tasks: u32,
    pub queries_per_task: u32,
}

impl Parallelism {
    pub fn total_queries(&self) -> u64 {
        self.num_tasks as u64 * self.queries_per_task as u64
    }
}

// ============================================================================
// BenchmarkId
// ============================================================================

/// Fully decoded benchmark identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BenchmarkId {
    pub provider: String,
    pub bench_group: String,
    pub ingestion: IngestionParameters,
    pub limits: ResourceLimits,
    pub query: QueryParameters,
    pub parallelism: Parallelism,
}

impl BenchmarkId {
    /// Check every field against the grammar, including the length ceiling.
    pub fn validate(&self) -> Result<(), BenchmarkIdError> {
        check_name(IdField::Provider, &self.provider)?;
        check_name(IdField::BenchGroup, &self.bench_group)?;
        check_positive(IdField::M, self.ingestion.m)?;
        check_positive(IdField::EfConstruction, self.ingestion.ef_construction)?;
        check_nonzero_limit(IdField::CpuLimit, self.limits.cpus)?;
        check_nonzero_limit(IdField::MemLimit, self.limits.memory_gb)?;
        check_positive(IdField::K, self.query.k)?;
        check_positive(IdField::Ef, self.query.ef)?;
        check_positive(IdField::NumTasks, self.parallelism.num_tasks)?;
        check_positive(IdField::QueriesPerTask, self.parallelism.queries_per_task)?;

        let len = self.to_string().len();
        if len > MAX_BENCHMARK_ID_LEN {
            return Err(BenchmarkIdError::TooLong {
                len,
                limit: MAX_BENCHMARK_ID_LEN,
            });
        }
        Ok(())
    }

    /// Render the identifier, refusing parameter tuples outside the grammar.
    pub fn render(&self) -> Result<String, BenchmarkIdError> {
        self.validate()?;
        Ok(self.to_string())
    }

    /// Parse an identifier, naming the first field that does not conform.
    pub fn parse(text: &str) -> Result<Self, BenchmarkIdError> {
        if text.len() > MAX_BENCHMARK_ID_LEN {
            return Err(BenchmarkIdError::TooLong {
                len: text.len(),
                limit: MAX_BENCHMARK_ID_LEN,
            });
        }

        let mut cursor = Cursor { rest: text };

        let provider = cursor.until(IdField::Provider, '/')?;
        check_name(IdField::Provider, provider)?;
        let bench_group = cursor.until(IdField::BenchGroup, '/')?;
        check_name(IdField::BenchGroup, bench_group)?;

        let m = parse_count(IdField::M, cursor.until(IdField::M, ':')?)?;
        let ef_construction =
            parse_count(IdField::EfConstruction, cursor.until(IdField::EfConstruction, '_')?)?;

        let cpus = parse_limit(IdField::CpuLimit, cursor.until(IdField::CpuLimit, ':')?)?;
        let memory_gb = parse_limit(IdField::MemLimit, cursor.until(IdField::MemLimit, '-')?)?;

        let k = parse_count(IdField::K, cursor.until(IdField::K, ':')?)?;
        let ef = parse_count(IdField::Ef, cursor.until(IdField::Ef, ':')?)?;
        let fetch_payload = parse_flag(
            IdField::FetchPayload,
            cursor.until(IdField::FetchPayload, ':')?,
            "P",
            "p",
        )?;
        let use_filters =
            parse_flag(IdField::UseFilters, cursor.until(IdField::UseFilters, '-')?, "F", "f")?;

        let num_tasks = parse_count(IdField::NumTasks, cursor.until(IdField::NumTasks, ':')?)?;
        let queries_per_task = parse_count(IdField::QueriesPerTask, cursor.rest())?;

        Ok(Self {
            provider: provider.to_string(),
            bench_group: bench_group.to_string(),
            ingestion: IngestionParameters { m, ef_construction },
            limits: ResourceLimits { cpus, memory_gb },
            query: QueryParameters {
                k,
                ef,
                fetch_payload,
                use_filters,
            },
            parallelism: Parallelism {
                num_tasks,
                queries_per_task,
            },
        })
    }
}

impl fmt::Display for BenchmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}_{}:{}-{}:{}:{}:{}-{}:{}",
            self.provider,
            self.bench_group,
            self.ingestion.m,
            self.ingestion.ef_construction,
            self.limits.cpus,
            self.limits.memory_gb,
            self.query.k,
            self.query.ef,
            if self.query.fetch_payload { "P" } else { "p" },
            if self.query.use_filters { "F" } else { "f" },
            self.parallelism.num_tasks,
            self.parallelism.queries_per_task,
        )
    }
}

impl FromStr for BenchmarkId {
    type Err = BenchmarkIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BenchmarkId {
    type Error = BenchmarkIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BenchmarkId> for String {
    fn from(value: BenchmarkId) -> Self {
        value.to_string()
    }
}

// ============================================================================
// Field parsing
// ============================================================================

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    /// Take the text up to `separator` and step past it.
    fn until(&mut self, field: IdField, separator: char) -> Result<&'a str, BenchmarkIdError> {
        let (head, tail) = self
            .rest
            .split_once(separator)
            .ok_or(BenchmarkIdError::MissingSeparator { field, separator })?;
        self.rest = tail;
        Ok(head)
    }

    fn rest(self) -> &'a str {
        self.rest
    }
}

fn check_name(field: IdField, value: &str) -> Result<(), BenchmarkIdError> {
    if value.is_empty() {
        return Err(BenchmarkIdError::invalid(field, value, "must not be empty"));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(BenchmarkIdError::invalid(
            field,
            value,
            "only lowercase ASCII letters, digits, '_' and '-' are allowed",
        ));
    }
    Ok(())
}

fn check_positive(field: IdField, value: u32) -> Result<(), BenchmarkIdError> {
    if value == 0 {
        return Err(BenchmarkIdError::invalid(field, "0", "must be at least 1"));
    }
    Ok(())
}

fn check_nonzero_limit(field: IdField, value: Hundredths) -> Result<(), BenchmarkIdError> {
    if value.0 == 0 {
        return Err(BenchmarkIdError::invalid(field, "0.00", "must be positive"));
    }
    Ok(())
}

fn parse_digits(field: IdField, text: &str) -> Result<u32, BenchmarkIdError> {
    if text.is_empty() {
        return Err(BenchmarkIdError::invalid(field, text, "missing value"));
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BenchmarkIdError::invalid(field, text, "not a decimal integer"));
    }
    if text.len() > 1 && text.starts_with('0') {
        return Err(BenchmarkIdError::invalid(field, text, "leading zeros are not canonical"));
    }
    text.parse::<u32>()
        .map_err(|_| BenchmarkIdError::invalid(field, text, "out of range"))
}

fn parse_count(field: IdField, text: &str) -> Result<u32, BenchmarkIdError> {
    let value = parse_digits(field, text)?;
    if value == 0 {
        return Err(BenchmarkIdError::invalid(field, text, "must be at least 1"));
    }
    Ok(value)
}

fn parse_limit(field: IdField, text: &str) -> Result<Hundredths, BenchmarkIdError> {
    let (whole, frac) = text
        .split_once('.')
        .ok_or_else(|| BenchmarkIdError::invalid(field, text, "expected exactly two decimals"))?;
    if frac.len() != 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BenchmarkIdError::invalid(field, text, "expected exactly two decimals"));
    }
    let whole = parse_digits(field, whole)?;
    let frac: u32 = frac
        .parse()
        .map_err(|_| BenchmarkIdError::invalid(field, text, "expected exactly two decimals"))?;
    let hundredths = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(|| BenchmarkIdError::invalid(field, text, "out of range"))?;
    if hundredths == 0 {
        return Err(BenchmarkIdError::invalid(field, text, "must be positive"));
    }
    Ok(Hundredths(hundredths))
}

fn parse_flag(
    field: IdField,
    text: &str,
    on: &str,
    off: &str,
) -> Result<bool, BenchmarkIdError> {
    if text == on {
        Ok(true)
    } else if text == off {
        Ok(false)
    } else {
        Err(BenchmarkIdError::invalid(field, text, "expected a single upper or lower case flag letter"))
    }
}
