//! Configuration for generation and for reaching the backends.
//!
//! Generation settings live in a TOML file (see `generation_settings.toml` at
//! the repository root). Everything that shapes the augmented dataset is in
//! there, including the seed, so the file plus the raw vectors fully determine
//! the output.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GenerationError;
use crate::identifier::{Hundredths, ResourceLimits};

/// Default number of alphanumeric characters in a document link.
pub const DEFAULT_LINK_LENGTH: usize = 32;

/// Upper bound on label populations; alias tables beyond that get unwieldy.
pub const MAX_LABEL_POPULATION: usize = 1_000_000;

/// Upper bound on labels drawn for one document or filter.
pub const MAX_LABELS_PER_SAMPLE: usize = 512;

// ============================================================================
// Generation settings
// ============================================================================

/// Everything that determines the synthetic payloads and query filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub seed: u64,
    #[serde(default = "default_link_length")]
    pub link_length: usize,
    pub publication_date: DateSettings,
    pub authors: LabelSettings,
    pub tags: LabelSettings,
}

fn default_link_length() -> usize {
    DEFAULT_LINK_LENGTH
}

impl GenerationSettings {
    /// Load and validate settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read generation settings from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid generation settings in {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).context("Failed to parse generation settings TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check cardinalities and probabilities before any sampling happens.
    pub fn validate(&self) -> Result<(), GenerationError> {
        self.publication_date.validate()?;
        self.authors.validate("authors")?;
        self.tags.validate("tags")?;
        Ok(())
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            seed: 0x5eed_0f_da7a,
            link_length: DEFAULT_LINK_LENGTH,
            publication_date: DateSettings::default(),
            authors: LabelSettings {
                population: 20,
                zipf_exponent: 1.0,
                count_weights: vec![0.0, 0.7, 0.2, 0.1],
                filters: LabelFilterSettings {
                    include_count_weights: vec![0.8, 0.2],
                    exclude_count_weights: vec![0.8, 0.15, 0.05],
                },
            },
            tags: LabelSettings {
                population: 200,
                zipf_exponent: 1.07,
                count_weights: vec![0.05, 0.15, 0.3, 0.3, 0.1, 0.1],
                filters: LabelFilterSettings {
                    include_count_weights: vec![0.5, 0.4, 0.1],
                    exclude_count_weights: vec![0.6, 0.3, 0.1],
                },
            },
        }
    }
}

/// Publication dates and the date part of query filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateSettings {
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
    pub distribution: RangeShape,
    pub filters: DateFilterSettings,
}

impl DateSettings {
    fn validate(&self) -> Result<(), GenerationError> {
        let (min, max) = (self.min.timestamp(), self.max.timestamp());
        if min >= max {
            return Err(GenerationError::EmptyDateRange { min, max });
        }
        check_probability("publication_date.filters.lower_bound_probability", self.filters.lower_bound_probability)?;
        check_probability("publication_date.filters.upper_bound_probability", self.filters.upper_bound_probability)?;
        Ok(())
    }
}

impl Default for DateSettings {
    fn default() -> Self {
        Self {
            min: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            max: Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).single().unwrap_or_default(),
            distribution: RangeShape::Normal {
                mean: Percentage::new(80.0),
                std_dev: Percentage::new(15.0),
            },
            filters: DateFilterSettings {
                lower_bound_probability: 0.4,
                upper_bound_probability: 0.2,
                lower_bound_distribution: RangeShape::Uniform,
                upper_bound_distribution: RangeShape::Normal {
                    mean: Percentage::new(75.0),
                    std_dev: Percentage::new(20.0),
                },
            },
        }
    }
}

/// How often each date bound is present and where it is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateFilterSettings {
    pub lower_bound_probability: f64,
    pub upper_bound_probability: f64,
    pub lower_bound_distribution: RangeShape,
    pub upper_bound_distribution: RangeShape,
}

/// Shape of a distribution over an integer range, positioned in percent of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RangeShape {
    Uniform,
    Normal { mean: Percentage, std_dev: Percentage },
}

/// Label pool with Zipf-distributed popularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSettings {
    /// Pool size; labels are indices `0..population`
    pub population: usize,
    /// Zipf exponent `s`, label `k` (1-based) has weight `1/k^s`
    pub zipf_exponent: f64,
    /// Weight of drawing `i` labels for a document, for `i = 0..len`
    pub count_weights: Vec<f64>,
    pub filters: LabelFilterSettings,
}

impl LabelSettings {
    /// Largest sample a document or filter can request.
    pub fn unique_limit(&self) -> usize {
        (self.population / 2).min(MAX_LABELS_PER_SAMPLE)
    }

    fn validate(&self, field: &'static str) -> Result<(), GenerationError> {
        if self.population == 0 || self.population > MAX_LABEL_POPULATION {
            return Err(GenerationError::InvalidDistribution {
                name: field,
                reason: format!(
                    "population must be in 1..={}, got {}",
                    MAX_LABEL_POPULATION, self.population
                ),
            });
        }
        if !self.zipf_exponent.is_finite() || self.zipf_exponent < 0.0 {
            return Err(GenerationError::InvalidDistribution {
                name: field,
                reason: format!("zipf exponent must be finite and >= 0, got {}", self.zipf_exponent),
            });
        }
        check_weights(field, &self.count_weights)?;
        check_weights(field, &self.filters.include_count_weights)?;
        check_weights(field, &self.filters.exclude_count_weights)?;

        let limit = self.unique_limit();
        let per_document = self.count_weights.len() - 1;
        if per_document > limit {
            return Err(GenerationError::Cardinality {
                field,
                requested: per_document,
                population: self.population,
                limit,
            });
        }
        let per_filter = self.filters.include_count_weights.len() - 1
            + self.filters.exclude_count_weights.len()
            - 1;
        if per_filter > limit {
            return Err(GenerationError::Cardinality {
                field,
                requested: per_filter,
                population: self.population,
                limit,
            });
        }
        Ok(())
    }
}

/// Cardinality weights for the include and exclude halves of a label filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelFilterSettings {
    pub include_count_weights: Vec<f64>,
    pub exclude_count_weights: Vec<f64>,
}

fn check_probability(name: &'static str, p: f64) -> Result<(), GenerationError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(GenerationError::InvalidDistribution {
            name,
            reason: format!("probability must be within [0, 1], got {}", p),
        });
    }
    Ok(())
}

fn check_weights(name: &'static str, weights: &[f64]) -> Result<(), GenerationError> {
    if weights.is_empty() {
        return Err(GenerationError::InvalidDistribution {
            name,
            reason: "count weights must not be empty".to_string(),
        });
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(GenerationError::InvalidDistribution {
            name,
            reason: format!("count weights must be finite and >= 0, got {:?}", weights),
        });
    }
    if weights.iter().sum::<f64>() <= 0.0 {
        return Err(GenerationError::InvalidDistribution {
            name,
            reason: "count weights must not all be zero".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Percentage
// ============================================================================

/// A fraction written as `"12.5%"` in settings files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentage(f64);

impl Percentage {
    /// `percent` is clamped to `0..=100`.
    pub fn new(percent: f64) -> Self {
        Self(percent.clamp(0.0, 100.0) / 100.0)
    }

    pub fn fraction(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0 * 100.0)
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Percentage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.strip_suffix('%')
            .and_then(|number| number.trim().parse::<f64>().ok())
            .filter(|p| (0.0..=100.0).contains(p))
            .map(Percentage::new)
            .ok_or_else(|| {
                de::Error::invalid_value(de::Unexpected::Str(&text), &"a percentage like \"10%\"")
            })
    }
}

// ============================================================================
// Provider endpoints
// ============================================================================

/// Endpoints of the three backends plus the limits their clusters run with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub qdrant_url: String,
    pub elasticsearch_url: String,
    pub vespa_url: String,
    pub limits: ResourceLimits,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://localhost:6333".to_string(),
            elasticsearch_url: "http://localhost:9200".to_string(),
            vespa_url: "http://localhost:8080".to_string(),
            limits: ResourceLimits::default(),
        }
    }
}

impl ProviderConfig {
    pub fn with_limits(mut self, cpus: f64, memory_gb: f64) -> Result<Self> {
        self.limits = ResourceLimits {
            cpus: Hundredths::from_f64(cpus)
                .with_context(|| format!("Invalid cpu limit: {}", cpus))?,
            memory_gb: Hundredths::from_f64(memory_gb)
                .with_context(|| format!("Invalid memory limit: {}", memory_gb))?,
        };
        Ok(self)
    }
}
