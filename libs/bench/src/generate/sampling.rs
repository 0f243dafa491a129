//! Distributions backing payload and filter generation.
//!
//! Built once from [`GenerationSettings`](crate::config::GenerationSettings);
//! sampling only ever touches the RNG handed in by the caller.

use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform, WeightedAliasIndex, WeightedIndex};

use crate::config::{DateSettings, LabelSettings, RangeShape};
use crate::error::GenerationError;

use super::filter::{DateFilter, LabelFilter};

/// Draw attempts per requested label before falling back to the most popular
/// unused labels.
const REJECTION_BUDGET: usize = 64;

// ============================================================================
// Integer ranges
// ============================================================================

/// Distribution over the closed integer range `[min, max]`.
#[derive(Debug, Clone)]
pub struct RangeSampler {
    inner: RangeInner,
}

#[derive(Debug, Clone)]
enum RangeInner {
    Uniform(Uniform<i64>),
    /// Normal over offsets from `min`, folded back into `[0, len]` by reflection
    Normal {
        normal: Normal<f64>,
        min: i64,
        len: f64,
    },
}

impl RangeSampler {
    pub fn new(
        name: &'static str,
        shape: &RangeShape,
        min: i64,
        max: i64,
    ) -> Result<Self, GenerationError> {
        if min >= max {
            return Err(GenerationError::EmptyDateRange { min, max });
        }
        let inner = match shape {
            RangeShape::Uniform => RangeInner::Uniform(Uniform::new_inclusive(min, max)),
            RangeShape::Normal { mean, std_dev } => {
                let len = (max - min) as f64;
                let normal = Normal::new(len * mean.fraction(), len * std_dev.fraction())
                    .map_err(|e| GenerationError::InvalidDistribution {
                        name,
                        reason: e.to_string(),
                    })?;
                RangeInner::Normal { normal, min, len }
            }
        };
        Ok(Self { inner })
    }
}

impl Distribution<i64> for RangeSampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        match &self.inner {
            RangeInner::Uniform(uniform) => uniform.sample(rng),
            RangeInner::Normal { normal, min, len } => {
                let point = reflect_into(normal.sample(rng), *len);
                min + point.round() as i64
            }
        }
    }
}

/// Mirror `x` at the borders of `[0, len]` until it lands inside.
fn reflect_into(x: f64, len: f64) -> f64 {
    let period = 2.0 * len;
    let folded = x.rem_euclid(period);
    if folded > len {
        period - folded
    } else {
        folded
    }
}

// ============================================================================
// Counts
// ============================================================================

/// Weighted choice of a count `0..weights.len()`.
#[derive(Debug, Clone)]
pub struct CountSampler {
    index: WeightedIndex<f64>,
    max: usize,
}

impl CountSampler {
    pub fn new(name: &'static str, weights: &[f64]) -> Result<Self, GenerationError> {
        let index = WeightedIndex::new(weights.iter().copied()).map_err(|e| {
            GenerationError::InvalidDistribution {
                name,
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            index,
            max: weights.len().saturating_sub(1),
        })
    }

    /// Largest count this sampler can return.
    pub fn max(&self) -> usize {
        self.max
    }
}

impl Distribution<usize> for CountSampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.index.sample(rng)
    }
}

// ============================================================================
// Labels
// ============================================================================

/// Zipf-weighted label pool with count distributions for documents and filters.
#[derive(Debug, Clone)]
pub struct LabelSampler {
    field: &'static str,
    population: usize,
    popularity: WeightedAliasIndex<f64>,
    per_document: CountSampler,
    include: CountSampler,
    exclude: CountSampler,
}

impl LabelSampler {
    pub fn new(field: &'static str, settings: &LabelSettings) -> Result<Self, GenerationError> {
        let weights: Vec<f64> = (1..=settings.population)
            .map(|k| (k as f64).powf(settings.zipf_exponent).recip())
            .collect();
        let popularity =
            WeightedAliasIndex::new(weights).map_err(|e| GenerationError::InvalidDistribution {
                name: field,
                reason: e.to_string(),
            })?;

        let sampler = Self {
            field,
            population: settings.population,
            popularity,
            per_document: CountSampler::new(field, &settings.count_weights)?,
            include: CountSampler::new(field, &settings.filters.include_count_weights)?,
            exclude: CountSampler::new(field, &settings.filters.exclude_count_weights)?,
        };

        let limit = settings.unique_limit();
        let requested = sampler
            .per_document
            .max()
            .max(sampler.include.max() + sampler.exclude.max());
        if requested > limit {
            return Err(GenerationError::Cardinality {
                field,
                requested,
                population: settings.population,
                limit,
            });
        }
        Ok(sampler)
    }

    pub fn population(&self) -> usize {
        self.population
    }

    /// Labels of one document, in ascending order.
    pub fn sample_document<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u32> {
        let n = self.per_document.sample(rng);
        let mut labels = self.sample_unique(n, rng);
        labels.sort_unstable();
        labels
    }

    /// Include and exclude sets drawn as one unique sample, then split.
    pub fn sample_filter<R: Rng + ?Sized>(&self, rng: &mut R) -> LabelFilter {
        let n_include = self.include.sample(rng);
        let n_exclude = self.exclude.sample(rng);
        let mut labels = self.sample_unique(n_include + n_exclude, rng);
        let excluded = labels.split_off(n_include);
        LabelFilter {
            must_include: labels.into_iter().collect(),
            must_exclude: excluded.into_iter().collect(),
        }
    }

    /// `n` distinct labels, most popular first when rejection runs dry.
    fn sample_unique<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<u32> {
        debug_assert!(n <= self.population / 2, "{}: {} labels requested", self.field, n);

        let mut labels: Vec<u32> = Vec::with_capacity(n);
        let mut attempts = 0;
        while labels.len() < n && attempts < n * REJECTION_BUDGET {
            attempts += 1;
            let label = self.popularity.sample(rng) as u32;
            if !labels.contains(&label) {
                labels.push(label);
            }
        }

        if labels.len() < n {
            tracing::debug!(field = self.field, n, "Label rejection budget exhausted, filling by rank");
            let mut rank = 0u32;
            while labels.len() < n && (rank as usize) < self.population {
                if !labels.contains(&rank) {
                    labels.push(rank);
                }
                rank += 1;
            }
        }
        labels
    }
}

// ============================================================================
// Dates
// ============================================================================

/// Publication dates and date filter bounds, in unix epoch seconds.
#[derive(Debug, Clone)]
pub struct DateSampler {
    value: RangeSampler,
    has_lower: Bernoulli,
    has_upper: Bernoulli,
    lower: RangeSampler,
    upper: RangeSampler,
}

impl DateSampler {
    pub fn new(settings: &DateSettings) -> Result<Self, GenerationError> {
        let (min, max) = (settings.min.timestamp(), settings.max.timestamp());
        let bernoulli = |name: &'static str, p: f64| {
            Bernoulli::new(p).map_err(|e| GenerationError::InvalidDistribution {
                name,
                reason: e.to_string(),
            })
        };
        Ok(Self {
            value: RangeSampler::new("publication_date.distribution", &settings.distribution, min, max)?,
            has_lower: bernoulli("publication_date.filters.lower_bound_probability", settings.filters.lower_bound_probability)?,
            has_upper: bernoulli("publication_date.filters.upper_bound_probability", settings.filters.upper_bound_probability)?,
            lower: RangeSampler::new(
                "publication_date.filters.lower_bound_distribution",
                &settings.filters.lower_bound_distribution,
                min,
                max,
            )?,
            upper: RangeSampler::new(
                "publication_date.filters.upper_bound_distribution",
                &settings.filters.upper_bound_distribution,
                min,
                max,
            )?,
        })
    }

    pub fn sample_date<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        self.value.sample(rng)
    }

    /// Bounds are drawn independently and swapped when they cross.
    pub fn sample_filter<R: Rng + ?Sized>(&self, rng: &mut R) -> DateFilter {
        let mut gte = self.has_lower.sample(rng).then(|| self.lower.sample(rng));
        let mut lte = self.has_upper.sample(rng).then(|| self.upper.sample(rng));
        if let (Some(lower), Some(upper)) = (&mut gte, &mut lte) {
            if lower > upper {
                std::mem::swap(lower, upper);
            }
        }
        DateFilter { gte, lte }
    }
}
