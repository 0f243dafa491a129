//! Scalar distance kernels.
//!
//! Every backend under test indexes with the euclidean metric, so ground truth
//! is ranked by [`euclidean_squared`]; the square root is only taken when a
//! true distance has to be reported.

use std::fmt;
use std::str::FromStr;

/// Compute squared Euclidean distance
#[inline]
pub fn euclidean_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Compute Euclidean (L2) distance
#[inline]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    euclidean_squared(a, b).sqrt()
}

/// Compute cosine distance: 1 - cosine_similarity
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 1.0;
    }

    1.0 - dot / denom
}

/// Compute dot product
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Distance metric an index is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    #[default]
    Euclidean,
    Cosine,
    DotProduct,
}

impl Metric {
    /// Distance between two vectors; smaller is closer for every variant.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => euclidean(a, b),
            Metric::Cosine => cosine(a, b),
            Metric::DotProduct => -dot(a, b),
        }
    }

    /// Monotone surrogate of [`Metric::distance`] that is cheaper to compute.
    #[inline]
    pub fn rank_key(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => euclidean_squared(a, b),
            other => other.distance(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Cosine => "cosine",
            Metric::DotProduct => "dot",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            "dot" | "dotproduct" | "dot_product" => Ok(Metric::DotProduct),
            other => Err(format!("unknown metric: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_squared() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        // 9 + 9 + 9
        assert!((euclidean_squared(&a, &b) - 27.0).abs() < 1e-5);
    }

    #[test]
    fn test_euclidean() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((euclidean(&a, &b) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_parallel_and_zero() {
        assert!(cosine(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-5);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_dot() {
        assert!((dot(&[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < 1e-5);
    }

    #[test]
    fn test_rank_key_preserves_order() {
        let q = [0.0f32, 0.0];
        let near = [1.0f32, 1.0];
        let far = [2.0f32, 3.0];
        let m = Metric::Euclidean;
        assert!(m.rank_key(&q, &near) < m.rank_key(&q, &far));
        assert!(m.distance(&q, &near) < m.distance(&q, &far));
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert_eq!(Metric::Cosine.to_string(), "cosine");
        assert!("hamming".parse::<Metric>().is_err());
    }
}
