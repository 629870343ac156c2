//! Reciprocal Rank Fusion (RRF) for combining dense and sparse results
//!
//! RRF works on ranks only, so the two backends' incomparable score scales
//! never need normalizing:
//!
//! `score(d) = alpha / (k + dense_rank(d)) + (1 - alpha) / (k + sparse_rank(d))`
//!
//! A document missing from one list gets an infinite rank there. Its term is
//! the smallest positive `f64` rather than zero, so a single-list document is
//! never scored out of the fused list.

use lexforge_common::errors::{AppError, Result};
use lexforge_common::models::{FusedResult, ScoredCandidate};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Contribution of a rank that is absent from its list
pub const ABSENT_RANK_TERM: f64 = f64::MIN_POSITIVE;

/// RRF fusion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankFusion {
    /// Weight of the dense list, in [0, 1]; the sparse list gets `1 - alpha`
    alpha: f64,

    /// Smoothing constant (typically 60)
    k: f64,
}

impl Default for RankFusion {
    fn default() -> Self {
        Self { alpha: 0.7, k: 60.0 }
    }
}

impl RankFusion {
    /// Build fusion parameters, rejecting `alpha` outside [0, 1] and `k <= 0`
    pub fn new(alpha: f64, k: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(AppError::Configuration {
                message: format!("fusion alpha must be within [0, 1], got {}", alpha),
            });
        }
        if !(k > 0.0) || !k.is_finite() {
            return Err(AppError::Configuration {
                message: format!("fusion k must be a positive number, got {}", k),
            });
        }
        Ok(Self { alpha, k })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    fn term(&self, weight: f64, rank: Option<usize>) -> f64 {
        match rank {
            Some(rank) => weight / (rank as f64 + self.k),
            None => ABSENT_RANK_TERM,
        }
    }

    /// Fuse the two ranked lists and keep the best `top_k`.
    ///
    /// Ranks are the 1-based positions in the given lists. Output is sorted
    /// by score descending; ties go to the better dense rank, then to the
    /// lexicographically smaller document id. Duplicate ids within one list
    /// keep their first (best) position.
    pub fn fuse(
        &self,
        dense: Vec<ScoredCandidate>,
        sparse: Vec<ScoredCandidate>,
        top_k: usize,
    ) -> Vec<FusedResult> {
        let mut merged: HashMap<String, ScoredCandidate> =
            HashMap::with_capacity(dense.len() + sparse.len());

        for (i, mut candidate) in dense.into_iter().enumerate() {
            if merged.contains_key(candidate.id()) {
                continue;
            }
            candidate.dense_rank = Some(i + 1);
            candidate.sparse_rank = None;
            merged.insert(candidate.document.id.clone(), candidate);
        }

        for (i, mut candidate) in sparse.into_iter().enumerate() {
            match merged.get_mut(candidate.id()) {
                Some(existing) => {
                    if existing.sparse_rank.is_none() {
                        existing.sparse_rank = Some(i + 1);
                    }
                }
                None => {
                    candidate.dense_rank = None;
                    candidate.sparse_rank = Some(i + 1);
                    merged.insert(candidate.document.id.clone(), candidate);
                }
            }
        }

        let mut results: Vec<FusedResult> = merged
            .into_values()
            .map(|candidate| {
                let dense_contribution = self.term(self.alpha, candidate.dense_rank);
                let sparse_contribution = self.term(1.0 - self.alpha, candidate.sparse_rank);
                FusedResult {
                    rrf_score: dense_contribution + sparse_contribution,
                    dense_contribution,
                    sparse_contribution,
                    candidate,
                    rerank_score: None,
                }
            })
            .collect();

        results.sort_by(compare_fused);
        results.truncate(top_k);
        results
    }
}

fn compare_fused(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.rrf_score
        .partial_cmp(&a.rrf_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            let a_rank = a.candidate.dense_rank.unwrap_or(usize::MAX);
            let b_rank = b.candidate.dense_rank.unwrap_or(usize::MAX);
            a_rank.cmp(&b_rank)
        })
        .then_with(|| a.id().cmp(b.id()))
}
