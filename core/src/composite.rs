//! Composite scorer: weighted aggregation of the pillars present on a date.
//!
//!   composite = Σ(w_p · s_p) / Σ(w_p)   over pillars with a reading
//!
//! Missing pillars drop out of both sums, so the remaining weights are
//! renormalized rather than the missing pillar counting as zero.

use crate::{
    band::{StatusBand, StatusBands},
    config::CompositeWeights,
    types::Pillar,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeOutcome {
    pub score:        f64,
    pub status:       StatusBand,
    pub degraded:     bool,
    pub pillar_count: usize,
}

/// Pure composite over `(pillar, score)` pairs. Returns `None` when no
/// pillar with positive weight is present: absence, never zero.
pub fn compose(
    weights: &CompositeWeights,
    bands:   &StatusBands,
    present: &[(Pillar, f64)],
) -> Option<CompositeOutcome> {
    let (weighted, total_weight) = present
        .iter()
        .fold((0.0f64, 0.0f64), |(acc, tw), (pillar, score)| {
            let w = weights.weight(*pillar);
            (acc + w * score, tw + w)
        });

    if total_weight <= 0.0 {
        return None;
    }

    let score = weighted / total_weight;
    Some(CompositeOutcome {
        score,
        status: bands.classify(score),
        degraded: present.len() < Pillar::ALL.len(),
        pillar_count: present.len(),
    })
}
