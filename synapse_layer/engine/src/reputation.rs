// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Specialized reputation: per-tag credit on task completion, the daily
//! decay pass, and the contextual vote weight used by governance.

use log::*;
use synapse_common_types::Timestamp;
use synapse_state::models::{NetworkState, Reputation, ReputationFormula};

const LOG_TARGET: &str = "synapse::engine::reputation";

/// Tags below this value are dropped by the decay pass.
pub const TAG_FLOOR: f64 = 0.1;

/// Credits `reward_points` on every tag of a completed task. Missing tags
/// are created; the total is kept in sync with the tag sum.
pub fn credit_completion(reputation: &mut Reputation, tags: &[String], reward_points: f64, now: Timestamp) {
    for tag in tags {
        *reputation.tags.entry(tag.clone()).or_insert(0.0) += reward_points;
    }
    reputation.recompute_total();
    reputation.last_updated = now;
}

/// One decay tick over every node: each tag is multiplied by the configured
/// factor, tags under [`TAG_FLOOR`] are dropped, totals are recomputed.
/// Returns how many node records changed. The caller gossips the changed
/// records; remote nodes converge through the normal LWW merge.
pub fn apply_decay(state: &mut NetworkState, now: Timestamp) -> usize {
    let factor = state.config.reputation_decay_factor;
    let mut touched = 0;
    for node in state.nodes.values_mut() {
        if node.reputation.tags.is_empty() && node.reputation.total == 0.0 {
            continue;
        }
        for value in node.reputation.tags.values_mut() {
            *value *= factor;
        }
        node.reputation.tags.retain(|_, value| *value >= TAG_FLOOR);
        node.reputation.recompute_total();
        node.reputation.last_updated = now;
        node.updated_at = now;
        touched += 1;
    }
    debug!(target: LOG_TARGET, "Reputation decay applied to {} nodes", touched);
    touched
}

/// Contextual vote weight for one voter on one proposal:
///
/// ```text
/// base  = base_offset + base_scale·log2(total + 1)
/// bonus = bonus_scale·log2(Σ tags[t] for t in proposal_tags  + 1)
/// ```
///
/// Logarithmic scaling resists plutocracy; the bonus rewards on-topic
/// expertise without letting it dominate.
pub fn contextual_weight(formula: &ReputationFormula, reputation: &Reputation, proposal_tags: &[String]) -> f64 {
    let base = formula.base_offset + formula.base_scale * (reputation.total + 1.0).log2();
    let specialization: f64 = proposal_tags
        .iter()
        .filter_map(|tag| reputation.tags.get(tag))
        .sum();
    base + formula.bonus_scale * (specialization + 1.0).log2()
}
