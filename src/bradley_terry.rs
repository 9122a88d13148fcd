//! Bradley-Terry strength estimation via Minorization-Maximization.
//!
//! Given pairwise win/loss outcomes, infers a latent per-item strength and
//! derives a total order. Comparisons without a recorded winner are ignored,
//! so the estimator operates correctly on a partial outcome set; an item
//! with no valid comparisons simply keeps its uniform prior.

use std::collections::HashMap;

use tracing::warn;

use crate::pairing::BtComparison;

/// Convergence tolerance on the max absolute strength change per sweep.
const CONVERGENCE_TOL: f64 = 1e-6;

/// Maximum MM sweeps.
const MAX_ITERATIONS: usize = 100;

/// Floor applied to raw strengths so the log transform stays finite for
/// items that lost every comparison.
const STRENGTH_FLOOR: f64 = 1e-10;

/// Result of a Bradley-Terry fit.
#[derive(Debug, Clone)]
pub struct StrengthEstimate {
    /// Item id -> median-centered natural-log strength.
    pub log_strengths: HashMap<String, f64>,
    /// Ids that had no winner-bearing comparison and therefore still sit on
    /// the uniform prior.
    pub low_confidence: Vec<String>,
    /// Sweeps actually run.
    pub iterations: usize,
    /// Whether the tolerance was met before the sweep cap.
    pub converged: bool,
}

/// Fit strengths from judged comparisons.
///
/// Unknown winner ids (not in `item_ids`) and winnerless comparisons are
/// skipped. The MM update for item i reads
/// `new[i] = wins(i) / sum_j played(i,j) / (s[i] + s[j])`
/// using the strengths from the start of the sweep; strengths are
/// renormalized to sum to 1 after every sweep.
pub fn estimate_strengths(item_ids: &[String], comparisons: &[BtComparison]) -> StrengthEstimate {
    let n = item_ids.len();
    if n == 0 {
        return StrengthEstimate {
            log_strengths: HashMap::new(),
            low_confidence: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    let index: HashMap<&str, usize> = item_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    // Win and play counts from winner-bearing comparisons only.
    let mut wins = vec![vec![0.0f64; n]; n];
    let mut played = vec![vec![0.0f64; n]; n];
    for comp in comparisons {
        let Some(winner) = comp.winner.as_deref() else {
            continue;
        };
        let (Some(&a), Some(&b)) = (index.get(comp.item_a.as_str()), index.get(comp.item_b.as_str()))
        else {
            warn!(
                index = comp.index,
                "comparison references unknown item ids; skipping"
            );
            continue;
        };
        if a == b {
            continue;
        }
        let (w, l) = if winner == comp.item_a {
            (a, b)
        } else if winner == comp.item_b {
            (b, a)
        } else {
            warn!(index = comp.index, winner, "winner is neither side; skipping");
            continue;
        };
        wins[w][l] += 1.0;
        played[a][b] += 1.0;
        played[b][a] += 1.0;
    }

    let total_played: Vec<f64> = (0..n).map(|i| played[i].iter().sum()).collect();
    let total_wins: Vec<f64> = (0..n).map(|i| wins[i].iter().sum()).collect();

    let mut strengths = vec![1.0 / n as f64; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < MAX_ITERATIONS {
        iterations += 1;
        let mut next = strengths.clone();

        for i in 0..n {
            if total_played[i] == 0.0 {
                continue;
            }
            let mut denom = 0.0;
            for j in 0..n {
                if played[i][j] > 0.0 {
                    denom += played[i][j] / (strengths[i] + strengths[j]);
                }
            }
            if denom > 0.0 {
                next[i] = (total_wins[i] / denom).max(STRENGTH_FLOOR);
            }
        }

        let sum: f64 = next.iter().sum();
        if sum > 0.0 {
            for s in next.iter_mut() {
                *s /= sum;
            }
        }

        let max_change = strengths
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f64, f64::max);

        strengths = next;
        if max_change < CONVERGENCE_TOL {
            converged = true;
            break;
        }
    }

    // Log scale, median-centered, so results are comparable across calls
    // regardless of the overall scale of wins.
    let logs: Vec<f64> = strengths.iter().map(|s| s.max(STRENGTH_FLOOR).ln()).collect();
    let center = median(&logs);

    let mut low_confidence = Vec::new();
    let mut log_strengths = HashMap::with_capacity(n);
    for (i, id) in item_ids.iter().enumerate() {
        log_strengths.insert(id.clone(), logs[i] - center);
        if total_played[i] == 0.0 {
            warn!(item = %id, "no valid comparisons; item keeps uniform prior");
            low_confidence.push(id.clone());
        }
    }

    StrengthEstimate {
        log_strengths,
        low_confidence,
        iterations,
        converged,
    }
}

/// Total order: descending strength, ties broken by input id order.
pub fn rank_by_strength(item_ids: &[String], strengths: &HashMap<String, f64>) -> Vec<String> {
    let mut ranked: Vec<String> = item_ids.to_vec();
    ranked.sort_by(|a, b| {
        let sa = strengths.get(a).copied().unwrap_or(0.0);
        let sb = strengths.get(b).copied().unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn judged(index: usize, a: &str, b: &str, winner: &str) -> BtComparison {
        BtComparison {
            index,
            item_a: a.to_string(),
            item_b: b.to_string(),
            winner: Some(winner.to_string()),
            reason: None,
        }
    }

    #[test]
    fn transitive_chain_orders_correctly() {
        let items = ids(&["a", "b", "c"]);
        let comps = vec![
            judged(1, "a", "b", "a"),
            judged(2, "b", "c", "b"),
            judged(3, "a", "c", "a"),
        ];
        let est = estimate_strengths(&items, &comps);
        assert!(est.converged);
        let order = rank_by_strength(&items, &est.log_strengths);
        assert_eq!(order, ids(&["a", "b", "c"]));
        assert!(est.low_confidence.is_empty());
    }

    #[test]
    fn undefeated_item_ranks_strictly_first() {
        // a beats everyone; b/c/d outcomes are mixed.
        let items = ids(&["b", "a", "c", "d"]);
        let comps = vec![
            judged(1, "a", "b", "a"),
            judged(2, "a", "c", "a"),
            judged(3, "a", "d", "a"),
            judged(4, "b", "c", "c"),
            judged(5, "c", "d", "d"),
            judged(6, "b", "d", "b"),
        ];
        let est = estimate_strengths(&items, &comps);
        let order = rank_by_strength(&items, &est.log_strengths);
        assert_eq!(order[0], "a");
        let a = est.log_strengths["a"];
        for other in ["b", "c", "d"] {
            assert!(a > est.log_strengths[other], "a <= {other}");
        }
    }

    #[test]
    fn symmetric_outcomes_give_zero_centered_strengths() {
        let items = ids(&["x", "y", "z"]);
        let comps = vec![
            judged(1, "x", "y", "x"),
            judged(2, "x", "y", "y"),
            judged(3, "y", "z", "y"),
            judged(4, "y", "z", "z"),
            judged(5, "x", "z", "x"),
            judged(6, "x", "z", "z"),
        ];
        let est = estimate_strengths(&items, &comps);
        for id in ["x", "y", "z"] {
            assert!(
                est.log_strengths[id].abs() < 1e-6,
                "{id}: {}",
                est.log_strengths[id]
            );
        }
    }

    #[test]
    fn no_comparisons_leaves_uniform_prior_everywhere() {
        let items = ids(&["p", "q"]);
        let est = estimate_strengths(&items, &[]);
        assert!(est.log_strengths.values().all(|v| v.abs() < 1e-9));
        assert_eq!(est.low_confidence, items);
        // Uniform prior ties break by input order.
        assert_eq!(rank_by_strength(&items, &est.log_strengths), items);
    }

    #[test]
    fn winnerless_comparisons_are_excluded() {
        let items = ids(&["a", "b", "c"]);
        let comps = vec![
            judged(1, "a", "b", "a"),
            BtComparison {
                index: 2,
                item_a: "b".into(),
                item_b: "c".into(),
                winner: None,
                reason: None,
            },
        ];
        let est = estimate_strengths(&items, &comps);
        assert_eq!(est.low_confidence, vec!["c".to_string()]);
        let order = rank_by_strength(&items, &est.log_strengths);
        assert_eq!(order[0], "a");
    }

    #[test]
    fn ranking_is_a_permutation_of_inputs() {
        let items = ids(&["m1", "m2", "m3", "m4", "m5"]);
        let comps = vec![
            judged(1, "m1", "m2", "m2"),
            judged(2, "m3", "m4", "m3"),
            judged(3, "m5", "m1", "m5"),
            judged(4, "m2", "m3", "m2"),
        ];
        let est = estimate_strengths(&items, &comps);
        let mut order = rank_by_strength(&items, &est.log_strengths);
        order.sort();
        let mut expected = items.clone();
        expected.sort();
        assert_eq!(order, expected);
    }

    #[test]
    fn all_logs_finite_even_for_winless_items() {
        let items = ids(&["winner", "loser"]);
        let comps = vec![judged(1, "winner", "loser", "winner")];
        let est = estimate_strengths(&items, &comps);
        assert!(est.log_strengths.values().all(|v| v.is_finite()));
        assert!(est.log_strengths["winner"] > est.log_strengths["loser"]);
    }
}
