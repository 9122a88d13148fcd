//! Comparison plan generation for Bradley-Terry ranking.
//!
//! Small item sets get a full round robin; larger sets get a random sample
//! so provider calls grow linearly in n instead of quadratically. The
//! presentation order is always shuffled to avoid positional bias.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Item counts up to this get the complete C(n,2) round robin.
const ROUND_ROBIN_MAX_ITEMS: usize = 5;

/// Allowed range for `pairs_per_item` in sampled mode.
pub const MIN_PAIRS_PER_ITEM: usize = 2;
pub const MAX_PAIRS_PER_ITEM: usize = 5;
pub const DEFAULT_PAIRS_PER_ITEM: usize = 3;

/// One planned (and later judged) pairwise comparison.
///
/// `winner`/`reason` start empty and are filled in per completed judgment;
/// a comparison left without a winner is excluded from estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtComparison {
    /// 1-based position in the generated plan.
    pub index: usize,
    pub item_a: String,
    pub item_b: String,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Clamp a requested `pairs_per_item` into the supported range.
pub fn clamp_pairs_per_item(requested: usize) -> usize {
    requested.clamp(MIN_PAIRS_PER_ITEM, MAX_PAIRS_PER_ITEM)
}

/// Generate the comparison plan for `item_ids`.
///
/// n <= 5: every unordered pair, shuffled, renumbered 1..k.
/// n > 5: the full pair list shuffled and truncated to
/// `ceil(n * pairs_per_item / 2)` pairs drawn without replacement.
pub fn generate_comparisons(item_ids: &[String], pairs_per_item: usize) -> Vec<BtComparison> {
    let mut rng = StdRng::from_entropy();
    generate_comparisons_with_rng(item_ids, pairs_per_item, &mut rng)
}

/// Deterministic variant for reproducible plans.
pub fn generate_comparisons_with_rng<R: Rng>(
    item_ids: &[String],
    pairs_per_item: usize,
    rng: &mut R,
) -> Vec<BtComparison> {
    let n = item_ids.len();
    if n < 2 {
        return Vec::new();
    }

    let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }
    pairs.shuffle(rng);

    let target = expected_comparison_count(n, pairs_per_item);
    pairs.truncate(target);

    pairs
        .into_iter()
        .enumerate()
        .map(|(idx, (i, j))| BtComparison {
            index: idx + 1,
            item_a: item_ids[i].clone(),
            item_b: item_ids[j].clone(),
            winner: None,
            reason: None,
        })
        .collect()
}

/// Arithmetic mirror of [`generate_comparisons`]: the exact number of pairs
/// the plan will contain for the same inputs. Branches at the same n = 5
/// boundary; keep the two in lock-step.
pub fn expected_comparison_count(item_count: usize, pairs_per_item: usize) -> usize {
    if item_count < 2 {
        return 0;
    }
    let all_pairs = item_count * (item_count - 1) / 2;
    if item_count <= ROUND_ROBIN_MAX_ITEMS {
        all_pairs
    } else {
        let sampled = (item_count * pairs_per_item).div_ceil(2);
        sampled.min(all_pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item-{i}")).collect()
    }

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn small_sets_get_full_round_robin() {
        for n in 2..=5 {
            let plan = generate_comparisons_with_rng(&ids(n), DEFAULT_PAIRS_PER_ITEM, &mut seeded());
            assert_eq!(plan.len(), n * (n - 1) / 2, "n={n}");
        }
    }

    #[test]
    fn large_sets_get_linear_sample() {
        let plan = generate_comparisons_with_rng(&ids(10), 3, &mut seeded());
        assert_eq!(plan.len(), 15); // ceil(10*3/2)

        let plan = generate_comparisons_with_rng(&ids(7), 3, &mut seeded());
        assert_eq!(plan.len(), 11); // ceil(7*3/2)
    }

    #[test]
    fn no_self_pairs_and_no_duplicates() {
        let plan = generate_comparisons_with_rng(&ids(12), 5, &mut seeded());
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for c in &plan {
            assert_ne!(c.item_a, c.item_b);
            let key = if c.item_a < c.item_b {
                (c.item_a.clone(), c.item_b.clone())
            } else {
                (c.item_b.clone(), c.item_a.clone())
            };
            assert!(seen.insert(key), "duplicate pair {:?}", c);
        }
    }

    #[test]
    fn plan_is_renumbered_from_one() {
        let plan = generate_comparisons_with_rng(&ids(5), 3, &mut seeded());
        let indices: Vec<usize> = plan.iter().map(|c| c.index).collect();
        assert_eq!(indices, (1..=plan.len()).collect::<Vec<_>>());
    }

    #[test]
    fn expected_count_matches_generated_count() {
        for n in [0, 1, 2, 3, 5, 6, 8, 15, 30] {
            for ppi in MIN_PAIRS_PER_ITEM..=MAX_PAIRS_PER_ITEM {
                let plan = generate_comparisons_with_rng(&ids(n), ppi, &mut seeded());
                assert_eq!(
                    plan.len(),
                    expected_comparison_count(n, ppi),
                    "n={n} ppi={ppi}"
                );
            }
        }
    }

    #[test]
    fn degenerate_inputs_yield_empty_plan() {
        assert!(generate_comparisons(&ids(0), 3).is_empty());
        assert!(generate_comparisons(&ids(1), 3).is_empty());
        assert_eq!(expected_comparison_count(1, 3), 0);
    }

    #[test]
    fn clamping_bounds_pairs_per_item() {
        assert_eq!(clamp_pairs_per_item(0), MIN_PAIRS_PER_ITEM);
        assert_eq!(clamp_pairs_per_item(3), 3);
        assert_eq!(clamp_pairs_per_item(99), MAX_PAIRS_PER_ITEM);
    }
}
