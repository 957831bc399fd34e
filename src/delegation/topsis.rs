//! TOPSIS multi-criteria ranking
//!
//! Technique for Order of Preference by Similarity to Ideal Solution: each
//! candidate is a row of criteria measurements, and candidates are ranked by
//! their relative closeness to the best and worst observed vector.
//!
//! Criteria columns, in order:
//!
//! 0. probe latency in seconds (minimized)
//! 1. remote node count (maximized)
//! 2. remote free memory (maximized)
//! 3. remote free CPU (maximized)
//! 4. average successful execution time in seconds (minimized)
//! 5. pending job count (minimized)

use rand::seq::SliceRandom;
use rand::Rng;

/// Number of criteria per candidate row
pub const CRITERIA: usize = 6;

/// Fixed criterion weights, applied after column normalization
pub const WEIGHTS: [f64; CRITERIA] = [1.0, 8.0, 18.0, 65.0, 2.0, 6.0];

/// Columns where smaller is better; the rest are maximized
const MINIMIZED: [bool; CRITERIA] = [true, false, false, false, true, true];

/// Candidates within this fraction of the top preference score are shuffled
/// among themselves to prevent deterministic starvation among near-ties
pub const NEAR_TIE_BAND: f64 = 0.20;

/// Rank candidate rows, returning one priority per input row
///
/// Priorities are integers in `[0, 100]`, lower is preferred, and the best
/// candidate maps to 0. A single-row matrix deterministically yields `[0]`;
/// the degenerate distances (both zero) are defined as full preference.
pub fn rank<R: Rng>(matrix: &[[f64; CRITERIA]], rng: &mut R) -> Vec<u32> {
    if matrix.is_empty() {
        return Vec::new();
    }

    let weighted = normalize_and_weight(matrix);
    let preferences = preference_scores(&weighted);
    let preferences = shuffle_near_ties(preferences, rng);

    preferences
        .into_iter()
        .map(|p| ((1.0 - p.clamp(0.0, 1.0)) * 100.0).round() as u32)
        .collect()
}

/// L2-normalize each column, then apply the fixed weights
fn normalize_and_weight(matrix: &[[f64; CRITERIA]]) -> Vec<[f64; CRITERIA]> {
    let mut norms = [0.0f64; CRITERIA];
    for row in matrix {
        for (col, value) in row.iter().enumerate() {
            norms[col] += value * value;
        }
    }
    for norm in &mut norms {
        *norm = norm.sqrt();
    }

    matrix
        .iter()
        .map(|row| {
            let mut weighted = [0.0f64; CRITERIA];
            for col in 0..CRITERIA {
                // An all-zero column stays zero
                let normalized = if norms[col] > 0.0 {
                    row[col] / norms[col]
                } else {
                    0.0
                };
                weighted[col] = normalized * WEIGHTS[col];
            }
            weighted
        })
        .collect()
}

/// Per-row preference score: distance to anti-ideal over total distance
fn preference_scores(weighted: &[[f64; CRITERIA]]) -> Vec<f64> {
    let mut ideal = [0.0f64; CRITERIA];
    let mut anti_ideal = [0.0f64; CRITERIA];

    for col in 0..CRITERIA {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for row in weighted {
            min = min.min(row[col]);
            max = max.max(row[col]);
        }
        if MINIMIZED[col] {
            ideal[col] = min;
            anti_ideal[col] = max;
        } else {
            ideal[col] = max;
            anti_ideal[col] = min;
        }
    }

    weighted
        .iter()
        .map(|row| {
            let mut d_ideal = 0.0f64;
            let mut d_anti = 0.0f64;
            for col in 0..CRITERIA {
                d_ideal += (row[col] - ideal[col]).powi(2);
                d_anti += (row[col] - anti_ideal[col]).powi(2);
            }
            let d_ideal = d_ideal.sqrt();
            let d_anti = d_anti.sqrt();

            let total = d_ideal + d_anti;
            if total > 0.0 {
                d_anti / total
            } else {
                // Single candidate, or rows identical on every criterion
                1.0
            }
        })
        .collect()
}

/// Shuffle preference scores among candidates near the top score
///
/// Candidates whose absolute gap from the top score is within
/// `NEAR_TIE_BAND` of it (the top candidate included) randomly exchange
/// scores among themselves; everyone else keeps their own score and rank.
fn shuffle_near_ties<R: Rng>(preferences: Vec<f64>, rng: &mut R) -> Vec<f64> {
    let mut order: Vec<usize> = (0..preferences.len()).collect();
    order.sort_by(|&a, &b| {
        preferences[b]
            .partial_cmp(&preferences[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let top = preferences[order[0]];
    let mut band: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&i| top - preferences[i] <= NEAR_TIE_BAND * top)
        .collect();

    let band_scores: Vec<f64> = band.iter().map(|&i| preferences[i]).collect();
    band.shuffle(rng);

    let mut result = preferences;
    for (&row, &score) in band.iter().zip(band_scores.iter()) {
        result[row] = score;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    #[test]
    fn test_single_candidate_is_best() {
        let matrix = [[0.5, 3.0, 1e9, 4000.0, 12.0, 0.1]];
        let priorities = rank(&matrix, &mut rng());
        assert_eq!(priorities, vec![0], "lone candidate must get priority 0");
    }

    #[test]
    fn test_empty_matrix() {
        let priorities = rank(&[], &mut rng());
        assert!(priorities.is_empty());
    }

    #[test]
    fn test_dominant_candidate_wins() {
        // Row 0 is better on every criterion
        let matrix = [
            [0.1, 5.0, 2e9, 8000.0, 5.0, 0.1],
            [2.0, 1.0, 1e8, 500.0, 60.0, 10.1],
        ];
        let priorities = rank(&matrix, &mut rng());
        assert!(
            priorities[0] < priorities[1],
            "dominant row should rank better: {:?}",
            priorities
        );
        assert_eq!(priorities[0], 0);
        assert_eq!(priorities[1], 100);
    }

    #[test]
    fn test_sentinel_row_ranks_last() {
        let matrix = [
            [0.2, 3.0, 1e9, 4000.0, 10.0, 1.1],
            [0.2, 2.0, 5e8, 2000.0, 20.0, 2.1],
            // Worst-case substitute for a failed probe
            [0.2, 0.0, 0.0, 0.0, 1e6, 1e6],
        ];
        let priorities = rank(&matrix, &mut rng());
        assert!(priorities[2] > priorities[0]);
        assert!(priorities[2] > priorities[1]);
    }

    #[test]
    fn test_identical_rows_all_best() {
        let row = [0.3, 2.0, 1e9, 3000.0, 15.0, 0.1];
        let matrix = [row, row, row];
        let priorities = rank(&matrix, &mut rng());
        assert_eq!(priorities, vec![0, 0, 0]);
    }

    #[test]
    fn test_near_tie_shuffle_swaps_only_the_band() {
        // 1.0 and 0.9 are within 20% of the top; 0.1 is not
        let preferences = vec![1.0, 0.9, 0.1];

        let mut firsts = std::collections::HashSet::new();
        for seed in 0..32 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let shuffled = shuffle_near_ties(preferences.clone(), &mut rng);

            assert_eq!(shuffled[2], 0.1, "out-of-band score must not move");
            let mut band = vec![shuffled[0], shuffled[1]];
            band.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(band, vec![0.9, 1.0], "band scores are permuted, not replaced");

            firsts.insert(shuffled[0].to_bits());
        }

        assert_eq!(firsts.len(), 2, "shuffle should deal both assignments across seeds");
    }

    #[test]
    fn test_band_boundary_is_inclusive() {
        // Exactly 20% below the top score is still in the band
        let preferences = vec![1.0, 0.8, 0.5];

        let mut firsts = std::collections::HashSet::new();
        for seed in 0..32 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let shuffled = shuffle_near_ties(preferences.clone(), &mut rng);
            assert_eq!(shuffled[2], 0.5);
            firsts.insert(shuffled[0].to_bits());
        }
        assert_eq!(firsts.len(), 2);
    }

    #[test]
    fn test_latency_is_minimized() {
        // Only latency differs
        let matrix = [
            [5.0, 3.0, 1e9, 4000.0, 10.0, 1.1],
            [0.1, 3.0, 1e9, 4000.0, 10.0, 1.1],
        ];
        let priorities = rank(&matrix, &mut rng());
        assert!(
            priorities[1] <= priorities[0],
            "lower latency must not rank worse: {:?}",
            priorities
        );
    }
}
