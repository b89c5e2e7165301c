//! Strategy comparison: paired Wilcoxon signed-rank test and Vargha-Delaney A12,
//! per mutant and on run-level means across mutants.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::evaluation::results::ResultDocument;

/// Largest sample for which the exact null distribution is enumerated.
const EXACT_LIMIT: usize = 50;

/// Means closer than this count as equal when assigning a verdict.
const MEAN_EPSILON: f64 = 1e-9;

/// Label of the run-level row.
pub const SUMMARY: &str = "SUMMARY";

/// Vargha-Delaney A12: probability that a draw from `x` exceeds one from `y`.
pub fn a12(x: &[f64], y: &[f64]) -> f64 {
    if x.is_empty() || y.is_empty() {
        return 0.5;
    }
    let mut wins = 0usize;
    let mut ties = 0usize;
    for a in x {
        for b in y {
            if a > b {
                wins += 1;
            } else if a == b {
                ties += 1;
            }
        }
    }
    (wins as f64 + 0.5 * ties as f64) / (x.len() * y.len()) as f64
}

/// Complementary error function (Chebyshev fit, fractional error < 1.2e-7).
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let r = t * (-z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
        .exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

/// Result of a signed-rank test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignedRank {
    /// min(W+, W-)
    pub statistic: f64,
    pub p_value: f64,
    pub exact: bool,
}

/// Average ranks (1-based) of `values`, ties sharing the mean rank.
/// Also returns the tie group sizes.
fn rank(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut ties = Vec::new();
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let mean_rank = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = mean_rank;
        }
        if end - start > 1 {
            ties.push(end - start);
        }
        start = end;
    }
    (ranks, ties)
}

/// P(W+ <= t) under the null hypothesis, for `n` untied ranks.
fn exact_lower_tail(n: usize, t: f64) -> f64 {
    let max_sum = n * (n + 1) / 2;
    let mut counts = vec![0.0f64; max_sum + 1];
    counts[0] = 1.0;
    for k in 1..=n {
        for s in (k..=max_sum).rev() {
            counts[s] += counts[s - k];
        }
    }
    let limit = t.floor().max(0.0) as usize;
    let hits: f64 = counts.iter().take(limit.min(max_sum) + 1).sum();
    hits / 2f64.powi(n as i32)
}

/// Paired two-sided Wilcoxon signed-rank test.
///
/// Zero differences are dropped. Returns `None` for mismatched or too-short
/// inputs, or when every difference is zero.
pub fn wilcoxon_signed_rank(x: &[f64], y: &[f64]) -> Option<SignedRank> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let diffs: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(a, b)| a - b)
        .filter(|d| *d != 0.0)
        .collect();
    if diffs.is_empty() {
        return None;
    }

    let n = diffs.len();
    let magnitudes: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
    let (ranks, ties) = rank(&magnitudes);
    let w_plus: f64 = diffs
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| r)
        .sum();
    let total = (n * (n + 1)) as f64 / 2.0;
    let statistic = w_plus.min(total - w_plus);

    if n <= EXACT_LIMIT && ties.is_empty() {
        let p_value = (2.0 * exact_lower_tail(n, statistic)).min(1.0);
        return Some(SignedRank {
            statistic,
            p_value,
            exact: true,
        });
    }

    let nf = n as f64;
    let mean = nf * (nf + 1.0) / 4.0;
    let tie_term: f64 = ties
        .iter()
        .map(|&t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum();
    let variance = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term / 48.0;
    if variance <= 0.0 {
        return None;
    }
    let z = (statistic - mean) / variance.sqrt();
    Some(SignedRank {
        statistic,
        p_value: erfc(z.abs() / std::f64::consts::SQRT_2).min(1.0),
        exact: false,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Better,
    Worse,
    NoDifference,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Better => write!(f, "better"),
            Verdict::Worse => write!(f, "worse"),
            Verdict::NoDifference => write!(f, "no difference"),
        }
    }
}

/// Significant difference in the direction of the means; a missing p-value is no difference.
pub fn verdict(mean_a: f64, mean_b: f64, p_value: Option<f64>, alpha: f64) -> Verdict {
    match p_value {
        Some(p) if p < alpha && mean_a > mean_b + MEAN_EPSILON => Verdict::Better,
        Some(p) if p < alpha && mean_b > mean_a + MEAN_EPSILON => Verdict::Worse,
        _ => Verdict::NoDifference,
    }
}

/// One comparison row: strategy A against strategy B.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub mutant: String,
    pub metric_a: f64,
    pub metric_b: f64,
    pub p_value: Option<f64>,
    pub a12: f64,
    /// `(A - B) / B * 100`, absent when B is zero
    pub improvement: Option<f64>,
    pub verdict: Verdict,
}

impl ComparisonRow {
    fn from_vectors(mutant: &str, a: &[f64], b: &[f64], alpha: f64) -> Self {
        let metric_a = mean(a);
        let metric_b = mean(b);
        let p_value = wilcoxon_signed_rank(a, b).map(|t| t.p_value);
        Self {
            mutant: mutant.to_string(),
            metric_a,
            metric_b,
            p_value,
            a12: a12(a, b),
            improvement: (metric_b != 0.0).then(|| (metric_a - metric_b) / metric_b * 100.0),
            verdict: verdict(metric_a, metric_b, p_value, alpha),
        }
    }
}

/// Compare two P-measure documents at one sample size.
///
/// Every mutant present in both with at least `runs` values yields a row
/// (first `runs` values used); the final `SUMMARY` row tests the per-run means
/// across those mutants.
pub fn compare(
    a: &ResultDocument,
    b: &ResultDocument,
    size: &str,
    runs: usize,
    alpha: f64,
) -> Vec<ComparisonRow> {
    let mut rows = Vec::new();
    let mut run_sums_a = vec![0.0; runs];
    let mut run_sums_b = vec![0.0; runs];
    let mut included = 0usize;

    for (mutant, series_a) in a.iter() {
        let (Some(values_a), Some(values_b)) = (
            series_a.get(size),
            b.get(mutant).and_then(|series| series.get(size)),
        ) else {
            tracing::debug!("Skipping {}: no values for size {} in both runs", mutant, size);
            continue;
        };
        if runs == 0 || values_a.len() < runs || values_b.len() < runs {
            tracing::debug!(
                "Skipping {}: {} / {} values, {} required",
                mutant,
                values_a.len(),
                values_b.len(),
                runs
            );
            continue;
        }

        let values_a = &values_a[..runs];
        let values_b = &values_b[..runs];
        for i in 0..runs {
            run_sums_a[i] += values_a[i];
            run_sums_b[i] += values_b[i];
        }
        included += 1;
        rows.push(ComparisonRow::from_vectors(mutant, values_a, values_b, alpha));
    }

    if included > 0 {
        let run_means_a: Vec<f64> = run_sums_a.iter().map(|s| s / included as f64).collect();
        let run_means_b: Vec<f64> = run_sums_b.iter().map(|s| s / included as f64).collect();
        rows.push(ComparisonRow::from_vectors(
            SUMMARY,
            &run_means_a,
            &run_means_b,
            alpha,
        ));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::results::SizeSeries;

    fn document(entries: &[(&str, Vec<f64>)]) -> ResultDocument {
        let mut doc = ResultDocument::new();
        for (mutant, values) in entries {
            let mut series = SizeSeries::new();
            series.insert("6".to_string(), values.clone());
            doc.insert(mutant.to_string(), series);
        }
        doc
    }

    // =========================================================================
    // A12 tests
    // =========================================================================

    #[test]
    fn test_a12_identical_is_half() {
        let x = [0.1, 0.4, 0.4, 0.9];
        assert_eq!(a12(&x, &x), 0.5);
        assert_eq!(a12(&[], &x), 0.5);
    }

    #[test]
    fn test_a12_strict_dominance() {
        let x = [0.6, 0.7, 0.8];
        let y = [0.1, 0.2, 0.5];
        assert_eq!(a12(&x, &y), 1.0);
        assert_eq!(a12(&y, &x), 0.0);
    }

    #[test]
    fn test_a12_mixed() {
        // wins: (2 > 1), (3 > 1), (3 > 2); ties: (2 == 2)
        assert_eq!(a12(&[2.0, 3.0], &[1.0, 2.0]), 0.875);
    }

    // =========================================================================
    // Signed-rank tests
    // =========================================================================

    #[test]
    fn test_erfc_reference_values() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-7);
        assert!((erfc(1.0) - 0.157_299_207).abs() < 1e-7);
        assert!((erfc(-1.0) - 1.842_700_793).abs() < 1e-7);
    }

    #[test]
    fn test_ranks_average_ties() {
        let (ranks, ties) = rank(&[3.0, 1.0, 3.0, 2.0]);
        assert_eq!(ranks, vec![3.5, 1.0, 3.5, 2.0]);
        assert_eq!(ties, vec![2]);
    }

    #[test]
    fn test_exact_small_sample() {
        // All six differences positive with distinct magnitudes: W- = 0,
        // P(W+ <= 0) = 1/64, two-sided p = 1/32
        let x = [1.1, 2.2, 3.3, 4.4, 5.5, 6.6];
        let y = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let result = wilcoxon_signed_rank(&x, &y).unwrap();
        assert!(result.exact);
        assert_eq!(result.statistic, 0.0);
        assert!((result.p_value - 0.03125).abs() < 1e-12);
    }

    #[test]
    fn test_tied_magnitudes_use_normal_approximation() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 1.0, 5.0, 0.0];
        // diffs -1, 1, -2, 4: tie in |d| forces the normal approximation
        let result = wilcoxon_signed_rank(&x, &y).unwrap();
        assert!(!result.exact);
        assert!(result.p_value > 0.5);
    }

    #[test]
    fn test_normal_approximation_large_sample() {
        let x: Vec<f64> = (0..60).map(|i| i as f64 * 0.01 + 0.5).collect();
        let y: Vec<f64> = (0..60).map(|i| i as f64 * 0.01).collect();
        let result = wilcoxon_signed_rank(&x, &y).unwrap();
        assert!(!result.exact);
        assert!(result.p_value < 1e-6);
    }

    #[test]
    fn test_degenerate_inputs_have_no_p_value() {
        assert!(wilcoxon_signed_rank(&[1.0], &[2.0]).is_none());
        assert!(wilcoxon_signed_rank(&[1.0, 2.0], &[1.0]).is_none());
        assert!(wilcoxon_signed_rank(&[0.3, 0.4, 0.5], &[0.3, 0.4, 0.5]).is_none());
    }

    #[test]
    fn test_zero_differences_dropped() {
        let with_zero = wilcoxon_signed_rank(&[1.0, 2.5, 3.0], &[1.0, 2.0, 4.0]).unwrap();
        let without = wilcoxon_signed_rank(&[2.5, 3.0], &[2.0, 4.0]).unwrap();
        assert_eq!(with_zero, without);
    }

    // =========================================================================
    // Comparison tests
    // =========================================================================

    #[test]
    fn test_verdicts() {
        assert_eq!(verdict(0.8, 0.5, Some(0.01), 0.05), Verdict::Better);
        assert_eq!(verdict(0.5, 0.8, Some(0.01), 0.05), Verdict::Worse);
        assert_eq!(verdict(0.8, 0.5, Some(0.2), 0.05), Verdict::NoDifference);
        assert_eq!(verdict(0.8, 0.5, None, 0.05), Verdict::NoDifference);
    }

    #[test]
    fn test_summary_uses_run_level_means() {
        let a = document(&[
            ("mutant_1", vec![1.0, 0.0, 1.0]),
            ("mutant_2", vec![0.0, 1.0, 0.0]),
        ]);
        let b = document(&[
            ("mutant_1", vec![0.0, 0.0, 0.0]),
            ("mutant_2", vec![0.0, 0.0, 0.0]),
        ]);
        let rows = compare(&a, &b, "6", 3, 0.05);
        assert_eq!(rows.len(), 3);

        let summary = rows.last().unwrap();
        assert_eq!(summary.mutant, SUMMARY);
        // Per-run means are all 0.5 against 0.0: strict dominance
        assert_eq!(summary.a12, 1.0);
        assert_eq!(summary.metric_a, 0.5);
        assert!(summary.improvement.is_none());

        // Pooled raw values would tie half the pairs
        let pooled_a = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        assert!(a12(&pooled_a, &[0.0; 6]) < summary.a12);
    }

    #[test]
    fn test_short_vectors_skipped() {
        let a = document(&[
            ("mutant_1", vec![0.5, 0.6, 0.7]),
            ("mutant_2", vec![0.5]),
            ("mutant_3", vec![0.5, 0.5, 0.5]),
        ]);
        let b = document(&[
            ("mutant_1", vec![0.25, 0.3, 0.35]),
            ("mutant_2", vec![0.5, 0.5, 0.5]),
        ]);
        let rows = compare(&a, &b, "6", 3, 0.05);
        let names: Vec<_> = rows.iter().map(|r| r.mutant.as_str()).collect();
        assert_eq!(names, vec!["mutant_1", SUMMARY]);
        assert!((rows[0].improvement.unwrap() - 100.0).abs() < 1e-9);
        assert!(compare(&a, &b, "9", 3, 0.05).is_empty());
    }

    #[test]
    fn test_identical_strategies_no_p_value() {
        let a = document(&[("mutant_1", vec![0.2, 0.4, 0.6])]);
        let rows = compare(&a, &a, "6", 3, 0.05);
        assert!(rows.iter().all(|r| r.p_value.is_none()));
        assert!(rows.iter().all(|r| r.verdict == Verdict::NoDifference));
        assert!(rows.iter().all(|r| r.a12 == 0.5));
    }
}
