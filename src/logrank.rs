use ndarray::{Array1, Array2};
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::cohort::GroupSurvival;
use crate::error::{Result, SurvivalError};
use crate::newton::solve_linear_system;

/// Outcome of a k-sample log-rank test.
#[derive(Debug, Clone, Serialize)]
pub struct LogRankResult {
    pub chi_square: f64,
    pub df: usize,
    pub p_value: f64,
    /// Per-group observed event counts, in input group order.
    pub observed: Vec<f64>,
    /// Per-group expected event counts under the common-hazard null.
    pub expected: Vec<f64>,
}

/// Upper-tail chi-square probability.
pub(crate) fn chi_square_p_value(stat: f64, df: usize) -> Result<f64> {
    let dist = ChiSquared::new(df as f64)
        .map_err(|e| SurvivalError::numerical_error(format!("chi-square distribution: {}", e)))?;
    Ok((1.0 - dist.cdf(stat)).clamp(0.0, 1.0))
}

/// Standard (unweighted) log-rank test across 2+ groups.
///
/// At each distinct pooled event time the expected events per group are the
/// group's at-risk share of the total events; the accumulated `O - E` vector
/// and its hypergeometric variance-covariance matrix combine into a
/// chi-square statistic with `groups - 1` degrees of freedom.
pub fn log_rank_test(groups: &[GroupSurvival]) -> Result<LogRankResult> {
    let k = groups.len();
    if k < 2 {
        return Err(SurvivalError::invalid_dimensions(
            "log-rank test needs at least two groups",
        ));
    }
    for g in groups {
        if g.times.len() != g.events.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "group '{}': times len ({}) != events len ({})",
                g.label,
                g.times.len(),
                g.events.len()
            )));
        }
        if g.times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(format!(
                "group '{}': follow-up times must be non-negative and finite",
                g.label
            )));
        }
    }

    let total_events: usize = groups.iter().map(|g| g.n_events()).sum();
    if total_events == 0 {
        return Err(SurvivalError::InsufficientEvents);
    }

    // Distinct event times across the pooled sample, ascending.
    let mut event_times: Vec<f64> = groups
        .iter()
        .flat_map(|g| {
            g.times
                .iter()
                .zip(g.events.iter())
                .filter_map(|(&t, &e)| if e { Some(t) } else { None })
        })
        .collect();
    event_times.sort_by(|a, b| a.partial_cmp(b).unwrap());
    event_times.dedup();

    let mut observed = vec![0.0; k];
    let mut expected = vec![0.0; k];
    let mut u = Array1::<f64>::zeros(k); // accumulated O - E
    let mut v = Array2::<f64>::zeros((k, k)); // accumulated covariance

    for &t in &event_times {
        let at_risk: Vec<f64> = groups
            .iter()
            .map(|g| g.times.iter().filter(|&&x| x >= t).count() as f64)
            .collect();
        let n: f64 = at_risk.iter().sum();

        let deaths: Vec<f64> = groups
            .iter()
            .map(|g| {
                g.times
                    .iter()
                    .zip(g.events.iter())
                    .filter(|&(&x, &e)| x == t && e)
                    .count() as f64
            })
            .collect();
        let d: f64 = deaths.iter().sum();

        for g in 0..k {
            let e_g = d * at_risk[g] / n;
            observed[g] += deaths[g];
            expected[g] += e_g;
            u[g] += deaths[g] - e_g;
        }

        // Hypergeometric variance of the per-group event count; degenerate
        // when only one subject remains at risk.
        if n > 1.0 {
            let scale = d * (n - d) / (n - 1.0);
            for g in 0..k {
                for h in 0..k {
                    let delta = if g == h { 1.0 } else { 0.0 };
                    v[[g, h]] += scale * (at_risk[g] / n) * (delta - at_risk[h] / n);
                }
            }
        }
    }

    // The k-dimensional system is rank deficient; drop the last group and
    // take the quadratic form over the rest.
    let df = k - 1;
    let u_red = Array1::from_iter(u.iter().take(df).copied());
    let mut v_red = Array2::<f64>::zeros((df, df));
    for g in 0..df {
        for h in 0..df {
            v_red[[g, h]] = v[[g, h]];
        }
    }

    let chi_square = if u_red.iter().all(|&x| x.abs() < 1e-12) {
        0.0
    } else {
        let solved = solve_linear_system(&v_red, &u_red).map_err(|_| {
            SurvivalError::numerical_error("log-rank variance matrix is singular")
        })?;
        u_red.dot(&solved).max(0.0)
    };

    let p_value = chi_square_p_value(chi_square, df)?;

    Ok(LogRankResult {
        chi_square,
        df,
        p_value,
        observed,
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn group(label: &str, times: &[f64], events: &[bool]) -> GroupSurvival {
        GroupSurvival::new(label, times.to_vec(), events.to_vec())
    }

    #[test]
    fn test_identical_groups_give_null_result() {
        let times = [1.0, 2.0, 3.0, 4.0, 5.0];
        let events = [true, true, false, true, false];
        let a = group("a", &times, &events);
        let b = group("b", &times, &events);

        let result = log_rank_test(&[a, b]).unwrap();
        assert_relative_eq!(result.chi_square, 0.0, epsilon = 1e-9);
        assert_relative_eq!(result.p_value, 1.0, epsilon = 1e-9);
        assert_eq!(result.df, 1);
        // perfectly symmetric groups split every expectation evenly
        assert_relative_eq!(result.observed[0], result.expected[0], epsilon = 1e-9);
    }

    #[test]
    fn test_two_group_hand_computed() {
        // group a: events at 1 and 2; group b: event at 3.
        // t=1: n=(2,2), d=1 in a -> E_a = 0.5, V = 1*(2/4)*(2/4)*3/3 = 0.25
        // t=2: n=(1,2), d=1 in a -> E_a = 1/3, V = (1/3)*(2/3)*2/2 = 2/9
        // t=3: n=(0,2), d=1 in b -> E_a = 0,   V = 0 (a empty)... at-risk a = 0
        let a = group("a", &[1.0, 2.0], &[true, true]);
        let b = group("b", &[3.0, 4.0], &[true, false]);

        let result = log_rank_test(&[a, b]).unwrap();
        let o_minus_e: f64 = 2.0 - (0.5 + 1.0 / 3.0);
        let var = 0.25 + 2.0 / 9.0;
        assert_relative_eq!(result.chi_square, o_minus_e * o_minus_e / var, epsilon = 1e-9);
        assert_eq!(result.df, 1);
        assert_relative_eq!(result.observed[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(result.expected[0], 0.5 + 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_three_groups_df() {
        let a = group("a", &[1.0, 4.0, 7.0], &[true, true, false]);
        let b = group("b", &[2.0, 5.0, 8.0], &[true, false, true]);
        let c = group("c", &[3.0, 6.0, 9.0], &[false, true, true]);

        let result = log_rank_test(&[a, b, c]).unwrap();
        assert_eq!(result.df, 2);
        assert!(result.chi_square >= 0.0);
        assert!((0.0..=1.0).contains(&result.p_value));
        assert_eq!(result.observed.len(), 3);
    }

    #[test]
    fn test_all_censored_is_insufficient_events() {
        let a = group("a", &[1.0, 2.0], &[false, false]);
        let b = group("b", &[3.0, 4.0], &[false, false]);

        assert!(matches!(
            log_rank_test(&[a, b]),
            Err(SurvivalError::InsufficientEvents)
        ));
    }

    #[test]
    fn test_single_group_rejected() {
        let a = group("a", &[1.0], &[true]);
        assert!(log_rank_test(&[a]).is_err());
    }
}
