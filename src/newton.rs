use ndarray::{Array1, Array2, Axis};

use crate::data::SurvivalData;
use crate::error::{Result, SurvivalError};
use crate::model::TieMethod;

/// Converged Newton-Raphson state for the Cox partial likelihood.
#[derive(Debug, Clone)]
pub(crate) struct NewtonOutcome {
    pub beta: Array1<f64>,
    /// Inverse of the observed information at the optimum.
    pub covariance: Array2<f64>,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub iterations: usize,
}

/// Maximize the Cox log partial likelihood.
///
/// Second-order Newton steps with step-halving whenever a full step would
/// decrease the likelihood. Convergence is an absolute log-likelihood change
/// below `tolerance`; running out of iterations is a hard
/// [`FitDidNotConverge`](SurvivalError::FitDidNotConverge) carrying the last
/// iterate, never a silent partial result.
pub(crate) fn maximize_partial_likelihood(
    data: &SurvivalData,
    ties: TieMethod,
    max_iterations: usize,
    tolerance: f64,
) -> Result<NewtonOutcome> {
    if data.n_events() == 0 {
        return Err(SurvivalError::InsufficientEvents);
    }

    let n_features = data.n_features();
    let order = descending_time_order(data);

    let mut beta = Array1::<f64>::zeros(n_features);
    let (mut loglik, mut gradient, mut information) = derivatives(data, &order, &beta, ties)?;
    let null_log_likelihood = loglik;

    let mut last_change = f64::INFINITY;

    for iteration in 1..=max_iterations {
        let step = solve_linear_system(&information, &gradient).map_err(|_| {
            SurvivalError::numerical_error(
                "observed information matrix is singular - covariates may be collinear",
            )
        })?;

        // Step-halve until the likelihood stops getting worse.
        let mut accepted = None;
        let mut scale = 1.0;
        for _ in 0..10 {
            let candidate = &beta + &(&step * scale);
            match derivatives(data, &order, &candidate, ties) {
                Ok((ll, g, info)) if ll.is_finite() && ll >= loglik - 1e-12 => {
                    accepted = Some((candidate, ll, g, info));
                    break;
                }
                _ => scale *= 0.5,
            }
        }

        let (candidate, ll, g, info) = accepted.ok_or_else(|| {
            SurvivalError::numerical_error("newton step failed to improve the partial likelihood")
        })?;

        last_change = (ll - loglik).abs();
        beta = candidate;
        loglik = ll;
        gradient = g;
        information = info;

        if last_change < tolerance {
            let covariance = invert(&information).map_err(|_| {
                SurvivalError::numerical_error(
                    "observed information matrix is singular at the optimum",
                )
            })?;
            return Ok(NewtonOutcome {
                beta,
                covariance,
                log_likelihood: loglik,
                null_log_likelihood,
                iterations: iteration,
            });
        }
    }

    Err(SurvivalError::FitDidNotConverge {
        iterations: max_iterations,
        last_change,
        last_coefficients: beta.to_vec(),
    })
}

fn descending_time_order(data: &SurvivalData) -> Vec<usize> {
    let times = data.times();
    let mut order: Vec<usize> = (0..data.n_samples()).collect();
    order.sort_by(|&a, &b| times[b].partial_cmp(&times[a]).unwrap());
    order
}

/// Log partial likelihood with gradient and observed information at `beta`.
///
/// One descending sweep over the subjects: the running sums `s0`, `s1`, `s2`
/// hold the risk-set totals of `exp(x'b)`, its covariate-weighted vector and
/// its outer-product matrix. Tied events at a time are handled as one batch,
/// with Efron's correction subtracting the tied subjects' own contribution in
/// `l/d` fractions (Breslow keeps the full denominator for every tie).
fn derivatives(
    data: &SurvivalData,
    order: &[usize],
    beta: &Array1<f64>,
    ties: TieMethod,
) -> Result<(f64, Array1<f64>, Array2<f64>)> {
    let n = data.n_samples();
    let p = data.n_features();
    let times = data.times();
    let events = data.events();
    let x = data.covariates();

    let mut s0 = 0.0;
    let mut s1 = Array1::<f64>::zeros(p);
    let mut s2 = Array2::<f64>::zeros((p, p));

    let mut loglik = 0.0;
    let mut gradient = Array1::<f64>::zeros(p);
    let mut information = Array2::<f64>::zeros((p, p));

    let mut i = 0;
    while i < n {
        let t = times[order[i]];
        let mut tied_events: Vec<usize> = Vec::new();

        // Everyone with this time enters the risk set before its events are
        // scored, so subjects censored exactly at t still count as at risk.
        while i < n && times[order[i]] == t {
            let j = order[i];
            let row = x.row(j);
            let w = row.dot(beta).exp();
            if !w.is_finite() || w <= 0.0 {
                return Err(SurvivalError::numerical_error(format!(
                    "exp(x'b) overflowed for subject {}",
                    j
                )));
            }
            s0 += w;
            for a in 0..p {
                s1[a] += w * row[a];
                for b in 0..p {
                    s2[[a, b]] += w * row[a] * row[b];
                }
            }
            if events[j] {
                tied_events.push(j);
            }
            i += 1;
        }

        if tied_events.is_empty() {
            continue;
        }

        let d = tied_events.len();
        let mut d0 = 0.0;
        let mut d1 = Array1::<f64>::zeros(p);
        let mut d2 = Array2::<f64>::zeros((p, p));
        for &j in &tied_events {
            let row = x.row(j);
            let w = row.dot(beta).exp();
            d0 += w;
            for a in 0..p {
                d1[a] += w * row[a];
                for b in 0..p {
                    d2[[a, b]] += w * row[a] * row[b];
                }
            }
            loglik += row.dot(beta);
            gradient += &row;
        }

        for l in 0..d {
            let frac = match ties {
                TieMethod::Efron => l as f64 / d as f64,
                TieMethod::Breslow => 0.0,
            };
            let denom = s0 - frac * d0;
            if denom <= 0.0 {
                return Err(SurvivalError::numerical_error(
                    "risk set denominator is non-positive",
                ));
            }
            let z1 = &s1 - &(&d1 * frac);
            let z2 = &s2 - &(&d2 * frac);

            loglik -= denom.ln();
            gradient -= &(&z1 / denom);

            let mean = &z1 / denom;
            let outer = mean
                .view()
                .insert_axis(Axis(1))
                .dot(&mean.view().insert_axis(Axis(0)));
            information += &(&(&z2 / denom) - &outer);
        }
    }

    Ok((loglik, gradient, information))
}

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
pub(crate) fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(SurvivalError::invalid_dimensions(
            "matrix dimensions mismatch",
        ));
    }

    let mut a_copy = a.clone();
    let mut b_copy = b.clone();

    // Forward elimination
    for i in 0..n {
        let mut max_row = i;
        for k in i + 1..n {
            if a_copy[[k, i]].abs() > a_copy[[max_row, i]].abs() {
                max_row = k;
            }
        }

        if a_copy[[max_row, i]].abs() < 1e-12 {
            return Err(SurvivalError::numerical_error("matrix is singular"));
        }

        if max_row != i {
            for j in 0..n {
                let temp = a_copy[[i, j]];
                a_copy[[i, j]] = a_copy[[max_row, j]];
                a_copy[[max_row, j]] = temp;
            }
            b_copy.swap(i, max_row);
        }

        for k in i + 1..n {
            let factor = a_copy[[k, i]] / a_copy[[i, i]];
            for j in i..n {
                a_copy[[k, j]] -= factor * a_copy[[i, j]];
            }
            b_copy[k] -= factor * b_copy[i];
        }
    }

    // Back substitution
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = b_copy[i];
        for j in i + 1..n {
            x[i] -= a_copy[[i, j]] * x[j];
        }
        x[i] /= a_copy[[i, i]];
    }

    Ok(x)
}

/// Invert a square matrix column by column through the linear solver.
pub(crate) fn invert(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    let mut inverse = Array2::zeros((n, n));
    for col in 0..n {
        let mut e = Array1::zeros(n);
        e[col] = 1.0;
        let solved = solve_linear_system(a, &e)?;
        for row in 0..n {
            inverse[[row, col]] = solved[row];
        }
    }
    Ok(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn binary_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let events = vec![true; 6];
        let covariates =
            Array2::from_shape_vec((6, 1), vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]).unwrap();
        SurvivalData::new(times, events, covariates, vec!["arm".into()]).unwrap()
    }

    #[test]
    fn test_solve_linear_system() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve_linear_system(&a, &b).unwrap();
        assert_relative_eq!(x[0], 0.8, epsilon = 1e-10);
        assert_relative_eq!(x[1], 1.4, epsilon = 1e-10);
    }

    #[test]
    fn test_singular_system_rejected() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let b = array![1.0, 2.0];
        assert!(solve_linear_system(&a, &b).is_err());
    }

    #[test]
    fn test_invert_round_trip() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let inv = invert(&a).unwrap();
        let product = a.dot(&inv);
        assert_relative_eq!(product[[0, 0]], 1.0, epsilon = 1e-10);
        assert_relative_eq!(product[[0, 1]], 0.0, epsilon = 1e-10);
        assert_relative_eq!(product[[1, 0]], 0.0, epsilon = 1e-10);
        assert_relative_eq!(product[[1, 1]], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_score_at_zero_matches_observed_minus_expected() {
        // At beta = 0 the partial-likelihood score of a binary covariate is
        // exactly the log-rank O - E for the x = 1 group.
        let data = binary_data();
        let order = descending_time_order(&data);
        let beta = Array1::zeros(1);
        let (_, gradient, _) = derivatives(&data, &order, &beta, TieMethod::Efron).unwrap();

        // events at t=1..6, alternating x=0/1; risk sets shrink by one.
        // O_1 = 3; E_1 = 3/6 + 3/5 + 2/4 + 2/3 + 1/2 + 1/1
        let expected = 3.0 / 6.0 + 3.0 / 5.0 + 2.0 / 4.0 + 2.0 / 3.0 + 1.0 / 2.0 + 1.0;
        assert_relative_eq!(gradient[0], 3.0 - expected, epsilon = 1e-10);
    }

    #[test]
    fn test_efron_equals_breslow_without_ties() {
        let data = binary_data();
        let efron = maximize_partial_likelihood(&data, TieMethod::Efron, 100, 1e-10).unwrap();
        let breslow = maximize_partial_likelihood(&data, TieMethod::Breslow, 100, 1e-10).unwrap();
        assert_relative_eq!(efron.beta[0], breslow.beta[0], epsilon = 1e-6);
        assert_relative_eq!(
            efron.log_likelihood,
            breslow.log_likelihood,
            epsilon = 1e-8
        );
    }

    #[test]
    fn test_likelihood_improves_over_null() {
        let data = binary_data();
        let outcome = maximize_partial_likelihood(&data, TieMethod::Efron, 100, 1e-10).unwrap();
        assert!(outcome.log_likelihood >= outcome.null_log_likelihood);
        assert!(outcome.covariance[[0, 0]] > 0.0);
        assert!(outcome.iterations >= 1);
    }

    #[test]
    fn test_iteration_cap_is_reported() {
        let data = binary_data();
        let err = maximize_partial_likelihood(&data, TieMethod::Efron, 1, 1e-15).unwrap_err();
        match err {
            SurvivalError::FitDidNotConverge {
                iterations,
                last_change,
                last_coefficients,
            } => {
                assert_eq!(iterations, 1);
                assert!(last_change > 1e-15);
                assert_eq!(last_coefficients.len(), 1);
            }
            other => panic!("expected FitDidNotConverge, got {:?}", other),
        }
    }

    #[test]
    fn test_no_events_is_insufficient() {
        let covariates = Array2::zeros((3, 1));
        let data = SurvivalData::new(
            vec![1.0, 2.0, 3.0],
            vec![false, false, false],
            covariates,
            vec!["x".into()],
        )
        .unwrap();
        assert!(matches!(
            maximize_partial_likelihood(&data, TieMethod::Efron, 50, 1e-8),
            Err(SurvivalError::InsufficientEvents)
        ));
    }
}
