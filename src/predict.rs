use ndarray::{Array1, ArrayView2};

use crate::data::SurvivalData;
use crate::error::{Result, SurvivalError};
use crate::km::{CurvePoint, SurvivalCurve};
use crate::model::CoxFit;

/// Breslow estimate of the cumulative baseline hazard, taken over the
/// training data at the fitted coefficients. The baseline describes a
/// subject with every covariate at its reference value (`x = 0`).
#[derive(Debug, Clone)]
pub struct BaselineHazard {
    times: Vec<f64>,
    cumulative: Vec<f64>,
    at_risk: Vec<usize>,
    events: Vec<usize>,
}

impl BaselineHazard {
    /// `H0(t) = sum over event times t_i <= t of d_i / sum_{j in R(t_i)} exp(x_j'b)`.
    pub fn breslow(data: &SurvivalData, beta: &Array1<f64>) -> Result<Self> {
        let n = data.n_samples();
        let times_view = data.times();
        let events = data.events();
        let x = data.covariates();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| times_view[b].partial_cmp(&times_view[a]).unwrap());

        // Descending sweep accumulating the risk-set denominator, then
        // reverse into ascending order.
        let mut denom = 0.0;
        let mut at_risk_count = 0usize;
        let mut steps: Vec<(f64, f64, usize, usize)> = Vec::new(); // (time, increment, at_risk, events)

        let mut i = 0;
        while i < n {
            let t = times_view[order[i]];
            let mut d = 0usize;
            while i < n && times_view[order[i]] == t {
                let j = order[i];
                let w = x.row(j).dot(beta).exp();
                if !w.is_finite() {
                    return Err(SurvivalError::numerical_error(format!(
                        "exp(x'b) overflowed for subject {}",
                        j
                    )));
                }
                denom += w;
                at_risk_count += 1;
                if events[j] {
                    d += 1;
                }
                i += 1;
            }
            if d > 0 {
                if denom <= 0.0 {
                    return Err(SurvivalError::numerical_error(
                        "risk set denominator is non-positive",
                    ));
                }
                steps.push((t, d as f64 / denom, at_risk_count, d));
            }
        }
        steps.reverse();

        let mut times = Vec::with_capacity(steps.len());
        let mut cumulative = Vec::with_capacity(steps.len());
        let mut at_risk = Vec::with_capacity(steps.len());
        let mut events_out = Vec::with_capacity(steps.len());
        let mut running = 0.0;
        for (t, inc, n_risk, d) in steps {
            running += inc;
            times.push(t);
            cumulative.push(running);
            at_risk.push(n_risk);
            events_out.push(d);
        }

        Ok(Self {
            times,
            cumulative,
            at_risk,
            events: events_out,
        })
    }

    /// Distinct event times the baseline steps at, ascending.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Cumulative hazard at time `t` (0 before the first event).
    pub fn cumulative_hazard_at(&self, t: f64) -> f64 {
        match self.times.iter().rposition(|&x| x <= t) {
            Some(idx) => self.cumulative[idx],
            None => 0.0,
        }
    }

    /// Baseline survival curve `S0 = exp(-H0)`, one step per event time.
    pub fn survival_curve(&self) -> SurvivalCurve {
        self.curve_for_risk(1.0)
    }

    fn curve_for_risk(&self, relative_risk: f64) -> SurvivalCurve {
        let points: Vec<CurvePoint> = self
            .times
            .iter()
            .zip(self.cumulative.iter())
            .zip(self.at_risk.iter().zip(self.events.iter()))
            .map(|((&time, &h0), (&at_risk, &events))| CurvePoint {
                time,
                at_risk,
                events,
                survival: (-h0 * relative_risk).exp(),
                conf: None,
            })
            .collect();

        let n_subjects = self.at_risk.first().copied().unwrap_or(0);
        let n_events = self.events.iter().sum();
        SurvivalCurve {
            label: None,
            points,
            n_subjects,
            n_events,
        }
    }
}

impl CoxFit {
    /// Expand predicted survival curves for a what-if covariate grid.
    ///
    /// Each grid row's curve is `S0(t)^exp(x'b)` over the baseline's event
    /// times. The output vector is index-aligned with the input rows, so the
    /// caller's row identity maps deterministically onto its curve. A
    /// reference row (`x = 0`) reproduces the baseline survival exactly.
    pub fn predict_survival(&self, covariates: ArrayView2<f64>) -> Result<Vec<SurvivalCurve>> {
        let risks = self.relative_risk(covariates)?;
        Ok(risks
            .iter()
            .map(|&rr| self.baseline().curve_for_risk(rr))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CoxModel;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn fitted() -> (SurvivalData, CoxFit) {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let events = vec![true, true, true, true, true, true, false, true];
        let covariates = Array2::from_shape_vec(
            (8, 1),
            vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        )
        .unwrap();
        let data = SurvivalData::new(times, events, covariates, vec!["arm".into()]).unwrap();
        let fit = CoxModel::new().fit(&data).unwrap();
        (data, fit)
    }

    #[test]
    fn test_breslow_baseline_at_beta_zero() {
        // With beta = 0 the Breslow increment at t_i is d_i / n_i, the
        // Nelson-Aalen estimator.
        let times = vec![1.0, 2.0, 3.0, 4.0];
        let events = vec![true, false, true, true];
        let covariates = Array2::zeros((4, 1));
        let data = SurvivalData::new(times, events, covariates, vec!["x".into()]).unwrap();

        let baseline = BaselineHazard::breslow(&data, &Array1::zeros(1)).unwrap();
        assert_eq!(baseline.times(), &[1.0, 3.0, 4.0]);
        assert_relative_eq!(baseline.cumulative_hazard_at(1.0), 1.0 / 4.0, epsilon = 1e-12);
        assert_relative_eq!(
            baseline.cumulative_hazard_at(3.0),
            1.0 / 4.0 + 1.0 / 2.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            baseline.cumulative_hazard_at(10.0),
            1.0 / 4.0 + 1.0 / 2.0 + 1.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(baseline.cumulative_hazard_at(0.5), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_baseline_survival_is_exp_of_negative_hazard() {
        let (_, fit) = fitted();
        let curve = fit.baseline().survival_curve();
        for point in &curve.points {
            let h0 = fit.baseline().cumulative_hazard_at(point.time);
            assert_relative_eq!(point.survival, (-h0).exp(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_reference_row_round_trip() {
        let (_, fit) = fitted();
        let reference = Array2::zeros((1, 1));
        let curves = fit.predict_survival(reference.view()).unwrap();

        let baseline = fit.baseline().survival_curve();
        assert_eq!(curves.len(), 1);
        assert_eq!(curves[0].points.len(), baseline.points.len());
        for (a, b) in curves[0].points.iter().zip(baseline.points.iter()) {
            assert_eq!(a.time, b.time);
            assert_relative_eq!(a.survival, b.survival, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_grid_rows_map_to_curves_in_order() {
        let (_, fit) = fitted();
        let grid = Array2::from_shape_vec((2, 1), vec![0.0, 1.0]).unwrap();
        let curves = fit.predict_survival(grid.view()).unwrap();
        assert_eq!(curves.len(), 2);

        // higher risk -> lower survival at every step, and both curves are
        // powers of the same baseline
        let beta = fit.coefficients()[0];
        let hr = beta.exp();
        for (p0, p1) in curves[0].points.iter().zip(curves[1].points.iter()) {
            assert_relative_eq!(p1.survival, p0.survival.powf(hr), epsilon = 1e-10);
            if beta > 0.0 {
                assert!(p1.survival <= p0.survival + 1e-12);
            }
        }
    }

    #[test]
    fn test_predicted_curves_non_increasing() {
        let (_, fit) = fitted();
        let grid = Array2::from_shape_vec((1, 1), vec![1.0]).unwrap();
        let curves = fit.predict_survival(grid.view()).unwrap();
        let mut prev = 1.0;
        for point in &curves[0].points {
            assert!(point.survival <= prev + 1e-12);
            assert!((0.0..=1.0).contains(&point.survival));
            prev = point.survival;
        }
    }

    #[test]
    fn test_grid_dimension_mismatch() {
        let (_, fit) = fitted();
        let grid = Array2::zeros((1, 3));
        assert!(fit.predict_survival(grid.view()).is_err());
    }
}
