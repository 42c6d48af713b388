use serde::Serialize;

use crate::error::{Result, SurvivalError};

const Z_95: f64 = 1.96;

/// Greenwood confidence interval around a survival estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub std_err: f64,
}

/// One step of a survival curve, at a distinct event time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurvePoint {
    pub time: f64,
    pub at_risk: usize,
    pub events: usize,
    pub survival: f64,
    /// Absent for predicted curves, and once the estimate reaches zero.
    pub conf: Option<ConfidenceInterval>,
}

/// A non-increasing step function over the distinct observed event times of
/// one group. Survival is 1.0 before the first point; between points it holds
/// the value of the latest step at or before the query time.
#[derive(Debug, Clone, Serialize)]
pub struct SurvivalCurve {
    pub label: Option<String>,
    pub points: Vec<CurvePoint>,
    pub n_subjects: usize,
    pub n_events: usize,
}

impl SurvivalCurve {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Survival probability at time `t`.
    pub fn survival_at(&self, t: f64) -> f64 {
        self.points
            .iter()
            .take_while(|p| p.time <= t)
            .last()
            .map(|p| p.survival)
            .unwrap_or(1.0)
    }

    /// Median survival time: the earliest event time where the estimate
    /// drops to 0.5 or below. `None` means the median was not reached -
    /// routine for lightly-evented groups, not an error.
    pub fn median(&self) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.survival <= 0.5)
            .map(|p| p.time)
    }
}

/// Fit a Kaplan-Meier survival curve to one group.
///
/// Distinct event times are walked in ascending order; at each time `t` with
/// `d` events out of `n` still at risk the running estimate is multiplied by
/// `1 - d/n`. Tied events collapse into a single batch step. Censored
/// subjects leave the risk set at their censoring time without producing a
/// step. Variance follows Greenwood's formula, with the interval computed on
/// the log scale and the upper bound clamped to 1.
///
/// A group with no events at all yields a valid flat curve at 1.0 with an
/// empty step list.
pub fn kaplan_meier(times: &[f64], events: &[bool]) -> Result<SurvivalCurve> {
    if times.len() != events.len() {
        return Err(SurvivalError::invalid_dimensions(format!(
            "times len ({}) != events len ({})",
            times.len(),
            events.len()
        )));
    }
    if times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
        return Err(SurvivalError::invalid_survival_data(
            "follow-up times must be non-negative and finite",
        ));
    }

    let n_subjects = times.len();
    let n_events = events.iter().filter(|&&e| e).count();

    // Sort observations once; ties share a position.
    let mut order: Vec<usize> = (0..n_subjects).collect();
    order.sort_by(|&a, &b| times[a].partial_cmp(&times[b]).unwrap());

    let mut points = Vec::new();
    let mut survival = 1.0;
    let mut greenwood_sum = 0.0; // sum of d / (n * (n - d))
    let mut at_risk = n_subjects;

    let mut i = 0;
    while i < n_subjects {
        let t = times[order[i]];
        let mut d = 0usize; // events at t
        let mut removed = 0usize; // everyone leaving the risk set at t
        while i < n_subjects && times[order[i]] == t {
            if events[order[i]] {
                d += 1;
            }
            removed += 1;
            i += 1;
        }

        if d > 0 {
            let n = at_risk as f64;
            survival *= 1.0 - d as f64 / n;

            let conf = if d == at_risk {
                // curve hits zero; the Greenwood variance is undefined there
                survival = 0.0;
                None
            } else {
                greenwood_sum += d as f64 / (n * (n - d as f64));
                let se_log = greenwood_sum.sqrt();
                Some(ConfidenceInterval {
                    lower: survival * (-Z_95 * se_log).exp(),
                    upper: (survival * (Z_95 * se_log).exp()).min(1.0),
                    std_err: survival * se_log,
                })
            };

            points.push(CurvePoint {
                time: t,
                at_risk,
                events: d,
                survival,
                conf,
            });
        }

        at_risk -= removed;
    }

    Ok(SurvivalCurve {
        label: None,
        points,
        n_subjects,
        n_events,
    })
}
