use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::{
    data::SurvivalData,
    error::{Result, SurvivalError},
    newton::maximize_partial_likelihood,
    predict::BaselineHazard,
};

const Z_95: f64 = 1.96;

/// How tied event times enter the partial likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieMethod {
    /// Efron's approximation - the default, matching common implementations.
    #[default]
    Efron,
    /// Breslow's approximation - cruder but cheaper with heavy ties.
    Breslow,
}

/// Cox proportional-hazards model configuration.
#[derive(Debug, Clone)]
pub struct CoxModel {
    max_iterations: usize,
    tolerance: f64,
    ties: TieMethod,
}

impl Default for CoxModel {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
            ties: TieMethod::default(),
        }
    }
}

impl CoxModel {
    /// New model with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Max Newton-Raphson iterations before giving up.
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// How small the log-likelihood change must get to count as converged.
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// Tie-handling method for coincident event times.
    pub fn with_ties(mut self, ties: TieMethod) -> Self {
        self.ties = ties;
        self
    }

    /// Fit the model, producing an immutable [`CoxFit`].
    ///
    /// Running out of iterations surfaces as
    /// [`FitDidNotConverge`](SurvivalError::FitDidNotConverge); a returned
    /// fit is always a converged one.
    pub fn fit(&self, data: &SurvivalData) -> Result<CoxFit> {
        let outcome =
            maximize_partial_likelihood(data, self.ties, self.max_iterations, self.tolerance)?;

        let std_errors = Array1::from_iter(
            (0..data.n_features()).map(|i| outcome.covariance[[i, i]].max(0.0).sqrt()),
        );
        let baseline = BaselineHazard::breslow(data, &outcome.beta)?;

        Ok(CoxFit {
            feature_names: data.feature_names().to_vec(),
            coefficients: outcome.beta,
            covariance: outcome.covariance,
            std_errors,
            log_likelihood: outcome.log_likelihood,
            null_log_likelihood: outcome.null_log_likelihood,
            iterations: outcome.iterations,
            n_samples: data.n_samples(),
            n_events: data.n_events(),
            baseline,
        })
    }
}

/// Per-covariate effect estimate, the input contract for forest plots.
#[derive(Debug, Clone, Serialize)]
pub struct HazardRatio {
    pub name: String,
    pub coefficient: f64,
    pub std_err: f64,
    pub hazard_ratio: f64,
    pub lower: f64,
    pub upper: f64,
    pub p_value: f64,
}

/// A fitted Cox model. Immutable; downstream hazard-ratio and prediction
/// computations only read from it.
#[derive(Debug, Clone)]
pub struct CoxFit {
    feature_names: Vec<String>,
    coefficients: Array1<f64>,
    covariance: Array2<f64>,
    std_errors: Array1<f64>,
    log_likelihood: f64,
    null_log_likelihood: f64,
    iterations: usize,
    n_samples: usize,
    n_events: usize,
    baseline: BaselineHazard,
}

impl CoxFit {
    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    pub fn std_errors(&self) -> ArrayView1<'_, f64> {
        self.std_errors.view()
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn null_log_likelihood(&self) -> f64 {
        self.null_log_likelihood
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Breslow baseline hazard estimated on the training data.
    pub fn baseline(&self) -> &BaselineHazard {
        &self.baseline
    }

    /// Linear predictors `x'b` for a covariate matrix.
    pub fn linear_predictor(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        if covariates.ncols() != self.coefficients.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "feature count mismatch: expected {}, got {}",
                self.coefficients.len(),
                covariates.ncols()
            )));
        }
        Ok(covariates.dot(&self.coefficients))
    }

    /// Relative risks `exp(x'b)` for a covariate matrix.
    pub fn relative_risk(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.linear_predictor(covariates)?.mapv(f64::exp))
    }

    /// Hazard ratio, 95% confidence interval and Wald p-value per covariate.
    pub fn hazard_ratios(&self) -> Result<Vec<HazardRatio>> {
        let wald = ChiSquared::new(1.0)
            .map_err(|e| SurvivalError::numerical_error(format!("chi-square distribution: {}", e)))?;

        self.feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let beta = self.coefficients[i];
                let se = self.std_errors[i];
                let p_value = if se > 0.0 {
                    let stat = (beta / se).powi(2);
                    (1.0 - wald.cdf(stat)).clamp(0.0, 1.0)
                } else {
                    f64::NAN
                };
                Ok(HazardRatio {
                    name: name.clone(),
                    coefficient: beta,
                    std_err: se,
                    hazard_ratio: beta.exp(),
                    lower: (beta - Z_95 * se).exp(),
                    upper: (beta + Z_95 * se).exp(),
                    p_value,
                })
            })
            .collect()
    }

    /// Likelihood-ratio test against the null model:
    /// `(statistic, df, p_value)`.
    pub fn likelihood_ratio_test(&self) -> Result<(f64, usize, f64)> {
        let stat = (2.0 * (self.log_likelihood - self.null_log_likelihood)).max(0.0);
        let df = self.coefficients.len();
        let p = crate::logrank::chi_square_p_value(stat, df)?;
        Ok((stat, df, p))
    }

    /// Harrell's concordance between the fit's risk scores and the data.
    pub fn concordance(&self, data: &SurvivalData) -> Result<f64> {
        let risk_scores = self.linear_predictor(data.covariates())?;
        harrell_c_index(risk_scores.view(), data.times(), data.events())
    }

    /// Summary table in the shape `coxph` reports: one row per covariate
    /// with coefficient, hazard ratio, standard error, CI and p-value.
    pub fn summary(&self) -> Result<CoxSummary> {
        Ok(CoxSummary {
            hazard_ratios: self.hazard_ratios()?,
            log_likelihood: self.log_likelihood,
            likelihood_ratio: self.likelihood_ratio_test()?,
            n_samples: self.n_samples,
            n_events: self.n_events,
            iterations: self.iterations,
        })
    }
}

/// Printable fit summary.
#[derive(Debug, Clone, Serialize)]
pub struct CoxSummary {
    pub hazard_ratios: Vec<HazardRatio>,
    pub log_likelihood: f64,
    /// `(statistic, df, p_value)` of the likelihood-ratio test.
    pub likelihood_ratio: (f64, usize, f64),
    pub n_samples: usize,
    pub n_events: usize,
    pub iterations: usize,
}

impl CoxSummary {
    pub fn print(&self) {
        println!(
            "cox proportional hazards fit  (n = {}, events = {}, {} iterations)",
            self.n_samples, self.n_events, self.iterations
        );
        println!(
            "{:<24} {:>10} {:>10} {:>10} {:>18} {:>10}",
            "covariate", "coef", "HR", "se(coef)", "95% CI", "p"
        );
        println!("{:-<86}", "");
        for hr in &self.hazard_ratios {
            println!(
                "{:<24} {:>10.4} {:>10.4} {:>10.4} {:>8.4}-{:>8.4} {:>10.4}",
                hr.name, hr.coefficient, hr.hazard_ratio, hr.std_err, hr.lower, hr.upper, hr.p_value
            );
        }
        let (stat, df, p) = self.likelihood_ratio;
        println!();
        println!("log partial likelihood: {:.4}", self.log_likelihood);
        println!(
            "likelihood ratio test: {:.2} on {} df, p = {:.4}",
            stat, df, p
        );
    }
}

/// Harrell's C-index with tie handling.
pub fn harrell_c_index(
    risk_scores: ArrayView1<f64>,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    let n = risk_scores.len();
    if n != times.len() || n != events.len() {
        return Err(SurvivalError::invalid_dimensions(
            "risk scores, times, and events must have same length",
        ));
    }

    let mut concordant = 0.0;
    let mut discordant = 0.0;
    let mut tied_risk = 0.0;

    for i in 0..n {
        if !events[i] {
            continue;
        }
        for j in 0..n {
            if i == j {
                continue;
            }
            // j is comparable to i if j outlived i (event or censored)
            if times[j] > times[i] || (!events[j] && times[j] >= times[i]) {
                if risk_scores[i] > risk_scores[j] {
                    concordant += 1.0;
                } else if risk_scores[i] < risk_scores[j] {
                    discordant += 1.0;
                } else {
                    tied_risk += 1.0;
                }
            }
        }
    }

    let total = concordant + discordant + tied_risk;
    if total == 0.0 {
        return Err(SurvivalError::numerical_error(
            "no comparable pairs for concordance",
        ));
    }

    Ok((concordant + 0.5 * tied_risk) / total)
}
