use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::encoding::DesignMatrix;
use crate::error::{Result, SurvivalError};
use crate::table::Subject;

/// Survival data - follow-up times, event indicators, and covariates.
/// Validated on construction and immutable afterwards.
#[derive(Debug, Clone)]
pub struct SurvivalData {
    times: Array1<f64>,          // time to event/censoring
    events: Vec<bool>,           // true = event, false = censored
    covariates: Array2<f64>,     // design matrix (n_samples x n_features)
    feature_names: Vec<String>,  // one name per design column
}

impl SurvivalData {
    /// Build survival data from raw vecs/arrays.
    pub fn new(
        times: Vec<f64>,
        events: Vec<bool>,
        covariates: Array2<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        let n_samples = times.len();

        if events.len() != n_samples {
            return Err(SurvivalError::invalid_dimensions(format!(
                "times len ({}) != events len ({})",
                n_samples,
                events.len()
            )));
        }

        if covariates.nrows() != n_samples {
            return Err(SurvivalError::invalid_dimensions(format!(
                "covariates rows ({}) != n_samples ({})",
                covariates.nrows(),
                n_samples
            )));
        }

        if feature_names.len() != covariates.ncols() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "{} feature names for {} design columns",
                feature_names.len(),
                covariates.ncols()
            )));
        }

        if times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "follow-up times must be non-negative and finite",
            ));
        }

        if covariates.iter().any(|v| !v.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "covariates must be finite",
            ));
        }

        Ok(Self {
            times: Array1::from(times),
            events,
            covariates,
            feature_names,
        })
    }

    /// Combine extracted subjects with an encoded design matrix.
    pub fn from_subjects(subjects: &[Subject], design: DesignMatrix) -> Result<Self> {
        if design.n_rows() != subjects.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "design matrix has {} rows for {} subjects",
                design.n_rows(),
                subjects.len()
            )));
        }
        Self::new(
            subjects.iter().map(|s| s.time).collect(),
            subjects.iter().map(|s| s.status.is_event()).collect(),
            design.values,
            design.names,
        )
    }

    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn events(&self) -> &[bool] {
        &self.events
    }

    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Distinct event times, ascending.
    pub fn event_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .times
            .iter()
            .zip(self.events.iter())
            .filter_map(|(time, event)| if *event { Some(*time) } else { None })
            .collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap());
        times.dedup();
        times
    }

    /// Grab a subset of subjects by row indices.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_samples()) {
            return Err(SurvivalError::invalid_dimensions(
                "subset index out of bounds",
            ));
        }

        let times: Vec<f64> = indices.iter().map(|&i| self.times[i]).collect();
        let events: Vec<bool> = indices.iter().map(|&i| self.events[i]).collect();
        let covariates = self.covariates.select(ndarray::Axis(0), indices);

        Self::new(times, events, covariates, self.feature_names.clone())
    }
}
