//! # kmcox
//!
//! survival analysis for clinical cohorts - kaplan-meier curves, log-rank
//! tests and cox proportional hazards in one pipeline
//!
//! ## what you get
//!
//! - delimited-table ingestion with per-row validation
//! - cohort labelling from a membership key set
//! - kaplan-meier curves w/ greenwood confidence intervals and medians
//! - k-sample log-rank test
//! - cox regression (newton-raphson, efron or breslow ties)
//! - breslow baseline hazard + predicted curves for what-if covariate grids
//!
//! ## quick start
//!
//! ```rust
//! use kmcox::{kaplan_meier, log_rank_test, CoxModel, GroupSurvival, SurvivalData};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let events = vec![true, true, true, true, true, true];
//! let arm = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
//!
//! // per-arm kaplan-meier and a log-rank comparison
//! let control = GroupSurvival::new("control", vec![1.0, 3.0, 5.0], vec![true; 3]);
//! let treated = GroupSurvival::new("treated", vec![2.0, 4.0, 6.0], vec![true; 3]);
//! let curve = kaplan_meier(&control.times, &control.events)?;
//! assert!(curve.median().is_some());
//! let test = log_rank_test(&[control, treated])?;
//! assert_eq!(test.df, 1);
//!
//! // cox regression on the pooled sample
//! let covariates = Array2::from_shape_vec((6, 1), arm)?;
//! let data = SurvivalData::new(times, events, covariates, vec!["arm".into()])?;
//! let fit = CoxModel::new().fit(&data)?;
//! let ratios = fit.hazard_ratios()?;
//! assert_eq!(ratios[0].name, "arm");
//! # Ok(())
//! # }
//! ```

pub mod cohort;
pub mod data;
pub mod encoding;
pub mod error;
pub mod km;
pub mod logrank;
pub mod model;
mod newton;
pub mod predict;
pub mod table;

pub use cohort::{group_by_label, label_members, GroupSurvival};
pub use data::SurvivalData;
pub use encoding::{Covariate, DesignMatrix, Factor};
pub use error::{Result, SurvivalError};
pub use km::{kaplan_meier, ConfidenceInterval, CurvePoint, SurvivalCurve};
pub use logrank::{log_rank_test, LogRankResult};
pub use model::{harrell_c_index, CoxFit, CoxModel, CoxSummary, HazardRatio, TieMethod};
pub use predict::BaselineHazard;
pub use table::{
    extract_subjects, normalize_header, ClinicalTable, EventStatus, RejectedRow, Subject,
};

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_basic_functionality() {
        let n_samples = 100;
        let n_features = 5;

        let times = vec![1.0; n_samples];
        let events = vec![true; n_samples];
        let covariates = Array2::zeros((n_samples, n_features));

        let data = SurvivalData::new(
            times,
            events,
            covariates,
            (0..n_features).map(|i| format!("x{}", i)).collect(),
        )
        .unwrap();
        assert_eq!(data.n_samples(), n_samples);
        assert_eq!(data.n_features(), n_features);
    }
}
