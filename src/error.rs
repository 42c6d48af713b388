use thiserror::Error;

pub type Result<T> = std::result::Result<T, SurvivalError>;

#[derive(Error, Debug)]
pub enum SurvivalError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },

    #[error("survival data is broken: {message}")]
    InvalidSurvivalData { message: String },

    #[error("malformed record at row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },

    #[error("no column named '{name}' in the table")]
    UnknownColumn { name: String },

    #[error("level '{level}' of covariate '{column}' was not seen at fit time")]
    UnknownCovariateLevel { column: String, level: String },

    #[error("no events observed - nothing to estimate")]
    InsufficientEvents,

    #[error("cox fit did not converge after {iterations} iterations (last log-likelihood change {last_change:.3e})")]
    FitDidNotConverge {
        iterations: usize,
        last_change: f64,
        last_coefficients: Vec<f64>,
    },

    #[error("numerical issues: {message}")]
    NumericalError { message: String },
}

impl SurvivalError {
    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }

    pub fn invalid_survival_data(message: impl Into<String>) -> Self {
        Self::InvalidSurvivalData { message: message.into() }
    }

    pub fn malformed_record(row: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord { row, reason: reason.into() }
    }

    pub fn unknown_column(name: impl Into<String>) -> Self {
        Self::UnknownColumn { name: name.into() }
    }

    pub fn unknown_level(column: impl Into<String>, level: impl Into<String>) -> Self {
        Self::UnknownCovariateLevel {
            column: column.into(),
            level: level.into(),
        }
    }

    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError { message: message.into() }
    }
}
