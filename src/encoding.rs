use ndarray::{Array1, Array2};

use crate::error::{Result, SurvivalError};
use crate::table::ClinicalTable;

/// An immutable categorical encoding table: the ordered level set of one
/// column plus an explicit reference level. Built once from the training
/// data and passed unchanged between pipeline stages, so fit-time and
/// predict-time encodings can never drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    name: String,
    levels: Vec<String>,
    reference: usize,
}

impl Factor {
    /// Collect levels from observed values, in first-appearance order.
    /// The first observed level becomes the reference until
    /// [`with_reference`](Self::with_reference) says otherwise.
    pub fn from_values<S: AsRef<str>>(name: impl Into<String>, values: &[S]) -> Result<Self> {
        let name = name.into();
        let mut levels: Vec<String> = Vec::new();
        for v in values {
            let v = v.as_ref().trim();
            if v.is_empty() {
                return Err(SurvivalError::invalid_survival_data(format!(
                    "empty value in categorical column '{}'",
                    name
                )));
            }
            if !levels.iter().any(|l| l == v) {
                levels.push(v.to_string());
            }
        }
        if levels.len() < 2 {
            return Err(SurvivalError::invalid_survival_data(format!(
                "categorical column '{}' needs at least two levels, found {}",
                name,
                levels.len()
            )));
        }
        Ok(Self {
            name,
            levels,
            reference: 0,
        })
    }

    /// Pick the reference level explicitly.
    pub fn with_reference(mut self, level: &str) -> Result<Self> {
        match self.levels.iter().position(|l| l == level) {
            Some(idx) => {
                self.reference = idx;
                Ok(self)
            }
            None => Err(SurvivalError::unknown_level(self.name.clone(), level)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn reference(&self) -> &str {
        &self.levels[self.reference]
    }

    /// Non-reference levels, in level order. One dummy column per entry.
    fn dummy_levels(&self) -> impl Iterator<Item = &String> {
        self.levels
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.reference)
            .map(|(_, l)| l)
    }

    /// Design-matrix column names, `column_level` style.
    pub fn dummy_names(&self) -> Vec<String> {
        self.dummy_levels()
            .map(|l| format!("{}_{}", self.name, l))
            .collect()
    }

    /// One-hot encode a single value against the reference level.
    /// The reference encodes as all zeros; a level unseen at fit time is an
    /// [`UnknownCovariateLevel`](SurvivalError::UnknownCovariateLevel) error,
    /// never a silent coercion.
    pub fn encode(&self, value: &str) -> Result<Vec<f64>> {
        let value = value.trim();
        if !self.levels.iter().any(|l| l == value) {
            return Err(SurvivalError::unknown_level(self.name.clone(), value));
        }
        Ok(self
            .dummy_levels()
            .map(|l| if l == value { 1.0 } else { 0.0 })
            .collect())
    }
}

/// A model term: a numeric column used as-is, or a categorical column
/// dummy-encoded through its [`Factor`].
#[derive(Debug, Clone)]
pub enum Covariate {
    Numeric(String),
    Categorical(Factor),
}

impl Covariate {
    fn column_names(&self) -> Vec<String> {
        match self {
            Covariate::Numeric(name) => vec![name.clone()],
            Covariate::Categorical(factor) => factor.dummy_names(),
        }
    }

    fn width(&self) -> usize {
        match self {
            Covariate::Numeric(_) => 1,
            Covariate::Categorical(factor) => factor.levels().len() - 1,
        }
    }
}

/// A dense design matrix with named columns, ready for the Cox fitter.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

impl DesignMatrix {
    /// Encode the given terms over every row of a table.
    ///
    /// Numeric cells that fail to parse reject with the row index; no value
    /// is imputed.
    pub fn build(table: &ClinicalTable, terms: &[Covariate]) -> Result<Self> {
        let names: Vec<String> = terms.iter().flat_map(|t| t.column_names()).collect();
        let width: usize = terms.iter().map(|t| t.width()).sum();
        let n_rows = table.n_rows();

        let columns: Vec<Vec<&str>> = terms
            .iter()
            .map(|t| {
                let col = match t {
                    Covariate::Numeric(name) => name.as_str(),
                    Covariate::Categorical(factor) => factor.name(),
                };
                table.column(col)
            })
            .collect::<Result<_>>()?;

        let mut values = Array2::zeros((n_rows, width));
        for row in 0..n_rows {
            let mut j = 0;
            for (term, col) in terms.iter().zip(columns.iter()) {
                match term {
                    Covariate::Numeric(name) => {
                        let raw = col[row].trim_matches('"');
                        let parsed = raw.parse::<f64>().map_err(|_| {
                            SurvivalError::malformed_record(
                                row,
                                format!("cannot parse '{}' in numeric column '{}'", raw, name),
                            )
                        })?;
                        if !parsed.is_finite() {
                            return Err(SurvivalError::malformed_record(
                                row,
                                format!("non-finite value in numeric column '{}'", name),
                            ));
                        }
                        values[[row, j]] = parsed;
                        j += 1;
                    }
                    Covariate::Categorical(factor) => {
                        for v in factor.encode(col[row])? {
                            values[[row, j]] = v;
                            j += 1;
                        }
                    }
                }
            }
        }

        Ok(Self { names, values })
    }

    /// Encode one what-if grid row: one raw value per term, in term order.
    /// Used to expand prediction grids against a fitted model's encoding.
    pub fn encode_grid_row(terms: &[Covariate], raw: &[&str]) -> Result<Array1<f64>> {
        if raw.len() != terms.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "grid row has {} values but the model has {} terms",
                raw.len(),
                terms.len()
            )));
        }
        let mut out = Vec::new();
        for (term, value) in terms.iter().zip(raw.iter()) {
            match term {
                Covariate::Numeric(name) => {
                    let parsed = value.trim().parse::<f64>().map_err(|_| {
                        SurvivalError::invalid_survival_data(format!(
                            "cannot parse '{}' for numeric term '{}'",
                            value, name
                        ))
                    })?;
                    out.push(parsed);
                }
                Covariate::Categorical(factor) => out.extend(factor.encode(value)?),
            }
        }
        Ok(Array1::from(out))
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }
}
