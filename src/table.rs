use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::error::{Result, SurvivalError};

/// Event/censoring indicator, decided once at the ingestion boundary.
///
/// The raw files encode status as free-form strings; rather than guessing
/// from prefixes, only the tokens below are accepted. Anything else rejects
/// the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventStatus {
    /// The event was observed at the recorded time.
    Observed,
    /// The subject was right-censored at the recorded time.
    Censored,
}

impl EventStatus {
    /// Parse a raw status token. Case-insensitive, surrounding whitespace
    /// and quotes ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim().trim_matches('"').to_ascii_lowercase();
        match token.as_str() {
            "1" | "dead" | "deceased" | "event" | "yes" | "true" => Some(Self::Observed),
            "0" | "alive" | "censored" | "no" | "false" => Some(Self::Censored),
            _ => None,
        }
    }

    pub fn is_event(self) -> bool {
        matches!(self, Self::Observed)
    }
}

/// One observed unit: identifier, follow-up time, event indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: String,
    pub time: f64,
    pub status: EventStatus,
}

/// A row dropped during subject extraction, with the reason it was dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub row: usize,
    pub reason: String,
}

/// In-memory delimited table with normalized column names.
#[derive(Debug, Clone)]
pub struct ClinicalTable {
    headers: Vec<String>,
    records: Vec<Vec<String>>,
}

/// Normalize a raw header to the internal naming convention: lowercase,
/// punctuation runs collapsed to a single underscore, no leading/trailing
/// underscores. `"Overall Survival (Months)"` becomes `overall_survival_months`.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

impl ClinicalTable {
    /// Read a delimited text file with a header row.
    pub fn from_path<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)?;

        let headers: Vec<String> = rdr.headers()?.iter().map(normalize_header).collect();

        let mut records = Vec::new();
        for (idx, result) in rdr.records().enumerate() {
            let record = result?;
            if record.len() != headers.len() {
                return Err(SurvivalError::malformed_record(
                    idx,
                    format!("expected {} fields, got {}", headers.len(), record.len()),
                ));
            }
            records.push(record.iter().map(|s| s.trim().to_string()).collect());
        }

        log::info!("loaded table: {} rows, {} columns", records.len(), headers.len());
        Ok(Self { headers, records })
    }

    /// Build a table directly from normalized headers and records.
    pub fn from_parts(headers: Vec<String>, records: Vec<Vec<String>>) -> Result<Self> {
        for (idx, record) in records.iter().enumerate() {
            if record.len() != headers.len() {
                return Err(SurvivalError::malformed_record(
                    idx,
                    format!("expected {} fields, got {}", headers.len(), record.len()),
                ));
            }
        }
        Ok(Self { headers, records })
    }

    pub fn n_rows(&self) -> usize {
        self.records.len()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| SurvivalError::unknown_column(name))
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&str>> {
        let idx = self.column_index(name)?;
        Ok(self.records.iter().map(|r| r[idx].as_str()).collect())
    }

    /// A new table keeping only the given rows, in the given order. Used to
    /// keep covariate rows aligned with the subjects that survived
    /// extraction.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        let records = rows
            .iter()
            .map(|&r| {
                self.records.get(r).cloned().ok_or_else(|| {
                    SurvivalError::invalid_dimensions(format!(
                        "row index {} out of bounds for {} rows",
                        r,
                        self.records.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            headers: self.headers.clone(),
            records,
        })
    }

    /// Distinct values of a key column, for cohort membership lookup.
    pub fn key_set(&self, name: &str) -> Result<HashSet<String>> {
        let idx = self.column_index(name)?;
        Ok(self
            .records
            .iter()
            .map(|r| r[idx].clone())
            .filter(|v| !v.is_empty())
            .collect())
    }
}

/// Pull `(id, time, status)` triples out of a table.
///
/// Rows with a missing or unparseable time or status are rejected and
/// returned alongside the accepted subjects, each with its row index and the
/// reason. Nothing is imputed.
pub fn extract_subjects(
    table: &ClinicalTable,
    id_col: &str,
    time_col: &str,
    status_col: &str,
) -> Result<(Vec<Subject>, Vec<RejectedRow>)> {
    let ids = table.column(id_col)?;
    let times = table.column(time_col)?;
    let statuses = table.column(status_col)?;

    let mut subjects = Vec::with_capacity(table.n_rows());
    let mut rejected = Vec::new();

    for row in 0..table.n_rows() {
        let raw_time = times[row].trim_matches('"');
        let time = match raw_time.parse::<f64>() {
            Ok(t) if t.is_finite() && t >= 0.0 => t,
            Ok(t) => {
                rejected.push(RejectedRow {
                    row,
                    reason: format!("time must be a finite non-negative number, got {}", t),
                });
                continue;
            }
            Err(_) => {
                rejected.push(RejectedRow {
                    row,
                    reason: format!("cannot parse time value '{}'", raw_time),
                });
                continue;
            }
        };

        let status = match EventStatus::parse(statuses[row]) {
            Some(s) => s,
            None => {
                rejected.push(RejectedRow {
                    row,
                    reason: format!("unrecognized status value '{}'", statuses[row]),
                });
                continue;
            }
        };

        subjects.push(Subject {
            id: ids[row].to_string(),
            time,
            status,
        });
    }

    for r in &rejected {
        log::warn!("rejected row {}: {}", r.row, r.reason);
    }

    Ok((subjects, rejected))
}
