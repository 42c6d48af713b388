use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;

use kmcox::{
    extract_subjects, group_by_label, kaplan_meier, label_members, log_rank_test,
    normalize_header, ClinicalTable, CoxModel, CoxSummary, Covariate, DesignMatrix, Factor,
    GroupSurvival, LogRankResult, SurvivalCurve, SurvivalData, TieMethod,
};

/// Kaplan-Meier curves, log-rank tests and Cox regression over a delimited
/// clinical table.
#[derive(Parser, Debug)]
#[command(name = "kmcox", version, about)]
struct Opts {
    /// Clinical table (delimited text with a header row)
    #[arg(short, long)]
    file: PathBuf,

    /// Field delimiter ("\t" or "," etc.)
    #[arg(long, default_value = "\t")]
    delimiter: String,

    /// Column holding the subject identifier
    #[arg(long, default_value = "patient_id")]
    id_col: String,

    /// Column holding the follow-up time
    #[arg(long)]
    time_col: String,

    /// Column holding the event/censoring status
    #[arg(long)]
    status_col: String,

    /// Second table whose key column defines cohort membership
    #[arg(long)]
    cohort_file: Option<PathBuf>,

    /// Key column in the cohort file, matched against subject ids
    #[arg(long, default_value = "patient_id")]
    cohort_key_col: String,

    /// Label for subjects present in the cohort file
    #[arg(long, default_value = "mutant")]
    cohort_label: String,

    /// Label for everyone else
    #[arg(long, default_value = "control")]
    control_label: String,

    /// Numeric covariate columns for the Cox model
    #[arg(long = "covariate")]
    covariates: Vec<String>,

    /// Categorical covariate columns, dummy-encoded against a reference level
    #[arg(long = "categorical")]
    categorical: Vec<String>,

    /// Reference level override, as column=level (repeatable)
    #[arg(long = "reference")]
    references: Vec<String>,

    /// Tie handling in the partial likelihood: efron or breslow
    #[arg(long, default_value = "efron")]
    ties: String,

    /// Newton-Raphson iteration cap
    #[arg(long, default_value_t = 100)]
    max_iterations: usize,

    /// Convergence tolerance on the log-likelihood change
    #[arg(long, default_value_t = 1e-9)]
    tolerance: f64,

    /// Write per-group survival curves as CSV
    #[arg(long)]
    curves_out: Option<PathBuf>,

    /// Write the full report as JSON
    #[arg(long)]
    json_out: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Report {
    groups: Vec<GroupReport>,
    log_rank: Option<LogRankResult>,
    cox: Option<CoxSummary>,
}

#[derive(Debug, Serialize)]
struct GroupReport {
    label: String,
    n_subjects: usize,
    n_events: usize,
    median: Option<f64>,
    curve: SurvivalCurve,
}

fn parse_delimiter(raw: &str) -> anyhow::Result<u8> {
    let unescaped = match raw {
        "\\t" => "\t",
        other => other,
    };
    match unescaped.as_bytes() {
        [b] => Ok(*b),
        _ => bail!("delimiter must be a single byte, got '{}'", raw),
    }
}

fn parse_ties(raw: &str) -> anyhow::Result<TieMethod> {
    match raw.to_ascii_lowercase().as_str() {
        "efron" => Ok(TieMethod::Efron),
        "breslow" => Ok(TieMethod::Breslow),
        other => bail!("unknown tie method '{}' (expected efron or breslow)", other),
    }
}

fn reference_overrides(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    raw.iter()
        .map(|r| match r.split_once('=') {
            Some((col, level)) => Ok((normalize_header(col), level.to_string())),
            None => bail!("--reference must look like column=level, got '{}'", r),
        })
        .collect()
}

fn print_curve(curve: &SurvivalCurve, label: &str) {
    println!(
        "\n{}  (n = {}, events = {})",
        label, curve.n_subjects, curve.n_events
    );
    println!(
        "{:>10} {:>8} {:>8} {:>10} {:>22}",
        "time", "at_risk", "events", "survival", "95% CI"
    );
    for p in &curve.points {
        let ci = match &p.conf {
            Some(c) => format!("{:>10.4}-{:<10.4}", c.lower, c.upper),
            None => format!("{:>21}", "-"),
        };
        println!(
            "{:>10.3} {:>8} {:>8} {:>10.4} {:>22}",
            p.time, p.at_risk, p.events, p.survival, ci
        );
    }
    match curve.median() {
        Some(m) => println!("median survival: {:.3}", m),
        None => println!("median survival: not reached"),
    }
}

fn write_curves_csv(path: &PathBuf, groups: &[GroupReport]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    wtr.write_record([
        "group", "time", "at_risk", "events", "survival", "lower", "upper",
    ])?;
    for g in groups {
        for p in &g.curve.points {
            let (lower, upper) = match &p.conf {
                Some(c) => (c.lower.to_string(), c.upper.to_string()),
                None => (String::new(), String::new()),
            };
            wtr.write_record([
                g.label.as_str(),
                &p.time.to_string(),
                &p.at_risk.to_string(),
                &p.events.to_string(),
                &p.survival.to_string(),
                &lower,
                &upper,
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    let delimiter = parse_delimiter(&opts.delimiter)?;
    let ties = parse_ties(&opts.ties)?;
    let id_col = normalize_header(&opts.id_col);
    let time_col = normalize_header(&opts.time_col);
    let status_col = normalize_header(&opts.status_col);

    let table = ClinicalTable::from_path(&opts.file, delimiter)
        .with_context(|| format!("cannot load {}", opts.file.display()))?;
    let (subjects, rejected) = extract_subjects(&table, &id_col, &time_col, &status_col)?;
    if !rejected.is_empty() {
        eprintln!(
            "warning: dropped {} of {} rows (see log for details)",
            rejected.len(),
            table.n_rows()
        );
    }
    if subjects.is_empty() {
        bail!("no usable rows in {}", opts.file.display());
    }

    // Rows that survived extraction, for covariate alignment below.
    let dropped: HashSet<usize> = rejected.iter().map(|r| r.row).collect();
    let kept_rows: Vec<usize> = (0..table.n_rows()).filter(|r| !dropped.contains(r)).collect();

    // Cohort labels come from a membership key set when a cohort file is
    // given; otherwise the whole sample is one group.
    let labels = match &opts.cohort_file {
        Some(path) => {
            let cohort = ClinicalTable::from_path(path, delimiter)
                .with_context(|| format!("cannot load {}", path.display()))?;
            let members = cohort.key_set(&normalize_header(&opts.cohort_key_col))?;
            label_members(&subjects, &members, &opts.cohort_label, &opts.control_label)
        }
        None => vec![opts.control_label.clone(); subjects.len()],
    };

    let groups: Vec<GroupSurvival> = group_by_label(&subjects, &labels);
    let mut group_reports = Vec::with_capacity(groups.len());
    for g in &groups {
        let curve = kaplan_meier(&g.times, &g.events)?.with_label(&g.label);
        print_curve(&curve, &g.label);
        group_reports.push(GroupReport {
            label: g.label.clone(),
            n_subjects: g.n_subjects(),
            n_events: g.n_events(),
            median: curve.median(),
            curve,
        });
    }

    let log_rank = if groups.len() >= 2 {
        let result = log_rank_test(&groups)?;
        println!(
            "\nlog-rank test: chi-square = {:.4} on {} df, p = {:.4}",
            result.chi_square, result.df, result.p_value
        );
        Some(result)
    } else {
        None
    };

    let cox = if !opts.covariates.is_empty() || !opts.categorical.is_empty() {
        let sub = table.select_rows(&kept_rows)?;
        let refs = reference_overrides(&opts.references)?;

        let mut terms: Vec<Covariate> = opts
            .covariates
            .iter()
            .map(|c| Covariate::Numeric(normalize_header(c)))
            .collect();
        for col in &opts.categorical {
            let col = normalize_header(col);
            let mut factor = Factor::from_values(&col, &sub.column(&col)?)?;
            if let Some((_, level)) = refs.iter().find(|(c, _)| c == &col) {
                factor = factor.with_reference(level)?;
            }
            terms.push(Covariate::Categorical(factor));
        }

        let design = DesignMatrix::build(&sub, &terms)?;
        let data = SurvivalData::from_subjects(&subjects, design)?;
        let fit = CoxModel::new()
            .with_max_iterations(opts.max_iterations)
            .with_tolerance(opts.tolerance)
            .with_ties(ties)
            .fit(&data)?;

        let summary = fit.summary()?;
        println!();
        summary.print();
        println!("concordance: {:.4}", fit.concordance(&data)?);
        Some(summary)
    } else {
        None
    };

    if let Some(path) = &opts.curves_out {
        write_curves_csv(path, &group_reports)?;
        println!("\nwrote curves to {}", path.display());
    }

    if let Some(path) = &opts.json_out {
        let report = Report {
            groups: group_reports,
            log_rank,
            cox,
        };
        let mut out = File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        out.write_all(serde_json::to_string_pretty(&report)?.as_bytes())?;
        println!("wrote report to {}", path.display());
    }

    Ok(())
}
