/*!

Aggregating and exporting trial results.

`summarize` reduces the completed trials of a run to one row per step holding the mean and a
quantile band of each headline series. The CSV writers export either the raw per-trial records or
such a summary. Nothing here modifies the outcomes it reads.

*/

use crate::{
    config::FormationTerm,
    driver::{TrialOutcome, TrialStatus},
    trial::StepRecord,
};
use serde::Serialize;
use std::{io, path::Path};

/// Mean and quantile band of one series at one step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct Band {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryRow {
    pub step: usize,
    /// The number of trials contributing to the row.
    pub trials: usize,
    pub population: Band,
    pub susceptible: Band,
    pub infected: Band,
    pub prevalence: Band,
    pub edges: Band,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub lower_quantile: f64,
    pub upper_quantile: f64,
    pub rows: Vec<SummaryRow>,
}

/// The `q` quantile of `sorted`, interpolating linearly between order statistics.
#[must_use]
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            #[allow(clippy::cast_precision_loss)]
            let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let below = position.floor() as usize;
            let above = (below + 1).min(n - 1);
            #[allow(clippy::cast_precision_loss)]
            let fraction = position - below as f64;
            sorted[below] + fraction * (sorted[above] - sorted[below])
        }
    }
}

fn band(mut values: Vec<f64>, lower_q: f64, upper_q: f64) -> Band {
    values.sort_unstable_by(f64::total_cmp);
    #[allow(clippy::cast_precision_loss)]
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Band {
        mean,
        lower: quantile(&values, lower_q),
        upper: quantile(&values, upper_q),
    }
}

/// Per-step means and `[lower_q, upper_q]` quantile bands over the completed trials.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(outcomes: &[TrialOutcome], lower_q: f64, upper_q: f64) -> Summary {
    let completed: Vec<&[StepRecord]> = outcomes
        .iter()
        .filter(|outcome| outcome.is_completed())
        .map(|outcome| outcome.records.as_slice())
        .collect();
    let steps = completed.iter().map(|records| records.len()).max().unwrap_or(0);

    let rows = (0..steps)
        .map(|index| {
            let records: Vec<&StepRecord> = completed
                .iter()
                .filter_map(|records| records.get(index))
                .collect();
            let series = |value: fn(&StepRecord) -> f64| {
                band(records.iter().map(|r| value(r)).collect(), lower_q, upper_q)
            };
            SummaryRow {
                step: records.first().map_or(index + 1, |r| r.step),
                trials: records.len(),
                population: series(|r| r.population_size as f64),
                susceptible: series(|r| r.susceptible_count as f64),
                infected: series(|r| r.infected_count as f64),
                prevalence: series(StepRecord::prevalence),
                edges: series(|r| r.active_edge_count as f64),
            }
        })
        .collect();

    Summary {
        lower_quantile: lower_q,
        upper_quantile: upper_q,
        rows,
    }
}

fn status_label(status: &TrialStatus) -> &'static str {
    match status {
        TrialStatus::Completed => "completed",
        TrialStatus::Failed(_) => "failed",
        TrialStatus::Cancelled => "cancelled",
    }
}

/// Writes one row per trial and step. `terms` names the formation statistic columns.
pub fn write_trials<W: io::Write>(
    writer: W,
    outcomes: &[TrialOutcome],
    terms: &[FormationTerm],
) -> Result<(), csv::Error> {
    let strata = outcomes
        .iter()
        .flat_map(|outcome| &outcome.records)
        .map(|record| record.susceptible_by_group.len())
        .max()
        .unwrap_or(0);

    let mut writer = csv::Writer::from_writer(writer);
    let mut header: Vec<String> = [
        "trial",
        "seed",
        "status",
        "step",
        "population_size",
        "susceptible",
        "infected",
        "prevalence",
        "edges",
        "incidence",
        "arrivals",
        "departures",
        "dissolved",
        "formed",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    for stratum in 0..strata {
        header.push(format!("susceptible_{stratum}"));
        header.push(format!("infected_{stratum}"));
    }
    header.extend(terms.iter().map(ToString::to_string));
    writer.write_record(&header)?;

    for outcome in outcomes {
        for record in &outcome.records {
            let mut row = vec![
                outcome.trial.to_string(),
                outcome.seed.to_string(),
                status_label(&outcome.status).to_string(),
                record.step.to_string(),
                record.population_size.to_string(),
                record.susceptible_count.to_string(),
                record.infected_count.to_string(),
                record.prevalence().to_string(),
                record.active_edge_count.to_string(),
                record.incidence.to_string(),
                record.arrivals.to_string(),
                record.departures.to_string(),
                record.dissolved.to_string(),
                record.formed.to_string(),
            ];
            for stratum in 0..strata {
                let count = |counts: &[usize]| counts.get(stratum).copied().unwrap_or(0).to_string();
                row.push(count(&record.susceptible_by_group));
                row.push(count(&record.infected_by_group));
            }
            row.extend(record.formation_statistics.iter().map(ToString::to_string));
            writer.write_record(&row)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_trials_csv(
    path: impl AsRef<Path>,
    outcomes: &[TrialOutcome],
    terms: &[FormationTerm],
) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_trials(file, outcomes, terms)
}

pub fn write_summary<W: io::Write>(writer: W, summary: &Summary) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    let mut header = vec!["step".to_string(), "trials".to_string()];
    for series in ["population", "susceptible", "infected", "prevalence", "edges"] {
        for column in ["mean", "lower", "upper"] {
            header.push(format!("{series}_{column}"));
        }
    }
    writer.write_record(&header)?;

    for row in &summary.rows {
        let mut record = vec![row.step.to_string(), row.trials.to_string()];
        for band in [row.population, row.susceptible, row.infected, row.prevalence, row.edges] {
            record.push(band.mean.to_string());
            record.push(band.lower.to_string());
            record.push(band.upper.to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary_csv(path: impl AsRef<Path>, summary: &Summary) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_summary(file, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrialError;

    fn record(step: usize, infected: usize, edges: usize) -> StepRecord {
        StepRecord {
            step,
            population_size: 10,
            susceptible_count: 10 - infected,
            infected_count: infected,
            susceptible_by_group: vec![10 - infected],
            infected_by_group: vec![infected],
            active_edge_count: edges,
            incidence: 0,
            arrivals: 0,
            departures: 0,
            dissolved: 0,
            formed: 0,
            formation_statistics: vec![edges as f64],
        }
    }

    fn outcome(trial: usize, status: TrialStatus, infected: &[usize]) -> TrialOutcome {
        TrialOutcome {
            trial,
            seed: 100 + trial as u64,
            status,
            records: infected
                .iter()
                .enumerate()
                .map(|(i, n)| record(i + 1, *n, 3))
                .collect(),
            degeneracies: vec![],
        }
    }

    #[test]
    fn quantiles_interpolate() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&sorted, 0.0), 1.0);
        assert_eq!(quantile(&sorted, 0.5), 3.0);
        assert_eq!(quantile(&sorted, 1.0), 5.0);
        assert!((quantile(&sorted, 0.1) - 1.4).abs() < 1e-12);
        assert_eq!(quantile(&[7.0], 0.9), 7.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn summary_uses_completed_trials_only() {
        let outcomes = vec![
            outcome(0, TrialStatus::Completed, &[1, 2]),
            outcome(1, TrialStatus::Completed, &[3, 4]),
            outcome(2, TrialStatus::Completed, &[5, 6]),
            outcome(3, TrialStatus::Cancelled, &[9]),
            outcome(4, TrialStatus::Failed(TrialError::Panicked("x".into())), &[9, 9]),
        ];
        let summary = summarize(&outcomes, 0.0, 1.0);
        assert_eq!(summary.rows.len(), 2);

        let first = &summary.rows[0];
        assert_eq!(first.step, 1);
        assert_eq!(first.trials, 3);
        assert_eq!(first.infected, Band { mean: 3.0, lower: 1.0, upper: 5.0 });
        assert!((first.prevalence.mean - 0.3).abs() < 1e-12);
        assert_eq!(first.edges.mean, 3.0);
        assert_eq!(summary.rows[1].infected.mean, 4.0);
    }

    #[test]
    fn empty_run_has_empty_summary() {
        assert!(summarize(&[], 0.25, 0.75).rows.is_empty());
    }

    #[test]
    fn trials_csv_has_one_row_per_step() {
        let outcomes = vec![
            outcome(0, TrialStatus::Completed, &[1, 2]),
            outcome(1, TrialStatus::Cancelled, &[3]),
        ];
        let file = tempfile::NamedTempFile::new().unwrap();
        write_trials_csv(file.path(), &outcomes, &[FormationTerm::Edges]).unwrap();

        let mut reader = csv::Reader::from_path(file.path()).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "trial");
        assert_eq!(&headers[14], "susceptible_0");
        assert_eq!(&headers[15], "infected_0");
        assert_eq!(&headers[16], "edges");

        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][2], "cancelled");
        assert_eq!(&rows[1][6], "2");
        assert_eq!(&rows[1][7], "0.2");
    }

    #[test]
    fn summary_csv_round_trips_means() {
        let outcomes = vec![
            outcome(0, TrialStatus::Completed, &[2]),
            outcome(1, TrialStatus::Completed, &[4]),
        ];
        let summary = summarize(&outcomes, 0.1, 0.9);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        write_summary_csv(&path, &summary).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 17);
        assert_eq!(&headers[8], "infected_mean");
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[8], "3");
    }
}
