/*!

Network diagnostics.

`diagnose` checks a fitted model by simulating the network alone: a closed population with no
demography and no epidemic, started from a cross-sectional draw and run with the unadjusted
dissolution coefficients. It reports how far the simulated formation statistics and partnership
durations drift from their targets.

Durations are measured only for partnerships that both formed and dissolved during the
simulation. Partnerships present at the start have unknown onset and are excluded.

*/

use crate::{
    attribute::Group,
    config::FormationTerm,
    context::Context,
    dissolution::{dissolve_edges, DissolutionModel},
    error::{ConfigurationError, EpiNetError, TrialError},
    formation::{form_edges, formation_statistics, seed_network},
    model::NetworkModel,
    population::ContextPopulationExt,
    random::ContextRandomExt,
    trial::populate,
};
use log::info;
use rayon::prelude::*;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DiagnosticOptions {
    pub trials: usize,
    pub steps: usize,
    pub seed: u64,
}

impl DiagnosticOptions {
    /// Options using the model's seed.
    #[must_use]
    pub fn for_model(model: &NetworkModel, trials: usize, steps: usize) -> Self {
        DiagnosticOptions {
            trials,
            steps,
            seed: model.parameters().seed,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TermDiagnostic {
    pub term: FormationTerm,
    pub target: f64,
    /// Mean over every simulated step of every trial.
    pub mean: f64,
    pub sd: f64,
    /// `100 * (mean - target) / target`. A zero target gives 0 when the mean is also zero and
    /// infinity otherwise.
    pub percent_deviation: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DurationDiagnostic {
    pub same_group: bool,
    pub target: f64,
    /// Mean duration of completed partnerships, `None` if none completed.
    pub observed: Option<f64>,
    pub completed: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NetworkDiagnostics {
    pub trials: usize,
    pub steps: usize,
    pub terms: Vec<TermDiagnostic>,
    /// One entry for homogeneous durations, or same-group and mixed-group entries.
    pub durations: Vec<DurationDiagnostic>,
}

#[derive(Default)]
struct DiagnosticTrial {
    statistics: Vec<Vec<f64>>,
    // (same group, realised duration)
    durations: Vec<(bool, usize)>,
}

fn simulate_network(
    model: &NetworkModel,
    dissolution: &DissolutionModel,
    seed: u64,
    steps: usize,
) -> Result<DiagnosticTrial, TrialError> {
    let mut context = Context::new();
    context.init_random(seed);
    populate(&mut context, model.parameters())?;
    seed_network(&mut context, model)?;

    let mut trial = DiagnosticTrial::default();
    for _ in 0..steps {
        let step = context.advance_step();
        for edge in dissolve_edges(&mut context, dissolution)? {
            if edge.formed_at() > 0 {
                let (a, b) = edge.endpoints();
                let same = context.get_attribute::<Group>(a)? == context.get_attribute::<Group>(b)?;
                trial.durations.push((same, edge.age(step)));
            }
        }
        form_edges(&mut context, model, 0.0)?;
        trial.statistics.push(formation_statistics(&mut context, model)?);
    }
    Ok(trial)
}

#[allow(clippy::cast_precision_loss)]
fn mean_and_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

fn percent_deviation(mean: f64, target: f64) -> f64 {
    if target > 0.0 {
        100.0 * (mean - target) / target
    } else if mean == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Simulates the network dynamics of `model` and compares them with the targets. At least one
/// trial of at least one step is required.
pub fn diagnose(
    model: &NetworkModel,
    options: &DiagnosticOptions,
) -> Result<NetworkDiagnostics, EpiNetError> {
    if options.trials == 0 {
        return Err(ConfigurationError::OutOfRange {
            field: "trials",
            reason: "diagnostics need at least one trial".to_string(),
        }
        .into());
    }
    if options.steps == 0 {
        return Err(ConfigurationError::OutOfRange {
            field: "steps",
            reason: "diagnostics need at least one step".to_string(),
        }
        .into());
    }

    let dissolution = model.dissolution().crude();
    let trials = (0..options.trials)
        .into_par_iter()
        .map(|i| {
            simulate_network(
                model,
                &dissolution,
                options.seed.wrapping_add(i as u64),
                options.steps,
            )
        })
        .collect::<Result<Vec<_>, TrialError>>()?;

    let terms = model
        .parameters()
        .formation_targets
        .iter()
        .enumerate()
        .map(|(k, target)| {
            let values: Vec<f64> = trials
                .iter()
                .flat_map(|trial| trial.statistics.iter().map(move |s| s[k]))
                .collect();
            let (mean, sd) = mean_and_sd(&values);
            TermDiagnostic {
                term: target.term,
                target: target.target,
                mean,
                sd,
                percent_deviation: percent_deviation(mean, target.target),
            }
        })
        .collect::<Vec<_>>();

    let classes: &[bool] = if dissolution.is_heterogeneous() {
        &[true, false]
    } else {
        &[true]
    };
    let durations = classes
        .iter()
        .map(|&same_group| {
            #[allow(clippy::cast_precision_loss)]
            let observed: Vec<f64> = trials
                .iter()
                .flat_map(|trial| &trial.durations)
                .filter(|(same, _)| !dissolution.is_heterogeneous() || *same == same_group)
                .map(|(_, age)| *age as f64)
                .collect();
            DurationDiagnostic {
                same_group,
                target: dissolution.duration(same_group),
                observed: (!observed.is_empty()).then(|| mean_and_sd(&observed).0),
                completed: observed.len(),
            }
        })
        .collect::<Vec<_>>();

    for term in &terms {
        info!(
            "{}: target {:.2}, simulated {:.2} (sd {:.2}, {:+.1}%)",
            term.term, term.target, term.mean, term.sd, term.percent_deviation
        );
    }
    for duration in &durations {
        info!(
            "duration (same group: {}): target {:.2}, observed {:?} over {} partnerships",
            duration.same_group, duration.target, duration.observed, duration.completed
        );
    }

    Ok(NetworkDiagnostics {
        trials: options.trials,
        steps: options.steps,
        terms,
        durations,
    })
}
