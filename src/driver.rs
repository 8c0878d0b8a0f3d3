/*!

Running many trials.

`SimulationDriver` runs `trial_count` independent trials of a `NetworkModel`, each in its own
`Context`, sequentially or on a rayon thread pool. Trial `i` is seeded with `seed + i`, so a run
is reproducible regardless of how its trials are scheduled.

A trial that returns an error or panics is reported as failed without affecting its siblings.
Under `FailureMode::FailFast` the first failure raises a shared cancellation flag which every
other trial checks at each step boundary; trials that observe it stop and report `Cancelled`.

*/

use crate::{
    config::FailureMode,
    error::{NumericDegeneracy, SimulationError, TrialError},
    model::NetworkModel,
    trial::{StepRecord, Trial},
};
use log::{error, info};
use rayon::prelude::*;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
};

#[derive(Clone, Debug, PartialEq)]
pub enum TrialStatus {
    Completed,
    Failed(TrialError),
    Cancelled,
}

/// The result of one trial. Failed and cancelled trials keep the records of the steps they
/// completed.
#[derive(Clone, Debug)]
pub struct TrialOutcome {
    pub trial: usize,
    pub seed: u64,
    pub status: TrialStatus,
    pub records: Vec<StepRecord>,
    pub degeneracies: Vec<NumericDegeneracy>,
}

impl TrialOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }
}

/// Every trial outcome of a run, in trial order.
#[derive(Clone, Debug)]
pub struct SimulationRun {
    pub outcomes: Vec<TrialOutcome>,
}

impl SimulationRun {
    pub fn completed(&self) -> impl Iterator<Item = &TrialOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_completed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TrialOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, TrialStatus::Failed(_)))
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &TrialOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == TrialStatus::Cancelled)
    }
}

/// Called after every recorded step with the trial index and the new record.
pub type StepObserver<'a> = dyn Fn(usize, &StepRecord) + Sync + 'a;

pub struct SimulationDriver<'a> {
    model: &'a NetworkModel,
    observer: Option<&'a StepObserver<'a>>,
    trial_count: usize,
    seed: u64,
    failure_mode: FailureMode,
    parallel: bool,
    threads: Option<usize>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<'a> SimulationDriver<'a> {
    /// A driver configured from the model's parameters.
    #[must_use]
    pub fn new(model: &'a NetworkModel) -> Self {
        let parameters = model.parameters();
        SimulationDriver {
            model,
            observer: None,
            trial_count: parameters.trial_count,
            seed: parameters.seed,
            failure_mode: parameters.failure_mode,
            parallel: parameters.parallel,
            threads: parameters.threads,
        }
    }

    #[must_use]
    pub fn with_trial_count(mut self, trial_count: usize) -> Self {
        self.trial_count = trial_count;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    /// Installs an observer that sees every step record as it is produced. A panic inside the
    /// observer fails the trial that triggered it.
    #[must_use]
    pub fn with_observer(mut self, observer: &'a StepObserver<'a>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn model(&self) -> &NetworkModel {
        self.model
    }

    /// The seed of trial `index`.
    #[must_use]
    pub fn trial_seed(&self, index: usize) -> u64 {
        self.seed.wrapping_add(index as u64)
    }

    /// Runs every trial and collects the outcomes in trial order.
    pub fn run(&self) -> Result<SimulationRun, SimulationError> {
        let cancel = AtomicBool::new(false);
        let run_one = |index: usize| self.run_trial(index, &cancel);

        let outcomes: Vec<TrialOutcome> = match (self.parallel, self.threads) {
            (false, _) => (0..self.trial_count).map(run_one).collect(),
            (true, None) => (0..self.trial_count).into_par_iter().map(run_one).collect(),
            (true, Some(threads)) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?;
                pool.install(|| (0..self.trial_count).into_par_iter().map(run_one).collect())
            }
        };

        let run = SimulationRun { outcomes };
        info!(
            "{} of {} trials completed ({} failed, {} cancelled)",
            run.completed().count(),
            self.trial_count,
            run.failed().count(),
            run.cancelled().count()
        );
        Ok(run)
    }

    /// Builds the trial in `slot` and steps it to completion. The trial lives in `slot` so its
    /// records survive an error or a panic.
    fn drive(
        &self,
        index: usize,
        seed: u64,
        cancel: &AtomicBool,
        slot: &mut Option<Trial<'a>>,
    ) -> Result<TrialStatus, TrialError> {
        if cancel.load(Ordering::SeqCst) {
            return Ok(TrialStatus::Cancelled);
        }
        let trial = slot.insert(Trial::new(self.model, seed)?);
        while !trial.is_complete() {
            if cancel.load(Ordering::SeqCst) {
                return Ok(TrialStatus::Cancelled);
            }
            if let (Some(record), Some(observer)) = (trial.step()?, self.observer) {
                observer(index, record);
            }
        }
        Ok(TrialStatus::Completed)
    }

    fn run_trial(&self, index: usize, cancel: &AtomicBool) -> TrialOutcome {
        let seed = self.trial_seed(index);
        let mut slot = None;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.drive(index, seed, cancel, &mut slot)
        }));

        let status = match result {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => TrialStatus::Failed(err),
            Err(payload) => TrialStatus::Failed(TrialError::Panicked(panic_message(payload.as_ref()))),
        };

        if let TrialStatus::Failed(err) = &status {
            error!("trial {index} (seed {seed}) failed: {err}");
            if self.failure_mode == FailureMode::FailFast {
                cancel.store(true, Ordering::SeqCst);
            }
        }

        let (records, degeneracies) = slot.map(Trial::into_parts).unwrap_or_default();
        TrialOutcome {
            trial: index,
            seed,
            status,
            records,
            degeneracies,
        }
    }
}
