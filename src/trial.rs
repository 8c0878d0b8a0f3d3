/*!

A single stochastic trial.

A trial owns its own `Context` and moves through `Initialized → Running → Completed`. Creating a
trial allocates the population, draws the starting network from the cross-sectional model and
infects the initial cases. Every call to `step` then runs the fixed pipeline

1. departures, then arrivals;
2. dissolution;
3. formation;
4. transmission;

checks the network invariants and appends a `StepRecord`.

*/

use crate::{
    attribute::{Attribute, DiseaseStatus, Group},
    config::Parameters,
    context::Context,
    demography::{run_arrivals, run_departures},
    dissolution::dissolve_edges,
    epidemic::transmit,
    error::{NumericDegeneracy, TrialError},
    formation::{form_edges, formation_statistics, seed_network},
    model::NetworkModel,
    network::ContextNetworkExt,
    population::ContextPopulationExt,
    random::ContextRandomExt,
};
use log::{debug, warn};
use rand::seq::index;
use serde::Serialize;

crate::define_rng!(InitializationRng);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrialState {
    Initialized,
    Running { step: usize },
    Completed,
}

/// Population, network and flow counts at the end of one step.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub population_size: usize,
    pub susceptible_count: usize,
    pub infected_count: usize,
    /// Susceptible nodes per category of the stratifying attribute. Empty when not stratified.
    pub susceptible_by_group: Vec<usize>,
    pub infected_by_group: Vec<usize>,
    pub active_edge_count: usize,
    /// New infections during the step.
    pub incidence: usize,
    pub arrivals: usize,
    pub departures: usize,
    pub dissolved: usize,
    pub formed: usize,
    /// The value of every formation term, in the model's term order.
    pub formation_statistics: Vec<f64>,
}

impl StepRecord {
    #[must_use]
    pub fn prevalence(&self) -> f64 {
        if self.population_size == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let prevalence = self.infected_count as f64 / self.population_size as f64;
            prevalence
        }
    }

    /// Prevalence within one stratum, `None` if the stratum is empty or absent.
    #[must_use]
    pub fn stratum_prevalence(&self, stratum: usize) -> Option<f64> {
        let infected = *self.infected_by_group.get(stratum)?;
        let susceptible = *self.susceptible_by_group.get(stratum)?;
        let total = infected + susceptible;
        #[allow(clippy::cast_precision_loss)]
        (total > 0).then(|| infected as f64 / total as f64)
    }
}

/// Declares the attributes every trial uses and allocates the initial population, all
/// susceptible, group by group.
pub(crate) fn populate(context: &mut Context, parameters: &Parameters) -> Result<(), TrialError> {
    context.declare_attribute::<Group>();
    context.declare_attribute::<DiseaseStatus>();
    for (group, size) in parameters.group_sizes.iter().enumerate() {
        let group = Group::try_from(group)?;
        for _ in 0..*size {
            context.allocate_node((group, DiseaseStatus::Susceptible))?;
        }
    }
    Ok(())
}

/// Whether two degeneracies describe the same condition, ignoring the exact probability.
fn same_condition(a: &NumericDegeneracy, b: &NumericDegeneracy) -> bool {
    match (a, b) {
        (
            NumericDegeneracy::FormationSaturated { low, high, .. },
            NumericDegeneracy::FormationSaturated {
                low: other_low,
                high: other_high,
                ..
            },
        ) => low == other_low && high == other_high,
        _ => a == b,
    }
}

pub struct Trial<'a> {
    model: &'a NetworkModel,
    context: Context,
    state: TrialState,
    seed: u64,
    records: Vec<StepRecord>,
    degeneracies: Vec<NumericDegeneracy>,
}

impl<'a> Trial<'a> {
    /// Sets up a trial: population, starting network and initial infections.
    pub fn new(model: &'a NetworkModel, seed: u64) -> Result<Self, TrialError> {
        let parameters = model.parameters();
        let mut context = Context::new();
        context.init_random(seed);
        populate(&mut context, parameters)?;

        let edges = seed_network(&mut context, model)?;

        let nodes = context.active_nodes();
        let count = parameters.initial_infected_count.min(nodes.len());
        let chosen =
            context.sample::<InitializationRng, _>(|rng| index::sample(rng, nodes.len(), count));
        for i in chosen {
            context.set_attribute(nodes[i], DiseaseStatus::Infected)?;
        }

        debug!(
            "trial with seed {seed} initialized: {} nodes, {edges} edges, {count} infected",
            nodes.len()
        );

        Ok(Trial {
            model,
            context,
            state: TrialState::Initialized,
            seed,
            records: Vec::with_capacity(parameters.step_count),
            degeneracies: vec![],
        })
    }

    #[must_use]
    pub fn state(&self) -> TrialState {
        self.state
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == TrialState::Completed
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    #[must_use]
    pub fn degeneracies(&self) -> &[NumericDegeneracy] {
        &self.degeneracies
    }

    pub fn into_parts(self) -> (Vec<StepRecord>, Vec<NumericDegeneracy>) {
        (self.records, self.degeneracies)
    }

    fn note_degeneracies(&mut self, found: Vec<NumericDegeneracy>) {
        for degeneracy in found {
            if !self
                .degeneracies
                .iter()
                .any(|seen| same_condition(seen, &degeneracy))
            {
                warn!("trial with seed {}: {degeneracy}", self.seed);
                self.degeneracies.push(degeneracy);
            }
        }
    }

    /// The offset added to the edges coefficient so mean degree stays constant as the population
    /// size drifts away from its initial value.
    fn edges_offset(&self) -> f64 {
        let parameters = self.model.parameters();
        let current = self.context.active_node_count();
        if !parameters.edges_correction || current == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = parameters.population_size as f64 / current as f64;
        ratio.ln()
    }

    /// Runs one step of the pipeline and returns its record. Returns `None` once the trial has
    /// completed all its steps.
    ///
    /// # Panics
    ///
    /// Panics if the network references an inactive node, contains a self loop or has an
    /// asymmetric adjacency view after the step.
    pub fn step(&mut self) -> Result<Option<&StepRecord>, TrialError> {
        if self.is_complete() {
            return Ok(None);
        }
        let model = self.model;
        let parameters = model.parameters();
        let step = self.context.advance_step();
        self.state = TrialState::Running { step };

        let population = self.context.active_node_count();
        let departed = run_departures(&mut self.context, parameters)?;
        let arrived = run_arrivals(&mut self.context, parameters, population)?;

        let dissolved = dissolve_edges(&mut self.context, model.dissolution())?;

        let offset = self.edges_offset();
        let formation = form_edges(&mut self.context, model, offset)?;
        self.note_degeneracies(formation.degeneracies);

        let infected = transmit(&mut self.context, parameters)?;

        if let Err(violation) = self.context.check_network_invariants() {
            panic!("network invariant violated at step {step}: {violation}");
        }

        let mut record = self.snapshot(step)?;
        record.incidence = infected.len();
        record.arrivals = arrived.len();
        record.departures = departed.len();
        record.dissolved = dissolved.len();
        record.formed = formation.formed;
        self.records.push(record);

        if step >= parameters.step_count {
            self.state = TrialState::Completed;
            debug!("trial with seed {} completed {step} steps", self.seed);
        }
        Ok(self.records.last())
    }

    /// Counts and stratified counts for the current state. Flow fields are left at zero.
    fn snapshot(&mut self, step: usize) -> Result<StepRecord, TrialError> {
        let parameters = self.model.parameters();
        let stratifier = parameters.stratify_by.as_deref();
        let strata = match stratifier {
            Some(name) if name == Group::name() => parameters.group_count(),
            Some(name) if name == DiseaseStatus::name() => 2,
            _ => 0,
        };
        let mut susceptible_by_group = vec![0; strata];
        let mut infected_by_group = vec![0; strata];
        let mut susceptible_count = 0;
        let mut infected_count = 0;

        for node in self.context.active_nodes() {
            let status = self.context.get_attribute::<DiseaseStatus>(node)?;
            match status {
                DiseaseStatus::Susceptible => susceptible_count += 1,
                DiseaseStatus::Infected => infected_count += 1,
            }
            if let Some(name) = stratifier {
                let stratum = self.context.get_category(node, name)? as usize;
                if stratum >= susceptible_by_group.len() {
                    susceptible_by_group.resize(stratum + 1, 0);
                    infected_by_group.resize(stratum + 1, 0);
                }
                match status {
                    DiseaseStatus::Susceptible => susceptible_by_group[stratum] += 1,
                    DiseaseStatus::Infected => infected_by_group[stratum] += 1,
                }
            }
        }

        Ok(StepRecord {
            step,
            population_size: susceptible_count + infected_count,
            susceptible_count,
            infected_count,
            susceptible_by_group,
            infected_by_group,
            active_edge_count: self.context.edge_count(),
            incidence: 0,
            arrivals: 0,
            departures: 0,
            dissolved: 0,
            formed: 0,
            formation_statistics: formation_statistics(&mut self.context, self.model)?,
        })
    }
}
