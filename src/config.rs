/*!

Model parameters.

`Parameters` is the whole configuration surface of a simulation: population structure, the
formation targets and partnership durations the network model is estimated from, demography,
transmission, and how trials are run. It is usually loaded from JSON:

```json
{
  "population_size": 500,
  "group_sizes": [250, 250],
  "formation_targets": [
    { "term": "edges", "target": 175 },
    { "term": "node_factor", "group": 1, "target": 150 },
    { "term": "node_match", "target": 120 }
  ],
  "mean_partnership_duration": 50,
  "infection_probability_per_act": 0.3,
  "stratify_by": "group"
}
```

Omitted fields take their values from `Parameters::default()`. `validate` rejects any
out-of-range or inconsistent value before estimation or simulation begins.

*/

use crate::{
    attribute::{Attribute, DiseaseStatus, Group},
    error::ConfigurationError,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, path::Path};

/// A term of the formation model. All terms are dyad-independent: their change statistic for a
/// dyad depends only on the groups of its two endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "term", rename_all = "snake_case")]
pub enum FormationTerm {
    /// The number of edges.
    Edges,
    /// The total degree of the nodes in `group`.
    NodeFactor { group: u32 },
    /// The number of edges joining two nodes of the same group.
    NodeMatch,
}

impl FormationTerm {
    /// The change in this statistic when an edge is added between a node of group `a` and a node
    /// of group `b`.
    #[must_use]
    pub fn change_statistic(&self, a: u32, b: u32) -> f64 {
        match self {
            FormationTerm::Edges => 1.0,
            FormationTerm::NodeFactor { group } => {
                f64::from(u8::from(a == *group) + u8::from(b == *group))
            }
            FormationTerm::NodeMatch => f64::from(u8::from(a == b)),
        }
    }
}

impl Display for FormationTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormationTerm::Edges => write!(f, "edges"),
            FormationTerm::NodeFactor { group } => write!(f, "node_factor(group = {group})"),
            FormationTerm::NodeMatch => write!(f, "node_match"),
        }
    }
}

/// A formation term paired with the value of its statistic the model should reproduce.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetStatistic {
    #[serde(flatten)]
    pub term: FormationTerm,
    pub target: f64,
}

impl TargetStatistic {
    #[must_use]
    pub fn new(term: FormationTerm, target: f64) -> Self {
        TargetStatistic { term, target }
    }
}

/// What the driver does when a trial fails.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Cancel all outstanding trials at their next step boundary.
    FailFast,
    /// Let every other trial run to completion.
    #[default]
    BestEffort,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    pub population_size: usize,
    /// Initial size of each group; group `i` has id `Group(i)`. Must sum to `population_size`.
    pub group_sizes: Vec<usize>,
    pub formation_targets: Vec<TargetStatistic>,
    /// Mean partnership duration in steps. When `mixed_group_duration` is set this applies to
    /// same-group partnerships only.
    pub mean_partnership_duration: f64,
    pub mixed_group_duration: Option<f64>,
    /// The per-step departure hazard the dissolution coefficients are adjusted for.
    pub exogenous_departure_rate: f64,
    /// One departure hazard per group, replacing `exogenous_departure_rate` when set.
    pub exogenous_departure_rates: Option<Vec<f64>>,
    pub infection_probability_per_act: f64,
    pub acts_per_step: f64,
    /// Expected arrivals per step per member of the population.
    pub arrival_rate: f64,
    pub departure_rate_susceptible: f64,
    pub departure_rate_infected: f64,
    /// Relative probability of an arrival joining each group. Defaults to `group_sizes`.
    pub arrival_group_weights: Option<Vec<f64>>,
    pub initial_infected_count: usize,
    pub step_count: usize,
    pub trial_count: usize,
    /// Name of the attribute whose categories the per-step counts are broken down by.
    pub stratify_by: Option<String>,
    /// Base seed; trial `i` is seeded with `seed + i`.
    pub seed: u64,
    pub failure_mode: FailureMode,
    pub parallel: bool,
    /// Size of the trial thread pool. `None` uses rayon's global pool.
    pub threads: Option<usize>,
    /// Adjust the edges coefficient for population size so mean degree stays constant as the
    /// population grows or shrinks.
    pub edges_correction: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            population_size: 500,
            group_sizes: vec![250, 250],
            formation_targets: vec![
                TargetStatistic::new(FormationTerm::Edges, 175.0),
                TargetStatistic::new(FormationTerm::NodeFactor { group: 1 }, 150.0),
                TargetStatistic::new(FormationTerm::NodeMatch, 120.0),
            ],
            mean_partnership_duration: 50.0,
            mixed_group_duration: None,
            exogenous_departure_rate: 0.005,
            exogenous_departure_rates: None,
            infection_probability_per_act: 0.3,
            acts_per_step: 1.0,
            arrival_rate: 0.005,
            departure_rate_susceptible: 0.005,
            departure_rate_infected: 0.005,
            arrival_group_weights: None,
            initial_infected_count: 25,
            step_count: 100,
            trial_count: 4,
            stratify_by: Some(Group::name().to_string()),
            seed: 12345,
            failure_mode: FailureMode::BestEffort,
            parallel: true,
            threads: None,
            edges_correction: true,
        }
    }
}

fn out_of_range(field: &'static str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::OutOfRange {
        field,
        reason: reason.into(),
    }
}

fn check_probability(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(out_of_range(field, format!("{value} is not in [0, 1]")))
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(out_of_range(field, format!("{value} is not a positive number")))
    }
}

impl Parameters {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let parameters: Parameters = serde_json::from_str(json)?;
        parameters.validate()?;
        Ok(parameters)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.group_sizes.len()
    }

    /// The target for `term`, if the formation model has that term.
    #[must_use]
    pub fn target_for(&self, term: FormationTerm) -> Option<f64> {
        self.formation_targets
            .iter()
            .find(|statistic| statistic.term == term)
            .map(|statistic| statistic.target)
    }

    #[must_use]
    pub fn has_node_match(&self) -> bool {
        self.target_for(FormationTerm::NodeMatch).is_some()
    }

    /// Relative arrival weight of each group.
    #[must_use]
    pub fn arrival_weights(&self) -> Vec<f64> {
        match &self.arrival_group_weights {
            Some(weights) => weights.clone(),
            #[allow(clippy::cast_precision_loss)]
            None => self.group_sizes.iter().map(|size| *size as f64).collect(),
        }
    }

    /// Exogenous departure hazard of each group.
    #[must_use]
    pub fn group_departure_rates(&self) -> Vec<f64> {
        match &self.exogenous_departure_rates {
            Some(rates) => rates.clone(),
            None => vec![self.exogenous_departure_rate; self.group_count()],
        }
    }

    /// Checks every parameter, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.population_size == 0 {
            return Err(out_of_range("population_size", "must be positive"));
        }
        if self.group_sizes.is_empty() {
            return Err(out_of_range("group_sizes", "at least one group is required"));
        }
        if self.group_sizes.contains(&0) {
            return Err(out_of_range("group_sizes", "every group must be non-empty"));
        }
        let sum: usize = self.group_sizes.iter().sum();
        if sum != self.population_size {
            return Err(ConfigurationError::GroupSizeMismatch {
                sum,
                population_size: self.population_size,
            });
        }

        self.validate_targets()?;

        check_positive("mean_partnership_duration", self.mean_partnership_duration)?;
        if let Some(duration) = self.mixed_group_duration {
            check_positive("mixed_group_duration", duration)?;
            if !self.has_node_match() {
                return Err(ConfigurationError::HeterogeneousDurationWithoutNodeMatch);
            }
        }
        if !(0.0..1.0).contains(&self.exogenous_departure_rate) {
            return Err(out_of_range(
                "exogenous_departure_rate",
                format!("{} is not in [0, 1)", self.exogenous_departure_rate),
            ));
        }
        if let Some(rates) = &self.exogenous_departure_rates {
            if rates.len() != self.group_count() {
                return Err(out_of_range(
                    "exogenous_departure_rates",
                    format!("expected {} rates, got {}", self.group_count(), rates.len()),
                ));
            }
            if let Some(rate) = rates.iter().find(|rate| !(0.0..1.0).contains(*rate)) {
                return Err(out_of_range(
                    "exogenous_departure_rates",
                    format!("{rate} is not in [0, 1)"),
                ));
            }
        }

        check_probability("infection_probability_per_act", self.infection_probability_per_act)?;
        if !(self.acts_per_step.is_finite() && self.acts_per_step >= 0.0) {
            return Err(out_of_range("acts_per_step", "must be a non-negative number"));
        }
        check_probability("arrival_rate", self.arrival_rate)?;
        check_probability("departure_rate_susceptible", self.departure_rate_susceptible)?;
        check_probability("departure_rate_infected", self.departure_rate_infected)?;

        if let Some(weights) = &self.arrival_group_weights {
            if weights.len() != self.group_count() {
                return Err(out_of_range(
                    "arrival_group_weights",
                    format!("expected {} weights, got {}", self.group_count(), weights.len()),
                ));
            }
            if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
                return Err(out_of_range("arrival_group_weights", "weights must be non-negative"));
            }
            if weights.iter().sum::<f64>() <= 0.0 {
                return Err(out_of_range("arrival_group_weights", "weights must not all be zero"));
            }
        }

        if self.initial_infected_count > self.population_size {
            return Err(out_of_range(
                "initial_infected_count",
                format!("{} exceeds the population size", self.initial_infected_count),
            ));
        }
        if self.step_count == 0 {
            return Err(out_of_range("step_count", "must be positive"));
        }
        if self.trial_count == 0 {
            return Err(out_of_range("trial_count", "must be positive"));
        }
        if self.threads == Some(0) {
            return Err(out_of_range("threads", "must be positive"));
        }
        if let Some(name) = &self.stratify_by {
            if name != Group::name() && name != DiseaseStatus::name() {
                return Err(ConfigurationError::UnknownStratifier(name.clone()));
            }
        }

        Ok(())
    }

    fn validate_targets(&self) -> Result<(), ConfigurationError> {
        let mut seen: Vec<FormationTerm> = vec![];
        for statistic in &self.formation_targets {
            if seen.contains(&statistic.term) {
                return Err(ConfigurationError::DuplicateTerm(statistic.term));
            }
            seen.push(statistic.term);

            if !(statistic.target.is_finite() && statistic.target >= 0.0) {
                return Err(out_of_range(
                    "formation_targets",
                    format!("target for {} must be a non-negative number", statistic.term),
                ));
            }
            if let FormationTerm::NodeFactor { group } = statistic.term {
                if group as usize >= self.group_count() {
                    return Err(ConfigurationError::UnknownGroup(statistic.term));
                }
            }
        }

        let edges = self
            .target_for(FormationTerm::Edges)
            .ok_or(ConfigurationError::MissingEdgesTerm)?;

        let factor_groups = seen
            .iter()
            .filter(|term| matches!(term, FormationTerm::NodeFactor { .. }))
            .count();
        if factor_groups > 0 && factor_groups >= self.group_count() {
            return Err(ConfigurationError::NoReferenceGroup);
        }

        if let Some(matched) = self.target_for(FormationTerm::NodeMatch) {
            if matched > edges {
                return Err(ConfigurationError::TargetExceedsEdges {
                    term: FormationTerm::NodeMatch,
                    value: matched,
                    edges,
                });
            }
        }

        Ok(())
    }
}
