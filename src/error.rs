//! Error taxonomy. Each component has its own error enum; `EpiNetError` gathers them for callers
//! that drive the whole pipeline.

use crate::{config::FormationTerm, NodeId};

/// Failures of the attribute store contract.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributeError {
    #[error("attribute `{0}` was never declared")]
    UnknownAttribute(String),

    #[error("{0} is not an active node")]
    InactiveNode(NodeId),

    #[error("missing initial value for required attribute `{0}`")]
    MissingAttribute(&'static str),
}

/// Failures of the network contract.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("invalid edge between {a} and {b}: {reason}")]
    InvalidEdge {
        a: NodeId,
        b: NodeId,
        reason: &'static str,
    },
}

/// Invalid or inconsistent parameters. Always raised before any simulation step runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("`{field}` is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("group sizes sum to {sum}, but the population size is {population_size}")]
    GroupSizeMismatch { sum: usize, population_size: usize },

    #[error("formation targets must contain exactly one `edges` term")]
    MissingEdgesTerm,

    #[error("formation term {0} appears more than once")]
    DuplicateTerm(FormationTerm),

    #[error("formation term {0} refers to a group that does not exist")]
    UnknownGroup(FormationTerm),

    #[error("`node_factor` terms cover every group; one group must be left out as the reference level")]
    NoReferenceGroup,

    #[error("target for {term} is {value}, which exceeds the `edges` target {edges}")]
    TargetExceedsEdges {
        term: FormationTerm,
        value: f64,
        edges: f64,
    },

    #[error("`mixed_group_duration` requires a `node_match` formation term")]
    HeterogeneousDurationWithoutNodeMatch,

    #[error("`stratify_by` names unknown attribute `{0}`")]
    UnknownStratifier(String),

    #[error("failed to read parameters file")]
    Io(#[from] std::io::Error),

    #[error("failed to parse parameters")]
    Json(#[from] serde_json::Error),
}

/// Failures of the network model estimator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstimationError {
    #[error("target for {term} cannot be realized: {reason}")]
    UnrealizableTarget { term: FormationTerm, reason: String },

    #[error("formation terms are collinear over the available dyad classes")]
    Singular,

    #[error("estimation did not converge after {iterations} iterations (largest relative residual {residual:e})")]
    NoConvergence { iterations: usize, residual: f64 },
}

/// A non-fatal numerical condition. Logged as a warning and recorded where it occurred; the
/// simulation carries on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NumericDegeneracy {
    #[error(
        "dissolution persistence for groups ({low}, {high}) with mean duration {duration} exceeds 1 \
         under departures and was clamped"
    )]
    DissolutionClamped { low: u32, high: u32, duration: f64 },

    #[error("formation probability for groups ({low}, {high}) pinned at {probability} by a boundary target")]
    FormationPinned {
        low: u32,
        high: u32,
        probability: f64,
    },

    #[error("formation probability for groups ({low}, {high}) saturated at {probability}")]
    FormationSaturated {
        low: u32,
        high: u32,
        probability: f64,
    },
}

/// A failure inside a single trial. It never affects sibling trials.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrialError {
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("invalid distribution: {0}")]
    Distribution(String),

    #[error("group index {0} does not fit in a group id")]
    GroupOverflow(usize),

    #[error("trial panicked: {0}")]
    Panicked(String),
}

/// Failures of the driver itself, as opposed to any one trial.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("failed to build the trial thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, thiserror::Error)]
pub enum EpiNetError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Estimation(#[from] EstimationError),

    #[error(transparent)]
    Trial(#[from] TrialError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_item() {
        let err = AttributeError::UnknownAttribute("age".to_string());
        assert_eq!(err.to_string(), "attribute `age` was never declared");

        let err = ConfigurationError::TargetExceedsEdges {
            term: FormationTerm::NodeMatch,
            value: 12.0,
            edges: 10.0,
        };
        assert!(err.to_string().contains("node_match"));
    }

    #[test]
    fn component_errors_lift_into_trial_errors() {
        let err: TrialError = AttributeError::InactiveNode(NodeId(3)).into();
        assert_eq!(err.to_string(), "node 3 is not an active node");
    }
}
