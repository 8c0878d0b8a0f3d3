/*!

Temporal-network epidemic simulation.

A population of nodes carrying typed attributes lives in a [`Context`]. Partnerships form and
dissolve according to an estimated [`NetworkModel`], nodes arrive and depart, and infection
spreads across partnerships. The [`SimulationDriver`] runs many independent trials of this
pipeline and hands back per-step records for the [`report`] module to summarise.

```no_run
use epinet::{NetworkModel, Parameters, SimulationDriver};

let parameters = Parameters::from_json_file("parameters.json").unwrap();
let model = NetworkModel::estimate(parameters).unwrap();
let run = SimulationDriver::new(&model).run().unwrap();
println!("{} trials completed", run.completed().count());
```

*/

pub mod attribute;
mod attribute_map;
pub mod config;
pub mod context;
pub mod demography;
pub mod diagnostics;
pub mod dissolution;
pub mod driver;
pub mod epidemic;
pub mod error;
pub mod estimation;
pub mod formation;
mod hashing;
pub mod logging;
pub mod model;
pub mod network;
pub mod population;
pub mod random;
pub mod report;
mod trait_map;
pub mod trial;

// All modules import `crate::TypeId` in case we want to change the underlying type of `TypeId`.
pub(crate) use std::any::TypeId;

pub use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

// Re-exported so that `define_rng!` can name `$crate::rand::rngs::StdRng`.
pub use rand;

pub use attribute::{Attribute, DiseaseStatus, Group};
pub use config::{FailureMode, FormationTerm, Parameters, TargetStatistic};
pub use context::{Context, DataPlugin};
pub use driver::{SimulationDriver, SimulationRun, TrialOutcome, TrialStatus};
pub use error::{
    AttributeError, ConfigurationError, EpiNetError, EstimationError, NetworkError,
    NumericDegeneracy, SimulationError, TrialError,
};
pub use model::NetworkModel;
pub use network::{ContextNetworkExt, Edge};
pub use population::ContextPopulationExt;
pub use random::ContextRandomExt;

#[inline(always)]
pub fn type_of<T: 'static>() -> TypeId {
    TypeId::of::<T>()
}

/// A stable handle to a node. Ids are allocated monotonically and never reused, so a departed
/// node's id can never alias a later arrival.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {}", self.0)
    }
}
