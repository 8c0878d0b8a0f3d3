//! Arrivals and departures. Departures run before arrivals within a step, and the arrival count
//! is based on the population size at the start of the step.

use crate::{
    attribute::{DiseaseStatus, Group},
    config::Parameters,
    context::Context,
    error::TrialError,
    population::ContextPopulationExt,
    random::ContextRandomExt,
    NodeId,
};
use log::trace;
use rand_distr::Poisson;

crate::define_rng!(DemographyRng);

/// Each active node departs independently with the departure rate of its disease status.
/// Departing nodes lose all their edges. Returns the departed nodes.
pub(crate) fn run_departures(
    context: &mut Context,
    parameters: &Parameters,
) -> Result<Vec<NodeId>, TrialError> {
    if parameters.departure_rate_susceptible == 0.0 && parameters.departure_rate_infected == 0.0 {
        return Ok(vec![]);
    }

    let mut departed = vec![];
    for node in context.active_nodes() {
        let rate = match context.get_attribute::<DiseaseStatus>(node)? {
            DiseaseStatus::Susceptible => parameters.departure_rate_susceptible,
            DiseaseStatus::Infected => parameters.departure_rate_infected,
        };
        if context.sample_bool::<DemographyRng>(rate) {
            context.deactivate_node(node)?;
            departed.push(node);
        }
    }

    trace!(
        "step {}: {} departures",
        context.current_step(),
        departed.len()
    );
    Ok(departed)
}

/// Adds `Poisson(arrival_rate * population)` susceptible nodes, each in a group drawn from the
/// arrival weights. Returns the new nodes.
pub(crate) fn run_arrivals(
    context: &mut Context,
    parameters: &Parameters,
    population: usize,
) -> Result<Vec<NodeId>, TrialError> {
    #[allow(clippy::cast_precision_loss)]
    let mean = parameters.arrival_rate * population as f64;
    if mean <= 0.0 {
        return Ok(vec![]);
    }

    let poisson = Poisson::new(mean).map_err(|e| TrialError::Distribution(e.to_string()))?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = context.sample_distr::<DemographyRng, f64>(poisson) as usize;

    let weights = parameters.arrival_weights();
    let mut arrived = Vec::with_capacity(count);
    for _ in 0..count {
        let group = context
            .sample_weighted::<DemographyRng, f64>(&weights)
            .map_err(|e| TrialError::Distribution(e.to_string()))?;
        let group = Group::try_from(group)?;
        arrived.push(context.allocate_node((group, DiseaseStatus::Susceptible))?);
    }

    trace!("step {}: {count} arrivals", context.current_step());
    Ok(arrived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ContextNetworkExt;

    fn context(parameters: &Parameters) -> Context {
        let mut context = Context::new();
        context.init_random(parameters.seed);
        context.declare_attribute::<Group>();
        context.declare_attribute::<DiseaseStatus>();
        for (i, size) in parameters.group_sizes.iter().enumerate() {
            for j in 0..*size {
                let status = if j % 2 == 0 {
                    DiseaseStatus::Susceptible
                } else {
                    DiseaseStatus::Infected
                };
                context
                    .allocate_node((Group(i as u32), status))
                    .unwrap();
            }
        }
        context
    }

    #[test]
    fn departure_rates_depend_on_status() {
        let parameters = Parameters {
            population_size: 2000,
            group_sizes: vec![2000],
            departure_rate_susceptible: 0.0,
            departure_rate_infected: 1.0,
            ..Parameters::default()
        };
        let mut context = context(&parameters);
        let departed = run_departures(&mut context, &parameters).unwrap();
        assert_eq!(departed.len(), 1000);
        assert_eq!(context.count_nodes(DiseaseStatus::Infected).unwrap(), 0);
        assert_eq!(context.active_node_count(), 1000);
    }

    #[test]
    fn departures_remove_incident_edges() {
        let parameters = Parameters {
            population_size: 4,
            group_sizes: vec![4],
            departure_rate_susceptible: 0.0,
            departure_rate_infected: 1.0,
            ..Parameters::default()
        };
        let mut context = context(&parameters);
        let nodes = context.active_nodes();
        context.add_edge(nodes[0], nodes[1], 10.0).unwrap();
        context.add_edge(nodes[0], nodes[2], 10.0).unwrap();
        context.add_edge(nodes[2], nodes[3], 10.0).unwrap();

        // Nodes 1 and 3 are infected and leave.
        let departed = run_departures(&mut context, &parameters).unwrap();
        assert_eq!(departed, vec![nodes[1], nodes[3]]);
        assert_eq!(context.edge_count(), 1);
        assert!(context.has_edge(nodes[0], nodes[2]));
        context.check_network_invariants().unwrap();
    }

    #[test]
    fn arrivals_are_susceptible_and_follow_weights() {
        let parameters = Parameters {
            population_size: 1000,
            group_sizes: vec![500, 500],
            arrival_rate: 1.0,
            arrival_group_weights: Some(vec![0.0, 1.0]),
            ..Parameters::default()
        };
        let mut context = context(&parameters);
        let arrived = run_arrivals(&mut context, &parameters, 1000).unwrap();

        // Poisson(1000) has a standard deviation of about 32.
        assert!((arrived.len() as f64 - 1000.0).abs() < 160.0);
        for node in arrived {
            assert_eq!(context.get_attribute::<Group>(node).unwrap(), Group(1));
            assert_eq!(
                context.get_attribute::<DiseaseStatus>(node).unwrap(),
                DiseaseStatus::Susceptible
            );
            assert!(node.index() >= 1000);
        }
    }

    #[test]
    fn zero_rates_do_nothing() {
        let parameters = Parameters {
            arrival_rate: 0.0,
            departure_rate_susceptible: 0.0,
            departure_rate_infected: 0.0,
            ..Parameters::default()
        };
        let mut context = context(&parameters);
        assert!(run_departures(&mut context, &parameters).unwrap().is_empty());
        assert!(run_arrivals(&mut context, &parameters, 500).unwrap().is_empty());
        assert_eq!(context.active_node_count(), 500);
    }
}
