//! Susceptible to infected transmission over discordant partnerships.
//!
//! Transmission is synchronous: every susceptible node's exposure is counted against the disease
//! states at the start of the stage, so a node infected in this stage cannot infect anyone until
//! the next step.

use crate::{
    attribute::DiseaseStatus,
    config::Parameters,
    context::Context,
    error::TrialError,
    network::NetworkData,
    population::ContextPopulationExt,
    random::ContextRandomExt,
    HashMap, NodeId,
};
use log::trace;

crate::define_rng!(TransmissionRng);

/// Probability that a susceptible node with `infected_partners` infected partners is infected
/// during one step.
#[must_use]
pub fn transmission_probability(per_act: f64, acts_per_step: f64, infected_partners: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let exposures = acts_per_step * infected_partners as f64;
    1.0 - (1.0 - per_act).powf(exposures)
}

/// Runs one transmission stage and returns the newly infected nodes in id order.
pub(crate) fn transmit(context: &mut Context, parameters: &Parameters) -> Result<Vec<NodeId>, TrialError> {
    let keys = context.get_data_container_mut::<NetworkData>().sorted_keys();
    let mut exposure: HashMap<NodeId, usize> = HashMap::default();
    for (a, b) in keys {
        let status_a = context.get_attribute::<DiseaseStatus>(a)?;
        let status_b = context.get_attribute::<DiseaseStatus>(b)?;
        match (status_a, status_b) {
            (DiseaseStatus::Susceptible, DiseaseStatus::Infected) => *exposure.entry(a).or_default() += 1,
            (DiseaseStatus::Infected, DiseaseStatus::Susceptible) => *exposure.entry(b).or_default() += 1,
            _ => {}
        }
    }

    let mut exposed: Vec<(NodeId, usize)> = exposure.into_iter().collect();
    exposed.sort_unstable();

    let mut infected = vec![];
    for (node, partners) in exposed {
        let probability = transmission_probability(
            parameters.infection_probability_per_act,
            parameters.acts_per_step,
            partners,
        );
        if context.sample_bool::<TransmissionRng>(probability) {
            infected.push(node);
        }
    }
    for node in &infected {
        context.set_attribute(*node, DiseaseStatus::Infected)?;
    }

    trace!(
        "step {}: {} new infections",
        context.current_step(),
        infected.len()
    );
    Ok(infected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{attribute::Group, network::ContextNetworkExt};

    #[test]
    fn probability_compounds_over_acts_and_partners() {
        assert_eq!(transmission_probability(0.5, 1.0, 0), 0.0);
        assert!((transmission_probability(0.5, 1.0, 1) - 0.5).abs() < 1e-12);
        assert!((transmission_probability(0.5, 2.0, 1) - 0.75).abs() < 1e-12);
        assert!((transmission_probability(0.5, 1.0, 3) - 0.875).abs() < 1e-12);
        assert_eq!(transmission_probability(1.0, 1.0, 1), 1.0);
        assert_eq!(transmission_probability(0.3, 0.0, 4), 0.0);
    }

    fn chain(statuses: &[DiseaseStatus]) -> (Context, Vec<NodeId>) {
        let mut context = Context::new();
        context.init_random(9);
        context.declare_attribute::<Group>();
        context.declare_attribute::<DiseaseStatus>();
        let nodes: Vec<_> = statuses
            .iter()
            .map(|status| context.allocate_node((Group(0), *status)).unwrap())
            .collect();
        for pair in nodes.windows(2) {
            context.add_edge(pair[0], pair[1], 10.0).unwrap();
        }
        (context, nodes)
    }

    #[test]
    fn infection_is_synchronous() {
        use DiseaseStatus::{Infected, Susceptible};
        // I - S - S: with certain transmission only the direct partner is infected this step.
        let (mut context, nodes) = chain(&[Infected, Susceptible, Susceptible]);
        let parameters = Parameters {
            infection_probability_per_act: 1.0,
            ..Parameters::default()
        };
        let infected = transmit(&mut context, &parameters).unwrap();
        assert_eq!(infected, vec![nodes[1]]);
        assert_eq!(context.get_attribute::<DiseaseStatus>(nodes[2]).unwrap(), Susceptible);

        let infected = transmit(&mut context, &parameters).unwrap();
        assert_eq!(infected, vec![nodes[2]]);
    }

    #[test]
    fn concordant_partnerships_do_not_transmit() {
        use DiseaseStatus::{Infected, Susceptible};
        let (mut context, _) = chain(&[Susceptible, Susceptible, Infected, Infected]);
        let parameters = Parameters {
            infection_probability_per_act: 1.0,
            ..Parameters::default()
        };
        let infected = transmit(&mut context, &parameters).unwrap();
        assert_eq!(infected.len(), 1);
        assert_eq!(context.count_nodes(Infected).unwrap(), 3);
    }

    #[test]
    fn zero_probability_never_infects() {
        use DiseaseStatus::{Infected, Susceptible};
        let (mut context, _) = chain(&[Infected, Susceptible, Infected, Susceptible]);
        let parameters = Parameters {
            infection_probability_per_act: 0.0,
            ..Parameters::default()
        };
        for _ in 0..20 {
            assert!(transmit(&mut context, &parameters).unwrap().is_empty());
        }
    }
}
