/*!

Partnership formation.

Each dyad class `c` has a cross-sectional edge probability `π_c` from the fitted coefficients and a
per-step survival probability `p_c = 1 - 1/D_c`. Since dissolution runs before formation and only
unjoined dyads can form, a dyad that forms with probability

```text
f_c = π_c (1 - p_c) / (1 - π_c p_c)
```

is joined with stationary probability `π_c`, so the network settles at the target statistics.

Per class the number of new edges is drawn as `Binomial(eligible, f_c)` and that many distinct
unjoined dyads are chosen uniformly. Sparse classes are sampled by rejection; when at least half
of the eligible dyads are needed they are enumerated and sampled without replacement instead.

*/

use crate::{
    attribute::Group,
    context::Context,
    error::{NumericDegeneracy, TrialError},
    estimation::DyadClass,
    model::NetworkModel,
    network::{ContextNetworkExt, NetworkData},
    population::ContextPopulationExt,
    random::ContextRandomExt,
    HashMap, NodeId,
};
use log::trace;
use rand::seq::index;
use rand_distr::Binomial;

crate::define_rng!(FormationRng);

/// The per-step probability that an unjoined dyad forms an edge, given its cross-sectional edge
/// probability and the per-step persistence of its edges.
#[must_use]
pub fn formation_probability(edge_probability: f64, persistence: f64) -> f64 {
    let denominator = 1.0 - edge_probability * persistence;
    if denominator <= 0.0 {
        return 1.0;
    }
    edge_probability * (1.0 - persistence) / denominator
}

#[derive(Debug, Default)]
pub(crate) struct FormationOutcome {
    pub formed: usize,
    pub degeneracies: Vec<NumericDegeneracy>,
}

/// Active nodes grouped by `Group`, each list in id order.
fn group_members(context: &Context, group_count: usize) -> Result<Vec<Vec<NodeId>>, TrialError> {
    let mut members = vec![vec![]; group_count];
    for node in context.active_nodes() {
        let Group(group) = context.get_attribute::<Group>(node)?;
        if let Some(list) = members.get_mut(group as usize) {
            list.push(node);
        }
    }
    Ok(members)
}

fn class_of(context: &Context, a: NodeId, b: NodeId) -> Result<DyadClass, TrialError> {
    let Group(ga) = context.get_attribute::<Group>(a)?;
    let Group(gb) = context.get_attribute::<Group>(b)?;
    Ok(DyadClass::new(ga, gb))
}

fn edge_counts_by_class(context: &mut Context) -> Result<HashMap<DyadClass, u64>, TrialError> {
    let keys = context.get_data_container_mut::<NetworkData>().sorted_keys();
    let mut counts = HashMap::default();
    for (a, b) in keys {
        *counts.entry(class_of(context, a, b)?).or_insert(0) += 1;
    }
    Ok(counts)
}

fn dyad_count(members: &[Vec<NodeId>], class: DyadClass) -> u64 {
    let low = members[class.low as usize].len() as u64;
    if class.is_same_group() {
        low * low.saturating_sub(1) / 2
    } else {
        low * members[class.high as usize].len() as u64
    }
}

/// Joins `count` distinct, currently unjoined dyads of `class`, chosen uniformly.
fn join_dyads(
    context: &mut Context,
    members: &[Vec<NodeId>],
    class: DyadClass,
    count: usize,
    eligible: u64,
    duration: f64,
) -> Result<(), TrialError> {
    if count == 0 {
        return Ok(());
    }
    let low = &members[class.low as usize];
    let high = &members[class.high as usize];

    if (count as u64).saturating_mul(2) > eligible {
        let mut dyads = vec![];
        if class.is_same_group() {
            for (i, &a) in low.iter().enumerate() {
                for &b in &low[i + 1..] {
                    if !context.has_edge(a, b) {
                        dyads.push((a, b));
                    }
                }
            }
        } else {
            for &a in low {
                for &b in high {
                    if !context.has_edge(a, b) {
                        dyads.push((a, b));
                    }
                }
            }
        }
        let amount = count.min(dyads.len());
        let chosen = context.sample::<FormationRng, _>(|rng| index::sample(rng, dyads.len(), amount));
        for i in chosen {
            let (a, b) = dyads[i];
            context.add_edge(a, b, duration)?;
        }
        return Ok(());
    }

    let mut joined = 0;
    while joined < count {
        let (a, b) = if class.is_same_group() {
            let i = context.sample_range::<FormationRng, _, usize>(0..low.len());
            let mut j = context.sample_range::<FormationRng, _, usize>(0..low.len() - 1);
            if j >= i {
                j += 1;
            }
            (low[i], low[j])
        } else {
            let i = context.sample_range::<FormationRng, _, usize>(0..low.len());
            let j = context.sample_range::<FormationRng, _, usize>(0..high.len());
            (low[i], high[j])
        };
        if !context.has_edge(a, b) {
            context.add_edge(a, b, duration)?;
            joined += 1;
        }
    }
    Ok(())
}

fn sample_binomial(context: &mut Context, trials: u64, p: f64) -> Result<usize, TrialError> {
    if trials == 0 {
        return Ok(0);
    }
    let binomial =
        Binomial::new(trials, p.clamp(0.0, 1.0)).map_err(|e| TrialError::Distribution(e.to_string()))?;
    let draw: u64 = context.sample_distr::<FormationRng, u64>(binomial);
    Ok(usize::try_from(draw).unwrap_or(usize::MAX))
}

/// Runs one formation pass. `offset` is added to every linear predictor; it carries the
/// population size correction of the edges coefficient.
pub(crate) fn form_edges(
    context: &mut Context,
    model: &NetworkModel,
    offset: f64,
) -> Result<FormationOutcome, TrialError> {
    let members = group_members(context, model.group_count())?;
    let existing = edge_counts_by_class(context)?;
    let mut outcome = FormationOutcome::default();

    for class in DyadClass::all(model.group_count()) {
        let dyads = dyad_count(&members, class);
        let eligible = dyads.saturating_sub(existing.get(&class).copied().unwrap_or(0));
        if eligible == 0 {
            continue;
        }

        let formation = model.formation();
        let edge_probability = formation.edge_probability(class, offset);
        let probability = formation_probability(edge_probability, model.total_persistence(class));
        // Pinned classes were already reported when the model was estimated.
        let pinned = formation.pinned_probability(class).is_some();
        if !pinned && (probability <= 0.0 || probability >= 1.0) {
            outcome.degeneracies.push(NumericDegeneracy::FormationSaturated {
                low: class.low,
                high: class.high,
                probability,
            });
        }

        let count = sample_binomial(context, eligible, probability)?;
        join_dyads(
            context,
            &members,
            class,
            count,
            eligible,
            model.expected_duration(class),
        )?;
        outcome.formed += count;
    }

    trace!(
        "step {}: formed {} edges",
        context.current_step(),
        outcome.formed
    );
    Ok(outcome)
}

/// Draws the starting network: every dyad is joined independently with its cross-sectional edge
/// probability. Returns the number of edges created.
pub(crate) fn seed_network(context: &mut Context, model: &NetworkModel) -> Result<usize, TrialError> {
    let members = group_members(context, model.group_count())?;
    let mut total = 0;
    for class in DyadClass::all(model.group_count()) {
        let dyads = dyad_count(&members, class);
        let probability = model.formation().edge_probability(class, 0.0);
        let count = sample_binomial(context, dyads, probability)?;
        join_dyads(
            context,
            &members,
            class,
            count,
            dyads,
            model.expected_duration(class),
        )?;
        total += count;
    }
    Ok(total)
}

/// The current value of every formation term of the model, in term order.
pub(crate) fn formation_statistics(
    context: &mut Context,
    model: &NetworkModel,
) -> Result<Vec<f64>, TrialError> {
    let terms = model.formation().terms();
    let mut statistics = vec![0.0; terms.len()];
    for (class, edges) in edge_counts_by_class(context)? {
        #[allow(clippy::cast_precision_loss)]
        let edges = edges as f64;
        for (statistic, x) in statistics.iter_mut().zip(class.covariates(terms)) {
            *statistic += edges * x;
        }
    }
    Ok(statistics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attribute::DiseaseStatus,
        config::{FormationTerm, Parameters, TargetStatistic},
        dissolution::dissolve_edges,
    };

    fn populated(model: &NetworkModel, seed: u64) -> Context {
        let mut context = Context::new();
        context.init_random(seed);
        context.declare_attribute::<Group>();
        context.declare_attribute::<DiseaseStatus>();
        for (group, size) in model.parameters().group_sizes.iter().enumerate() {
            for _ in 0..*size {
                context
                    .allocate_node((Group(group as u32), DiseaseStatus::Susceptible))
                    .unwrap();
            }
        }
        context
    }

    #[test]
    fn stationary_probability_matches_cross_section() {
        for (pi, p) in [(0.01, 0.9), (0.2, 0.5), (0.001, 0.98)] {
            let f = formation_probability(pi, p);
            // Stationarity: edges lost equal edges formed.
            let lost = pi * (1.0 - p);
            let gained = (1.0 - pi * p) * f;
            assert!((lost - gained).abs() < 1e-15);
        }
        assert_eq!(formation_probability(0.3, 0.0), 0.3);
    }

    #[test]
    fn seed_network_is_near_target() {
        let model = NetworkModel::estimate(Parameters::default()).unwrap();
        let mut context = populated(&model, 11);
        let edges = seed_network(&mut context, &model).unwrap();
        assert_eq!(edges, context.edge_count());
        // Sd of the edge count is about 13.
        assert!((edges as f64 - 175.0).abs() < 60.0, "{edges} edges");
        context.check_network_invariants().unwrap();
    }

    #[test]
    fn statistics_follow_edge_classes() {
        let model = NetworkModel::estimate(Parameters::default()).unwrap();
        let mut context = populated(&model, 5);
        let nodes = context.active_nodes();
        // Nodes 0..250 are in group 0 and 250..500 in group 1.
        context.add_edge(nodes[0], nodes[1], 50.0).unwrap();
        context.add_edge(nodes[0], nodes[300], 50.0).unwrap();
        context.add_edge(nodes[301], nodes[302], 50.0).unwrap();

        let statistics = formation_statistics(&mut context, &model).unwrap();
        // edges, node_factor(1), node_match
        assert_eq!(statistics, vec![3.0, 3.0, 2.0]);
    }

    #[test]
    fn dense_classes_are_enumerated() {
        let parameters = Parameters {
            population_size: 12,
            group_sizes: vec![12],
            formation_targets: vec![TargetStatistic::new(FormationTerm::Edges, 60.0)],
            mean_partnership_duration: 1.0,
            initial_infected_count: 0,
            ..Parameters::default()
        };
        let model = NetworkModel::estimate(parameters).unwrap();
        let mut context = populated(&model, 2);
        let outcome = form_edges(&mut context, &model, 0.0).unwrap();
        // With unit duration the formation probability equals the density of 60 / 66.
        assert_eq!(outcome.formed, context.edge_count());
        assert!(outcome.formed > 40);
        context.check_network_invariants().unwrap();
    }

    #[test]
    fn turnover_keeps_edges_near_target() {
        let model = NetworkModel::estimate(Parameters {
            mean_partnership_duration: 10.0,
            exogenous_departure_rate: 0.0,
            ..Parameters::default()
        })
        .unwrap();
        let mut context = populated(&model, 17);
        seed_network(&mut context, &model).unwrap();

        let mut total = 0;
        let steps = 400;
        for _ in 0..steps {
            context.advance_step();
            dissolve_edges(&mut context, model.dissolution()).unwrap();
            form_edges(&mut context, &model, 0.0).unwrap();
            total += context.edge_count();
        }
        let mean = total as f64 / f64::from(steps);
        assert!((mean - 175.0).abs() < 17.5, "mean edge count {mean}");
    }

    #[test]
    fn new_edges_carry_their_class_duration() {
        let model = NetworkModel::estimate(Parameters {
            mixed_group_duration: Some(5.0),
            ..Parameters::default()
        })
        .unwrap();
        let mut context = populated(&model, 23);
        seed_network(&mut context, &model).unwrap();
        for edge in context.edge_list() {
            let (a, b) = edge.endpoints();
            let same = context.get_attribute::<Group>(a).unwrap() == context.get_attribute::<Group>(b).unwrap();
            let expected = if same { 50.0 } else { 5.0 };
            assert_eq!(edge.expected_duration(), expected);
        }
    }

    #[test]
    fn pinned_classes_never_form_edges() {
        let model = NetworkModel::estimate(Parameters {
            formation_targets: vec![
                TargetStatistic::new(FormationTerm::Edges, 175.0),
                TargetStatistic::new(FormationTerm::NodeMatch, 0.0),
            ],
            ..Parameters::default()
        })
        .unwrap();
        assert_eq!(model.degeneracies().len(), 2);

        let mut context = populated(&model, 29);
        seed_network(&mut context, &model).unwrap();
        for _ in 0..20 {
            context.advance_step();
            dissolve_edges(&mut context, model.dissolution()).unwrap();
            let outcome = form_edges(&mut context, &model, 0.0).unwrap();
            assert!(outcome.degeneracies.is_empty());
        }
        // edges, node_match
        let statistics = formation_statistics(&mut context, &model).unwrap();
        assert!(statistics[0] > 0.0);
        assert_eq!(statistics[1], 0.0);
    }
}
