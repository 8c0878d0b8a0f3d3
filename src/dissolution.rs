/*!

Partnership dissolution.

A partnership with mean duration `D` survives each step with probability `1 - 1/D`. When nodes
also leave the population, a partnership ends whenever either partner departs, so the dissolution
draw itself must be made less likely for the observed mean duration to stay at `D`. For partners
in groups with departure rates `d_a` and `d_b` the adjusted persistence is
`(1 - 1/D) / ((1 - d_a)(1 - d_b))`. On the logit scale the crude coefficient is `ln(D - 1)` and
the adjusted coefficient is `logit` of the adjusted persistence.

When the adjustment pushes persistence to 1 or beyond it is clamped to 1 and the condition is
recorded as a `NumericDegeneracy`.

*/

use crate::{
    attribute::Group,
    context::Context,
    error::{NumericDegeneracy, TrialError},
    estimation::DyadClass,
    network::{ContextNetworkExt, Edge, NetworkData},
    population::ContextPopulationExt,
    random::ContextRandomExt,
};
use log::{trace, warn};

crate::define_rng!(DissolutionRng);

/// The dissolution coefficients for one partnership duration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DissolutionCoefficient {
    /// Target mean duration, in steps.
    pub duration: f64,
    /// `ln(D - 1)`, the coefficient ignoring departures.
    pub crude: f64,
    /// `logit` of the departure-adjusted persistence.
    pub adjusted: f64,
    /// Per-step probability that an edge survives its own dissolution draw.
    pub persistence: f64,
}

pub(crate) fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

pub(crate) fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl DissolutionCoefficient {
    /// Computes the coefficients for mean duration `duration` when a partnership also ends with
    /// probability `1 - survival` each step through departures. The flag is set when persistence
    /// had to be clamped to 1.
    #[must_use]
    pub fn new(duration: f64, survival: f64) -> (Self, bool) {
        if duration <= 1.0 {
            let coefficient = DissolutionCoefficient {
                duration,
                crude: f64::NEG_INFINITY,
                adjusted: f64::NEG_INFINITY,
                persistence: 0.0,
            };
            return (coefficient, false);
        }

        let crude_persistence = 1.0 - 1.0 / duration;
        let adjusted_persistence = crude_persistence / survival;

        if adjusted_persistence >= 1.0 {
            let coefficient = DissolutionCoefficient {
                duration,
                crude: logit(crude_persistence),
                adjusted: f64::INFINITY,
                persistence: 1.0,
            };
            return (coefficient, true);
        }

        let coefficient = DissolutionCoefficient {
            duration,
            crude: logit(crude_persistence),
            adjusted: logit(adjusted_persistence),
            persistence: adjusted_persistence,
        };
        (coefficient, false)
    }
}

/// Dissolution coefficients for every dyad class of the model. Partnerships within a group use
/// the mean duration; partnerships across groups use the mixed-group duration when it is
/// configured. Each class is adjusted for the departure rates of its two groups.
#[derive(Clone, Debug, PartialEq)]
pub struct DissolutionModel {
    mean_duration: f64,
    mixed_group_duration: Option<f64>,
    departure_rates: Vec<f64>,
    coefficients: Vec<(DyadClass, DissolutionCoefficient)>,
    degeneracies: Vec<NumericDegeneracy>,
}

impl DissolutionModel {
    /// Computes the coefficients of every class for groups with the given departure rates.
    #[must_use]
    pub fn new(
        mean_duration: f64,
        mixed_group_duration: Option<f64>,
        departure_rates: &[f64],
    ) -> Self {
        let mut coefficients = vec![];
        let mut degeneracies = vec![];
        for class in DyadClass::all(departure_rates.len()) {
            let duration = match mixed_group_duration {
                Some(mixed) if !class.is_same_group() => mixed,
                _ => mean_duration,
            };
            let survival = (1.0 - departure_rates[class.low as usize])
                * (1.0 - departure_rates[class.high as usize]);
            let (coefficient, clamped) = DissolutionCoefficient::new(duration, survival);
            if clamped {
                let degeneracy = NumericDegeneracy::DissolutionClamped {
                    low: class.low,
                    high: class.high,
                    duration,
                };
                warn!("{degeneracy}");
                degeneracies.push(degeneracy);
            }
            coefficients.push((class, coefficient));
        }

        DissolutionModel {
            mean_duration,
            mixed_group_duration,
            departure_rates: departure_rates.to_vec(),
            coefficients,
            degeneracies,
        }
    }

    /// The same durations with no departure adjustment, for simulating a closed population.
    #[must_use]
    pub fn crude(&self) -> Self {
        DissolutionModel::new(
            self.mean_duration,
            self.mixed_group_duration,
            &vec![0.0; self.departure_rates.len()],
        )
    }

    #[must_use]
    pub fn departure_rates(&self) -> &[f64] {
        &self.departure_rates
    }

    #[must_use]
    pub fn coefficient(&self, class: DyadClass) -> Option<&DissolutionCoefficient> {
        self.coefficients
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, coefficient)| coefficient)
    }

    /// Coefficients of every class, in `(low, high)` order.
    #[must_use]
    pub fn coefficients(&self) -> &[(DyadClass, DissolutionCoefficient)] {
        &self.coefficients
    }

    /// Per-step probability that a partnership in `class` survives its dissolution draw. Classes
    /// outside the model never persist.
    #[must_use]
    pub fn persistence(&self, class: DyadClass) -> f64 {
        self.coefficient(class).map_or(0.0, |c| c.persistence)
    }

    /// The target mean duration of a partnership within a group or across groups.
    #[must_use]
    pub fn duration(&self, same_group: bool) -> f64 {
        match self.mixed_group_duration {
            Some(mixed) if !same_group => mixed,
            _ => self.mean_duration,
        }
    }

    #[must_use]
    pub fn is_heterogeneous(&self) -> bool {
        self.mixed_group_duration.is_some()
    }

    /// Degeneracies found while computing the coefficients.
    #[must_use]
    pub fn degeneracies(&self) -> &[NumericDegeneracy] {
        &self.degeneracies
    }
}

/// Runs one dissolution pass: every edge survives independently with the persistence of its
/// duration class. Edges are visited in endpoint order. Returns the dissolved edges.
pub(crate) fn dissolve_edges(
    context: &mut Context,
    model: &DissolutionModel,
) -> Result<Vec<Edge>, TrialError> {
    let keys = context.get_data_container_mut::<NetworkData>().sorted_keys();
    let mut dissolved = vec![];

    for (a, b) in keys {
        let class = DyadClass::new(
            context.get_attribute::<Group>(a)?.0,
            context.get_attribute::<Group>(b)?.0,
        );
        let persists = context.sample_bool::<DissolutionRng>(model.persistence(class));
        if !persists {
            if let Some(edge) = context.remove_edge(a, b) {
                dissolved.push(edge);
            }
        }
    }

    trace!(
        "step {}: dissolved {} edges",
        context.current_step(),
        dissolved.len()
    );
    Ok(dissolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::DiseaseStatus;

    #[test]
    fn crude_coefficient_is_log_of_duration_minus_one() {
        let (coefficient, clamped) = DissolutionCoefficient::new(50.0, 1.0);
        assert!(!clamped);
        assert!((coefficient.crude - 49.0_f64.ln()).abs() < 1e-12);
        assert!((coefficient.adjusted - coefficient.crude).abs() < 1e-12);
        assert!((coefficient.persistence - 0.98).abs() < 1e-12);
    }

    #[test]
    fn coefficient_increases_with_duration() {
        let durations = [2.0, 5.0, 10.0, 50.0, 100.0];
        let coefficients: Vec<f64> = durations
            .iter()
            .map(|d| DissolutionCoefficient::new(*d, 0.998).0.adjusted)
            .collect();
        assert!(coefficients.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn departures_inflate_the_adjusted_coefficient() {
        for rate in [0.001_f64, 0.005, 0.01] {
            let (coefficient, clamped) = DissolutionCoefficient::new(20.0, (1.0 - rate).powi(2));
            assert!(!clamped);
            assert!(coefficient.adjusted > coefficient.crude);
            // Dissolution and both departures together leave the total survival at 1 - 1/D.
            let survival = coefficient.persistence * (1.0 - rate).powi(2);
            assert!((survival - 0.95).abs() < 1e-12);
        }
    }

    #[test]
    fn persistence_at_one_is_clamped_and_reported() {
        let (coefficient, clamped) = DissolutionCoefficient::new(1000.0, 0.9);
        assert!(clamped);
        assert_eq!(coefficient.persistence, 1.0);
        assert_eq!(coefficient.adjusted, f64::INFINITY);

        let model = DissolutionModel::new(1000.0, None, &[0.05]);
        assert_eq!(
            model.degeneracies(),
            [NumericDegeneracy::DissolutionClamped { low: 0, high: 0, duration: 1000.0 }]
        );
    }

    #[test]
    fn unit_duration_never_persists() {
        for survival in [1.0, 0.9, 0.25] {
            let (coefficient, clamped) = DissolutionCoefficient::new(1.0, survival);
            assert!(!clamped);
            assert_eq!(coefficient.persistence, 0.0);
        }
    }

    #[test]
    fn mixed_group_duration_applies_across_groups_only() {
        let model = DissolutionModel::new(40.0, Some(10.0), &[0.0, 0.0]);
        assert!(model.is_heterogeneous());
        assert_eq!(model.duration(true), 40.0);
        assert_eq!(model.duration(false), 10.0);
        assert!((model.persistence(DyadClass::new(1, 0)) - 0.9).abs() < 1e-12);
        assert!((model.persistence(DyadClass::new(1, 1)) - 0.975).abs() < 1e-12);

        let homogeneous = DissolutionModel::new(40.0, None, &[0.0, 0.0]);
        assert_eq!(homogeneous.duration(false), 40.0);
        assert!(homogeneous.degeneracies().is_empty());
    }

    #[test]
    fn mixed_class_adjusts_for_both_departure_rates() {
        let rates = [0.01, 0.04];
        let model = DissolutionModel::new(20.0, None, &rates);
        let crude = 0.95;
        let expected = [
            (DyadClass::new(0, 0), crude / (0.99 * 0.99)),
            (DyadClass::new(0, 1), crude / (0.99 * 0.96)),
            (DyadClass::new(1, 1), crude / (0.96 * 0.96)),
        ];
        for (class, persistence) in expected {
            assert!(
                (model.persistence(class) - persistence).abs() < 1e-12,
                "class {class}"
            );
        }
        // Total survival of a mixed partnership is back at 1 - 1/D.
        let mixed = model.persistence(DyadClass::new(1, 0)) * (1.0 - rates[0]) * (1.0 - rates[1]);
        assert!((mixed - crude).abs() < 1e-12);
        assert_eq!(model.persistence(DyadClass::new(0, 2)), 0.0);
    }

    #[test]
    fn model_collects_degeneracies_of_every_class() {
        let model = DissolutionModel::new(1000.0, Some(2000.0), &[0.05, 0.0]);
        // Only classes touching group 0 lose enough partnerships to departures to clamp.
        assert_eq!(model.degeneracies().len(), 2);
        assert!((model.persistence(DyadClass::new(1, 1)) - 0.999).abs() < 1e-12);

        let crude = model.crude();
        assert!(crude.degeneracies().is_empty());
        assert_eq!(crude.departure_rates(), [0.0, 0.0]);
        assert!((crude.persistence(DyadClass::new(0, 1)) - (1.0 - 1.0 / 2000.0)).abs() < 1e-12);
    }

    fn two_group_context(n: usize) -> Context {
        let mut context = Context::new();
        context.init_random(3);
        context.declare_attribute::<Group>();
        context.declare_attribute::<DiseaseStatus>();
        let nodes: Vec<_> = (0..n)
            .map(|i| {
                let group = Group(u32::from(i % 2 == 1));
                context
                    .allocate_node((group, DiseaseStatus::Susceptible))
                    .unwrap()
            })
            .collect();
        for pair in nodes.chunks(2) {
            context.add_edge(pair[0], pair[1], 1.0).unwrap();
        }
        context
    }

    #[test]
    fn unit_duration_dissolves_every_edge() {
        let mut context = two_group_context(20);
        let model = DissolutionModel::new(1.0, None, &[0.2, 0.2]);
        let dissolved = dissolve_edges(&mut context, &model).unwrap();
        assert_eq!(dissolved.len(), 10);
        assert_eq!(context.edge_count(), 0);
    }

    #[test]
    fn dissolved_fraction_matches_persistence() {
        let mut context = two_group_context(4000);
        let model = DissolutionModel::new(4.0, None, &[0.0, 0.0]);
        let dissolved = dissolve_edges(&mut context, &model).unwrap();
        // Expect a quarter of 2000 edges to dissolve.
        assert!((dissolved.len() as f64 - 500.0).abs() < 80.0);
        assert_eq!(context.edge_count() + dissolved.len(), 2000);
    }
}
