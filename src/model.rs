//! The estimated network model shared read-only by every trial.

use crate::{
    config::Parameters,
    dissolution::DissolutionModel,
    error::{EpiNetError, NumericDegeneracy},
    estimation::{fit_formation, DyadClass, FormationCoefficients},
};
use log::info;

/// Formation and dissolution coefficients together with the parameters they were estimated from.
/// Built once by `estimate` and never modified afterwards.
#[derive(Clone, Debug)]
pub struct NetworkModel {
    parameters: Parameters,
    formation: FormationCoefficients,
    dissolution: DissolutionModel,
    degeneracies: Vec<NumericDegeneracy>,
}

impl NetworkModel {
    /// Validates `parameters`, computes the dissolution coefficients and fits the formation
    /// coefficients to the target statistics.
    pub fn estimate(parameters: Parameters) -> Result<Self, EpiNetError> {
        parameters.validate()?;

        let dissolution = DissolutionModel::new(
            parameters.mean_partnership_duration,
            parameters.mixed_group_duration,
            &parameters.group_departure_rates(),
        );
        let (formation, mut degeneracies) =
            fit_formation(&parameters.group_sizes, &parameters.formation_targets)?;
        degeneracies.extend_from_slice(dissolution.degeneracies());

        for (term, value) in formation.terms().iter().zip(formation.values()) {
            info!("formation coefficient {term}: {value:.4}");
        }
        for (class, coefficient) in dissolution.coefficients() {
            info!(
                "dissolution coefficient {class}: crude {:.4}, adjusted {:.4}",
                coefficient.crude, coefficient.adjusted
            );
        }

        Ok(NetworkModel {
            parameters,
            formation,
            dissolution,
            degeneracies,
        })
    }

    #[must_use]
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    #[must_use]
    pub fn formation(&self) -> &FormationCoefficients {
        &self.formation
    }

    #[must_use]
    pub fn dissolution(&self) -> &DissolutionModel {
        &self.dissolution
    }

    /// Degeneracies found during estimation: pinned formation classes, then clamped dissolution
    /// classes.
    #[must_use]
    pub fn degeneracies(&self) -> &[NumericDegeneracy] {
        &self.degeneracies
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.parameters.group_count()
    }

    /// Target mean duration of a partnership in `class`.
    #[must_use]
    pub fn expected_duration(&self, class: DyadClass) -> f64 {
        self.dissolution.duration(class.is_same_group())
    }

    /// Probability that a partnership in `class` survives one step, departures included, at the
    /// requested duration. The formation rate is derived from this rather than from the
    /// departure-adjusted persistence.
    #[must_use]
    pub fn total_persistence(&self, class: DyadClass) -> f64 {
        let duration = self.expected_duration(class);
        if duration <= 1.0 {
            0.0
        } else {
            1.0 - 1.0 / duration
        }
    }
}
