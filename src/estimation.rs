/*!

Estimation of the cross-sectional formation model.

Every supported formation term is dyad-independent and depends on a dyad only through the groups
of its endpoints, so the dyads split into classes, one per unordered pair of groups, and all dyads
of a class share one edge probability `logistic(θ · x_c)`. The coefficients `θ` are the maximum
likelihood estimate for a network whose statistics equal the targets: the values at which each
term's expected value over the dyad classes equals its target.

A target on the boundary of what the classes can hold (zero, or every eligible dyad joined) has no
finite coefficient. The classes it forces are pinned at probability 0 or 1, recorded as
`NumericDegeneracy::FormationPinned`, and the remaining targets are fitted over the free classes.
Terms whose covariates are linearly dependent over the free classes are left at zero; their
targets must then follow from the others or the fit is `Singular`.

The negated log-likelihood `Σ_c N_c ln(1 + exp(θ · x_c)) - θ · t` is convex and is minimized with
`argmin`'s Newton solver, retrying with a damped step when the full step fails to converge.

*/

use crate::{
    config::{FormationTerm, TargetStatistic},
    dissolution::{logistic, logit},
    error::{EstimationError, NumericDegeneracy},
};
use argmin::{
    core::{CostFunction, Error as ArgminError, Executor, Gradient, Hessian},
    solver::newton::Newton,
};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

/// Largest relative difference between an expected statistic and its target accepted as a fit.
pub const TOLERANCE: f64 = 1e-8;
pub const MAX_ITERATIONS: usize = 100;
/// Newton step lengths tried in order.
const STEP_LENGTHS: [f64; 2] = [1.0, 0.5];
const RANK_EPSILON: f64 = 1e-9;
const BOUNDARY_EPSILON: f64 = 1e-9;
/// The dyads whose endpoints belong to groups `low` and `high`, `low <= high`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DyadClass {
    pub low: u32,
    pub high: u32,
}

impl DyadClass {
    #[must_use]
    pub fn new(a: u32, b: u32) -> Self {
        DyadClass {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// Every class for `group_count` groups, in `(low, high)` order.
    #[must_use]
    pub fn all(group_count: usize) -> Vec<DyadClass> {
        let groups = u32::try_from(group_count).unwrap_or(u32::MAX);
        (0..groups)
            .flat_map(|low| (low..groups).map(move |high| DyadClass { low, high }))
            .collect()
    }

    #[must_use]
    pub fn is_same_group(&self) -> bool {
        self.low == self.high
    }

    /// The number of dyads in the class for groups of the given sizes.
    #[must_use]
    pub fn dyad_count(&self, group_sizes: &[f64]) -> f64 {
        let low = group_sizes.get(self.low as usize).copied().unwrap_or(0.0);
        if self.is_same_group() {
            low * (low - 1.0).max(0.0) / 2.0
        } else {
            let high = group_sizes.get(self.high as usize).copied().unwrap_or(0.0);
            low * high
        }
    }

    /// The change statistics of `terms` for one dyad of the class.
    #[must_use]
    pub fn covariates(&self, terms: &[FormationTerm]) -> Vec<f64> {
        terms
            .iter()
            .map(|term| term.change_statistic(self.low, self.high))
            .collect()
    }
}

impl std::fmt::Display for DyadClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}

/// Fitted coefficients of the cross-sectional formation model, one per term, plus the classes
/// pinned at a boundary probability.
#[derive(Clone, Debug, PartialEq)]
pub struct FormationCoefficients {
    terms: Vec<FormationTerm>,
    values: Vec<f64>,
    pinned: Vec<(DyadClass, f64)>,
}

impl FormationCoefficients {
    #[must_use]
    pub fn terms(&self) -> &[FormationTerm] {
        &self.terms
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn get(&self, term: FormationTerm) -> Option<f64> {
        self.terms
            .iter()
            .position(|t| *t == term)
            .map(|index| self.values[index])
    }

    /// Classes whose edge probability was fixed at 0 or 1 by a boundary target.
    #[must_use]
    pub fn pinned(&self) -> &[(DyadClass, f64)] {
        &self.pinned
    }

    #[must_use]
    pub fn pinned_probability(&self, class: DyadClass) -> Option<f64> {
        self.pinned
            .iter()
            .find(|(pinned, _)| *pinned == class)
            .map(|(_, probability)| *probability)
    }

    /// `θ · x_c + offset`.
    #[must_use]
    pub fn linear_predictor(&self, class: DyadClass, offset: f64) -> f64 {
        self.terms
            .iter()
            .zip(&self.values)
            .map(|(term, value)| value * term.change_statistic(class.low, class.high))
            .sum::<f64>()
            + offset
    }

    /// The cross-sectional probability that a dyad of `class` is joined. Pinned classes ignore
    /// `offset`.
    #[must_use]
    pub fn edge_probability(&self, class: DyadClass, offset: f64) -> f64 {
        self.pinned_probability(class)
            .unwrap_or_else(|| logistic(self.linear_predictor(class, offset)))
    }

    /// The expected value of every term for groups of the given sizes.
    #[must_use]
    pub fn expected_statistics(&self, group_sizes: &[f64]) -> Vec<f64> {
        let mut expected = vec![0.0; self.terms.len()];
        for class in DyadClass::all(group_sizes.len()) {
            let edges = class.dyad_count(group_sizes) * self.edge_probability(class, 0.0);
            for (k, x) in class.covariates(&self.terms).into_iter().enumerate() {
                expected[k] += edges * x;
            }
        }
        expected
    }
}

#[derive(Clone)]
struct ClassRow {
    class: DyadClass,
    count: f64,
    covariates: Vec<f64>,
}

/// `ln(1 + e^x)` without overflow.
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

fn relative_residual(expected: f64, target: f64) -> f64 {
    (expected - target).abs() / target.abs().max(1.0)
}

/// The targets and dyad classes of one fit, with every class's pinned probability once the
/// boundary targets have been resolved.
struct ClassTable {
    terms: Vec<FormationTerm>,
    targets: Vec<f64>,
    rows: Vec<ClassRow>,
    pinned: Vec<Option<f64>>,
}

impl ClassTable {
    fn new(group_sizes: &[usize], targets: &[TargetStatistic]) -> Self {
        let terms: Vec<FormationTerm> = targets.iter().map(|t| t.term).collect();
        #[allow(clippy::cast_precision_loss)]
        let sizes: Vec<f64> = group_sizes.iter().map(|n| *n as f64).collect();
        let rows: Vec<ClassRow> = DyadClass::all(group_sizes.len())
            .into_iter()
            .map(|class| ClassRow {
                class,
                count: class.dyad_count(&sizes),
                covariates: class.covariates(&terms),
            })
            .filter(|row| row.count > 0.0)
            .collect();
        ClassTable {
            terms,
            targets: targets.iter().map(|t| t.target).collect(),
            pinned: vec![None; rows.len()],
            rows,
        }
    }

    fn position(&self, term: FormationTerm) -> Option<usize> {
        self.terms.iter().position(|t| *t == term)
    }

    fn free_rows(&self) -> impl Iterator<Item = &ClassRow> {
        self.rows
            .iter()
            .zip(&self.pinned)
            .filter(|(_, pinned)| pinned.is_none())
            .map(|(row, _)| row)
    }

    /// The part of a statistic contributed by pinned classes for the weights `weight(row)`.
    fn fixed(&self, weight: impl Fn(&ClassRow) -> f64) -> f64 {
        self.rows
            .iter()
            .zip(&self.pinned)
            .filter_map(|(row, pinned)| pinned.map(|p| p * row.count * weight(row)))
            .sum()
    }

    fn capacity(&self, weight: impl Fn(&ClassRow) -> f64) -> f64 {
        self.free_rows().map(|row| row.count * weight(row)).sum()
    }

    /// Checks `remaining` against the free capacity of a statistic and pins every free class
    /// carrying it when it sits on a boundary. Returns whether anything was pinned.
    fn pin_boundary(
        &mut self,
        term: FormationTerm,
        remaining: f64,
        weight: impl Fn(&ClassRow) -> f64,
    ) -> Result<bool, EstimationError> {
        let capacity = self.capacity(&weight);
        let epsilon = BOUNDARY_EPSILON * capacity.max(1.0);
        if remaining < -epsilon || remaining > capacity + epsilon {
            return Err(EstimationError::UnrealizableTarget {
                term,
                reason: format!(
                    "requires {remaining} where the unconstrained dyads hold between 0 and {capacity}"
                ),
            });
        }
        if capacity <= 0.0 {
            return Ok(false);
        }
        let probability = if remaining <= epsilon {
            0.0
        } else if remaining >= capacity - epsilon {
            1.0
        } else {
            return Ok(false);
        };

        let mut changed = false;
        for (row, pinned) in self.rows.iter().zip(self.pinned.iter_mut()) {
            if pinned.is_none() && weight(row) > 0.0 {
                *pinned = Some(probability);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Pins the classes forced by boundary targets, repeating until no target sits on a boundary
    /// of the classes still free. A target outside its range is unrealizable.
    fn resolve_boundaries(&mut self) -> Result<(), EstimationError> {
        let has_mixed_dyads = self.rows.iter().any(|row| !row.class.is_same_group());
        let mixing = self
            .position(FormationTerm::Edges)
            .zip(self.position(FormationTerm::NodeMatch))
            .filter(|_| has_mixed_dyads);
        loop {
            let mut changed = false;
            for k in 0..self.terms.len() {
                let remaining = self.targets[k] - self.fixed(|row| row.covariates[k]);
                changed |= self.pin_boundary(self.terms[k], remaining, |row| row.covariates[k])?;
            }
            if let Some((edges, matched)) = mixing {
                let mixed = |row: &ClassRow| f64::from(u8::from(!row.class.is_same_group()));
                let remaining = self.targets[edges] - self.targets[matched] - self.fixed(mixed);
                changed |= self.pin_boundary(FormationTerm::NodeMatch, remaining, mixed)?;
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Target of every term less the part pinned classes already contribute.
    fn remaining_targets(&self) -> Vec<f64> {
        (0..self.terms.len())
            .map(|k| self.targets[k] - self.fixed(|row| row.covariates[k]))
            .collect()
    }

    /// Terms that are identifiable over the free classes, chosen greedily with `edges` first.
    fn identified_terms(&self) -> Vec<usize> {
        let free: Vec<&ClassRow> = self.free_rows().collect();
        let mut order: Vec<usize> = (0..self.terms.len()).collect();
        order.sort_by_key(|&k| self.terms[k] != FormationTerm::Edges);

        let mut kept: Vec<usize> = vec![];
        let mut rank = 0;
        for k in order {
            if free.is_empty() {
                break;
            }
            let mut candidate = kept.clone();
            candidate.push(k);
            let design = DMatrix::from_fn(free.len(), candidate.len(), |i, j| {
                free[i].covariates[candidate[j]]
            });
            let candidate_rank = design.rank(RANK_EPSILON);
            if candidate_rank > rank {
                kept = candidate;
                rank = candidate_rank;
            }
        }
        kept
    }

    /// The pinned classes, logged and recorded as degeneracies.
    fn pinned_classes(&self) -> (Vec<(DyadClass, f64)>, Vec<NumericDegeneracy>) {
        let mut pinned = vec![];
        let mut degeneracies = vec![];
        for (row, probability) in self.rows.iter().zip(&self.pinned) {
            if let Some(probability) = *probability {
                let degeneracy = NumericDegeneracy::FormationPinned {
                    low: row.class.low,
                    high: row.class.high,
                    probability,
                };
                warn!("{degeneracy}");
                pinned.push((row.class, probability));
                degeneracies.push(degeneracy);
            }
        }
        (pinned, degeneracies)
    }
}

/// The negated log-likelihood of the free classes over the identified terms.
#[derive(Clone)]
struct Likelihood {
    targets: DVector<f64>,
    rows: Vec<(f64, DVector<f64>)>,
}

impl Likelihood {
    fn new(table: &ClassTable, kept: &[usize], remaining: &[f64]) -> Self {
        Likelihood {
            targets: DVector::from_iterator(kept.len(), kept.iter().map(|&k| remaining[k])),
            rows: table
                .free_rows()
                .map(|row| {
                    let covariates =
                        DVector::from_iterator(kept.len(), kept.iter().map(|&k| row.covariates[k]));
                    (row.count, covariates)
                })
                .collect(),
        }
    }

    fn dyads(&self) -> f64 {
        self.rows.iter().map(|(count, _)| count).sum()
    }

    fn expected(&self, theta: &DVector<f64>) -> DVector<f64> {
        self.rows
            .iter()
            .fold(DVector::zeros(theta.len()), |expected, (count, x)| {
                expected + x * (count * logistic(theta.dot(x)))
            })
    }

    fn residual(&self, theta: &DVector<f64>) -> f64 {
        self.expected(theta)
            .iter()
            .zip(self.targets.iter())
            .map(|(e, t)| relative_residual(*e, *t))
            .fold(0.0, f64::max)
    }
}

impl CostFunction for Likelihood {
    type Param = DVector<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, ArgminError> {
        let partition: f64 = self
            .rows
            .iter()
            .map(|(count, x)| count * softplus(theta.dot(x)))
            .sum();
        Ok(partition - theta.dot(&self.targets))
    }
}

impl Gradient for Likelihood {
    type Param = DVector<f64>;
    type Gradient = DVector<f64>;

    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, ArgminError> {
        Ok(self.expected(theta) - &self.targets)
    }
}

impl Hessian for Likelihood {
    type Param = DVector<f64>;
    type Hessian = DMatrix<f64>;

    /// The Fisher information `Σ_c N_c p_c (1 - p_c) x_c x_cᵀ`.
    fn hessian(&self, theta: &Self::Param) -> Result<Self::Hessian, ArgminError> {
        let n = theta.len();
        Ok(self
            .rows
            .iter()
            .fold(DMatrix::zeros(n, n), |information, (count, x)| {
                let p = logistic(theta.dot(x));
                information + x * x.transpose() * (count * p * (1.0 - p))
            }))
    }
}

/// Runs Newton's method with step length `gamma` from `initial`. Returns the final parameter and
/// the number of iterations run.
fn run_newton(
    likelihood: &Likelihood,
    initial: DVector<f64>,
    gamma: f64,
) -> Result<(DVector<f64>, u64), ArgminError> {
    let solver = Newton::new().with_gamma(gamma)?;
    let result = Executor::new(likelihood.clone(), solver)
        .configure(|state| state.param(initial).max_iters(MAX_ITERATIONS as u64))
        .run()?;
    let state = result.state();
    let theta = state
        .param
        .clone()
        .ok_or_else(|| ArgminError::msg("solver returned no parameter"))?;
    Ok((theta, state.iter))
}

/// Fits the identified terms over the free classes. Starts from the log odds of the free density
/// for `edges` and zero elsewhere.
fn fit_free_classes(
    table: &ClassTable,
    kept: &[usize],
    remaining: &[f64],
) -> Result<Vec<f64>, EstimationError> {
    let mut values = vec![0.0; table.terms.len()];
    if kept.is_empty() {
        return Ok(values);
    }

    let likelihood = Likelihood::new(table, kept, remaining);
    let initial = DVector::from_iterator(
        kept.len(),
        kept.iter().map(|&k| match table.terms[k] {
            FormationTerm::Edges => {
                logit((remaining[k] / likelihood.dyads()).clamp(1e-12, 1.0 - 1e-12))
            }
            _ => 0.0,
        }),
    );

    let mut best_residual = f64::INFINITY;
    for gamma in STEP_LENGTHS {
        match run_newton(&likelihood, initial.clone(), gamma) {
            Ok((theta, iterations)) => {
                let residual = likelihood.residual(&theta);
                if residual <= TOLERANCE {
                    debug!(
                        "formation fit converged with step length {gamma} after {iterations} \
                         iterations (residual {residual:e})"
                    );
                    for (j, &k) in kept.iter().enumerate() {
                        values[k] = theta[j];
                    }
                    return Ok(values);
                }
                if residual.is_finite() {
                    best_residual = best_residual.min(residual);
                }
            }
            Err(err) => debug!("formation fit with step length {gamma} failed: {err}"),
        }
    }

    Err(EstimationError::NoConvergence {
        iterations: MAX_ITERATIONS,
        residual: best_residual,
    })
}

/// Fits the formation coefficients for a population with the given group sizes so that the
/// expected value of every term matches its target. Returns the degeneracies of any classes
/// pinned by boundary targets alongside the coefficients.
pub fn fit_formation(
    group_sizes: &[usize],
    targets: &[TargetStatistic],
) -> Result<(FormationCoefficients, Vec<NumericDegeneracy>), EstimationError> {
    let mut table = ClassTable::new(group_sizes, targets);
    table.resolve_boundaries()?;

    let remaining = table.remaining_targets();
    let kept = table.identified_terms();
    let values = fit_free_classes(&table, &kept, &remaining)?;
    let (pinned, degeneracies) = table.pinned_classes();
    let coefficients = FormationCoefficients {
        terms: table.terms,
        values,
        pinned,
    };

    // Terms left out of the fit must be reproduced by the others.
    #[allow(clippy::cast_precision_loss)]
    let sizes: Vec<f64> = group_sizes.iter().map(|n| *n as f64).collect();
    let expected = coefficients.expected_statistics(&sizes);
    let consistent = expected
        .iter()
        .zip(&table.targets)
        .all(|(e, t)| relative_residual(*e, *t) <= TOLERANCE.sqrt());
    if !consistent {
        return Err(EstimationError::Singular);
    }
    Ok((coefficients, degeneracies))
}
