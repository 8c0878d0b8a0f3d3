/*!

Named random number generators.

Each stochastic concern of a trial (demography, dissolution, formation, transmission,
initialization) draws from its own generator, declared with `define_rng!`. Every generator is
seeded from the trial's base seed plus a hash of its name, so adding draws to one process never
shifts the stream of another, and two runs with the same base seed are identical.

*/

use crate::{
    context::{Context, DataPlugin},
    hashing::hash_str,
    trait_map::TraitMap,
};
use log::trace;
use rand::{
    distr::{
        uniform::{SampleRange, SampleUniform},
        weighted::{Error as WeightError, Weight, WeightedIndex},
    },
    prelude::Distribution,
    Rng, SeedableRng,
};
use std::any::Any;

pub trait RngId: Any + Sized {
    #![allow(non_upper_case_globals)]
    const new: &'static dyn Fn(u64) -> Self;
    const name: &'static str;
    type RngType: SeedableRng;
    fn rng(&mut self) -> &mut Self::RngType;
}

struct RngPlugin {
    base_seed: u64,
    rng_map: TraitMap,
}

impl RngPlugin {
    fn clear(&mut self) {
        self.rng_map.clear();
    }

    fn get_rng<R: RngId>(&mut self) -> &mut R::RngType {
        let seed = self.base_seed.wrapping_add(hash_str(R::name));
        self.rng_map.get_or_insert_with(|| R::new(seed)).rng()
    }
}

impl DataPlugin for RngPlugin {
    #[allow(non_upper_case_globals)]
    const new: &'static dyn Fn() -> Self = &|| RngPlugin {
        base_seed: 0,
        rng_map: TraitMap::new(),
    };
}

/// Gets a mutable reference to the random number generator associated with the given
/// `RngId`.
// This is a private free function so that it's not leaked to the public API.
fn get_rng<R: RngId>(context: &mut Context) -> &mut R::RngType {
    context.get_data_container_mut::<RngPlugin>().get_rng::<R>()
}

pub trait ContextRandomExt {
    /// Sets the base seed for every generator in this context. Generators already created are
    /// discarded so they get re-seeded the next time they are used.
    fn init_random(&mut self, base_seed: u64);

    /// Gets a random sample from the random number generator associated with the given
    /// `RngId` by applying the specified sampler function. If the Rng has not been used
    /// before, one will be created with the base seed you defined in `init_random`.
    fn sample<R: RngId, T>(&mut self, sampler: impl FnOnce(&mut R::RngType) -> T) -> T;

    /// Gets a random sample from the specified distribution using the random number generator
    /// associated with the given `RngId`.
    fn sample_distr<R: RngId, T>(&mut self, distribution: impl Distribution<T>) -> T
    where
        R::RngType: Rng;

    /// Gets a random sample within the range provided by `range`
    /// using the generator associated with the given `RngId`.
    fn sample_range<R: RngId, S, T>(&mut self, range: S) -> T
    where
        R::RngType: Rng,
        S: SampleRange<T>,
        T: SampleUniform;

    /// Gets a random boolean value which is true with probability `p`
    /// using the generator associated with the given `RngId`.
    /// `p` is clamped to `[0, 1]`.
    fn sample_bool<R: RngId>(&mut self, p: f64) -> bool
    where
        R::RngType: Rng;

    /// Draws a random entry out of the list provided in `weights`
    /// with the given weights using the generator associated with the
    /// given `RngId`.
    fn sample_weighted<R: RngId, T>(&mut self, weights: &[T]) -> Result<usize, WeightError>
    where
        R::RngType: Rng,
        T: Clone + Default + SampleUniform + for<'a> std::ops::AddAssign<&'a T> + PartialOrd + Weight;
}

impl ContextRandomExt for Context {
    fn init_random(&mut self, base_seed: u64) {
        trace!("initializing random module with base seed {base_seed}");
        let rng_container = self.get_data_container_mut::<RngPlugin>();
        rng_container.base_seed = base_seed;

        // Clear any existing Rngs to ensure they get re-seeded when `get_rng` is called
        rng_container.clear();
    }

    fn sample<R: RngId, T>(&mut self, sampler: impl FnOnce(&mut R::RngType) -> T) -> T {
        let rng = get_rng::<R>(self);
        sampler(rng)
    }

    fn sample_distr<R: RngId, T>(&mut self, distribution: impl Distribution<T>) -> T
    where
        R::RngType: Rng,
    {
        let rng = get_rng::<R>(self);
        distribution.sample::<R::RngType>(rng)
    }

    fn sample_range<R: RngId, S, T>(&mut self, range: S) -> T
    where
        R::RngType: Rng,
        S: SampleRange<T>,
        T: SampleUniform,
    {
        self.sample::<R, T>(|rng| rng.random_range(range))
    }

    fn sample_bool<R: RngId>(&mut self, p: f64) -> bool
    where
        R::RngType: Rng,
    {
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        self.sample::<R, bool>(|rng| rng.random_bool(p))
    }

    fn sample_weighted<R: RngId, T>(&mut self, weights: &[T]) -> Result<usize, WeightError>
    where
        R::RngType: Rng,
        T: Clone + Default + SampleUniform + for<'a> std::ops::AddAssign<&'a T> + PartialOrd + Weight,
    {
        let index = WeightedIndex::new(weights)?;
        let rng = get_rng::<R>(self);
        Ok(index.sample(rng))
    }
}

/// Declares a named random number generator. The name doubles as the seed offset, so two
/// generators with different names produce independent streams from the same base seed.
#[macro_export]
macro_rules! define_rng {
    ($random_id:ident) => {
        $crate::define_rng!($random_id, $crate::rand::rngs::StdRng);
    };
    ($random_id:ident, $rng_type:ty) => {
        pub(crate) struct $random_id {
            rng: $rng_type,
        }

        impl $crate::random::RngId for $random_id {
            #![allow(non_upper_case_globals)]
            type RngType = $rng_type;
            const name: &'static str = stringify!($random_id);
            const new: &'static dyn Fn(u64) -> Self = &|seed| {
                use $crate::rand::SeedableRng;
                Self {
                    rng: <$rng_type>::seed_from_u64(seed),
                }
            };

            fn rng(&mut self) -> &mut Self::RngType {
                &mut self.rng
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use rand_distr::Poisson;

    define_rng!(PartnerRng);
    define_rng!(ExposureRng);

    fn seeded(seed: u64) -> Context {
        let mut context = Context::new();
        context.init_random(seed);
        context
    }

    #[test]
    fn named_generators_produce_different_streams() {
        let mut context = seeded(42);
        let partner: Vec<u64> = (0..4).map(|_| context.sample::<PartnerRng, _>(RngCore::next_u64)).collect();
        let exposure: Vec<u64> = (0..4).map(|_| context.sample::<ExposureRng, _>(RngCore::next_u64)).collect();
        assert_ne!(partner, exposure);
        assert_ne!(partner[0], partner[1]);
    }

    #[test]
    fn draws_on_one_generator_leave_the_others_alone() {
        let mut context = seeded(7);
        let alone = context.sample::<PartnerRng, _>(RngCore::next_u64);

        context.init_random(7);
        for _ in 0..10 {
            context.sample::<ExposureRng, _>(RngCore::next_u64);
        }
        assert_eq!(alone, context.sample::<PartnerRng, _>(RngCore::next_u64));
    }

    #[test]
    fn reseeding_replays_or_changes_the_stream() {
        let mut context = seeded(42);
        let first: Vec<u64> = (0..3).map(|_| context.sample::<PartnerRng, _>(RngCore::next_u64)).collect();

        context.init_random(42);
        let replay: Vec<u64> = (0..3).map(|_| context.sample::<PartnerRng, _>(RngCore::next_u64)).collect();
        assert_eq!(first, replay);

        context.init_random(43);
        let other: Vec<u64> = (0..3).map(|_| context.sample::<PartnerRng, _>(RngCore::next_u64)).collect();
        assert_ne!(first, other);
    }

    #[test]
    fn poisson_counts_have_the_requested_mean() {
        let mut context = seeded(3);
        let poisson = Poisson::new(2.5).unwrap();
        let total: f64 = (0..2000)
            .map(|_| context.sample_distr::<ExposureRng, f64>(poisson))
            .sum();
        assert!((total / 2000.0 - 2.5).abs() < 0.15);
    }

    #[test]
    fn ranges_cover_node_indices() {
        let mut context = seeded(11);
        let mut seen = [false; 5];
        for _ in 0..200 {
            seen[context.sample_range::<PartnerRng, _, usize>(0..5)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn bernoulli_probability_is_clamped() {
        let mut context = seeded(42);
        assert!(context.sample_bool::<PartnerRng>(1.5));
        assert!(!context.sample_bool::<PartnerRng>(-0.5));
        assert!(!context.sample_bool::<PartnerRng>(f64::NAN));
    }

    #[test]
    fn weighted_choice_skips_zero_weights() {
        let mut context = seeded(9);
        for _ in 0..100 {
            let group = context.sample_weighted::<ExposureRng, f64>(&[0.0, 2.0, 1.0]).unwrap();
            assert_ne!(group, 0);
        }
        assert!(context.sample_weighted::<ExposureRng, f64>(&[0.0, 0.0]).is_err());
        assert!(context.sample_weighted::<ExposureRng, f64>(&[]).is_err());
    }
}
