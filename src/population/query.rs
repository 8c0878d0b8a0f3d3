use crate::{attribute::Attribute, error::AttributeError, population::PopulationData, NodeId};
use seq_macro::seq;

/// Encapsulates a query over attribute values.
///
/// [`ContextPopulationExt::count_nodes`](crate::ContextPopulationExt::count_nodes) takes an
/// instance of [`Query`], but because we implement `Query` for attribute values and tuples of up
/// to size 8, that's invisible to the caller:
/// `context.count_nodes((Group(1), DiseaseStatus::Infected))`. Do not use this trait directly.
pub trait Query {
    /// Fails with `UnknownAttribute` if any attribute in the query was never declared.
    fn check_declared(&self, population: &PopulationData) -> Result<(), AttributeError>;
    /// Checks that the given node matches every value in the query.
    fn matches(&self, population: &PopulationData, node: NodeId) -> bool;
}

// The empty query matches everyone
impl Query for () {
    fn check_declared(&self, _: &PopulationData) -> Result<(), AttributeError> {
        Ok(())
    }
    fn matches(&self, _: &PopulationData, _: NodeId) -> bool {
        true
    }
}

impl<T1: Attribute> Query for T1 {
    fn check_declared(&self, population: &PopulationData) -> Result<(), AttributeError> {
        population.check_declared::<T1>()
    }

    fn matches(&self, population: &PopulationData, node: NodeId) -> bool {
        population.get_attribute_ref::<T1>(node) == Some(self)
    }
}

macro_rules! impl_query {
    ($ct:expr) => {
        seq!(N in 0..$ct {
            impl<
                #(
                    T~N : Attribute,
                )*
            > Query for (
                #(
                    T~N,
                )*
            )
            {
                fn check_declared(&self, population: &PopulationData) -> Result<(), AttributeError> {
                    #(
                        population.check_declared::<T~N>()?;
                    )*
                    Ok(())
                }

                fn matches(&self, population: &PopulationData, node: NodeId) -> bool {
                    #(
                        if population.get_attribute_ref::<T~N>(node) != Some(&self.N) {
                            return false;
                        }
                    )*
                    true
                }
            }
        });
    }
}

seq!(Z in 1..8 {
    impl_query!(Z);
});
