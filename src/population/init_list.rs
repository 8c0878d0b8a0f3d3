use crate::{attribute::Attribute, population::PopulationData, type_of, NodeId, TypeId};
use seq_macro::seq;

/// A trait that contains the initialization values for a
/// new node. Do not use this directly, but instead use
/// the tuple syntax: `context.allocate_node((Group(1), DiseaseStatus::Susceptible))`.
pub trait InitializationList {
    fn has_attribute(&self, t: TypeId) -> bool;
    /// Appends the type and name of every attribute in the list.
    fn collect_attributes(&self, attributes: &mut Vec<(TypeId, &'static str)>);
    fn set_attributes(self, population: &mut PopulationData, node: NodeId);
}

// Implement the versions with 0 and 1 parameters
impl InitializationList for () {
    fn has_attribute(&self, _: TypeId) -> bool {
        false
    }
    fn collect_attributes(&self, _: &mut Vec<(TypeId, &'static str)>) {}
    fn set_attributes(self, _population: &mut PopulationData, _node: NodeId) {}
}

impl<T1: Attribute> InitializationList for T1 {
    fn has_attribute(&self, t: TypeId) -> bool {
        t == type_of::<T1>()
    }

    fn collect_attributes(&self, attributes: &mut Vec<(TypeId, &'static str)>) {
        attributes.push((type_of::<T1>(), T1::name()));
    }

    fn set_attributes(self, population: &mut PopulationData, node: NodeId) {
        population.set_attribute::<T1>(node, self);
    }
}

// Implement the tuple versions with 1..12 parameters.
macro_rules! impl_initialization_list {
    ($ct:expr) => {
        seq!(N in 0..$ct {
            impl<
                #(
                    T~N : Attribute,
                )*
            > InitializationList for (
                #(
                    T~N,
                )*
            )
            {
                fn has_attribute(&self, t: TypeId) -> bool {
                    #(
                        if t == type_of::<T~N>() { return true; }
                    )*
                    false
                }

                fn collect_attributes(&self, attributes: &mut Vec<(TypeId, &'static str)>) {
                    #(
                        attributes.push((type_of::<T~N>(), <T~N>::name()));
                    )*
                }

                fn set_attributes(self, population: &mut PopulationData, node: NodeId) {
                    #(
                        population.set_attribute(node, self.N);
                    )*
                }
            }
        });
    }
}

seq!(Z in 1..12 {
    impl_initialization_list!(Z);
});

#[cfg(test)]
mod tests {
    use super::InitializationList;
    use crate::attribute::{DiseaseStatus, Group};
    use crate::type_of;

    #[test]
    fn tuple_lists_report_their_members() {
        let list = (Group(1), DiseaseStatus::Infected);
        assert!(list.has_attribute(type_of::<Group>()));
        assert!(list.has_attribute(type_of::<DiseaseStatus>()));
        assert!(!list.has_attribute(type_of::<u8>()));

        let mut names = vec![];
        list.collect_attributes(&mut names);
        let names: Vec<_> = names.into_iter().map(|(_, name)| name).collect();
        assert_eq!(names, vec!["group", "status"]);
    }

    #[test]
    fn empty_list_has_nothing() {
        assert!(!().has_attribute(type_of::<Group>()));
    }
}
