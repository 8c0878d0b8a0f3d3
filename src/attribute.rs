use crate::{error::TrialError, population::PopulationData, type_of, NodeId, TypeId};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, hash::Hash};

/// Reads the categorical code of one attribute of one node without knowing its static type.
pub(crate) type CategoryReader = fn(&PopulationData, NodeId) -> Option<u32>;

/// Basic metadata about a declared attribute, a record in the attribute metadata database.
#[derive(Clone)]
pub struct AttributeInfo {
    name: &'static str,
    type_id: TypeId,
    is_required: bool,
    pub(crate) reader: CategoryReader,
}

impl AttributeInfo {
    #[must_use]
    #[inline(always)]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    #[inline(always)]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    #[inline(always)]
    pub fn is_required(&self) -> bool {
        self.is_required
    }
}

impl Debug for AttributeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeInfo")
            .field("name", &self.name)
            .field("is_required", &self.is_required)
            .finish()
    }
}

/// A categorical per-node attribute.
///
/// Every attribute has a name, used for by-name access and stratification, and maps each value
/// onto a small integer category.
pub trait Attribute: Clone + Debug + PartialEq + Hash + 'static {
    #[must_use]
    fn name() -> &'static str;

    /// Whether every node must be given a value when it is allocated.
    #[must_use]
    #[inline]
    fn is_required() -> bool {
        false
    }

    #[must_use]
    fn category(&self) -> u32;

    #[must_use]
    fn attribute_info() -> AttributeInfo {
        AttributeInfo {
            name: Self::name(),
            type_id: type_of::<Self>(),
            is_required: Self::is_required(),
            reader: read_category::<Self>,
        }
    }
}

fn read_category<T: Attribute>(data: &PopulationData, node: NodeId) -> Option<u32> {
    data.get_attribute_ref::<T>(node).map(Attribute::category)
}

/// The group a node belongs to. Formation terms and arrivals are defined over groups.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Group(pub u32);

impl Attribute for Group {
    fn name() -> &'static str {
        "group"
    }

    fn is_required() -> bool {
        true
    }

    fn category(&self) -> u32 {
        self.0
    }
}

impl TryFrom<usize> for Group {
    type Error = TrialError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        u32::try_from(index)
            .map(Group)
            .map_err(|_| TrialError::GroupOverflow(index))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseStatus {
    Susceptible,
    Infected,
}

impl Attribute for DiseaseStatus {
    fn name() -> &'static str {
        "status"
    }

    fn is_required() -> bool {
        true
    }

    fn category(&self) -> u32 {
        match self {
            DiseaseStatus::Susceptible => 0,
            DiseaseStatus::Infected => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Hash)]
    struct Risk(u8);
    impl Attribute for Risk {
        fn name() -> &'static str {
            "risk"
        }

        fn category(&self) -> u32 {
            u32::from(self.0)
        }
    }

    #[test]
    fn info_reflects_declaration() {
        let info = Risk::attribute_info();
        assert_eq!(info.name(), "risk");
        assert_eq!(info.type_id(), type_of::<Risk>());
        assert!(!info.is_required());

        let info = Group::attribute_info();
        assert_eq!(info.name(), "group");
        assert!(info.is_required());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn group_ids_come_from_indices() {
        assert_eq!(Group::try_from(7_usize), Ok(Group(7)));
        let too_large = u32::MAX as usize + 1;
        assert_eq!(
            Group::try_from(too_large),
            Err(TrialError::GroupOverflow(too_large))
        );
    }

    #[test]
    fn categories() {
        assert_eq!(Group(3).category(), 3);
        assert_eq!(DiseaseStatus::Susceptible.category(), 0);
        assert_eq!(DiseaseStatus::Infected.category(), 1);
    }
}
