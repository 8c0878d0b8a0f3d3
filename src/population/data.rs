use crate::{
    attribute::{Attribute, AttributeInfo},
    attribute_map::AttributeMap,
    context::DataPlugin,
    error::AttributeError,
    population::InitializationList,
    type_of, NodeId, TypeId,
};

/// Stores all data associated to nodes and their attributes.
pub struct PopulationData {
    /// Whether each allocated node is still in the population. Indexed by `NodeId`; slots are
    /// never reclaimed.
    pub(crate) active: Vec<bool>,
    pub(crate) active_count: usize,
    /// Map from type `T: Attribute` to `AttributeColumn<T>`, a wrapper for `Vec<Option<T>>`
    pub(crate) attributes: AttributeMap,
    /// A database of the declared attributes, in declaration order.
    pub(crate) attribute_metadata: Vec<AttributeInfo>,
}

impl Default for PopulationData {
    fn default() -> Self {
        PopulationData {
            active: Vec::new(),
            active_count: 0,
            attributes: AttributeMap::new(),
            attribute_metadata: vec![],
        }
    }
}

impl DataPlugin for PopulationData {
    const new: &'static dyn Fn() -> Self = &PopulationData::default;
}

impl PopulationData {
    pub(crate) fn allocate_node(&mut self) -> NodeId {
        let node = NodeId(self.active.len());
        self.active.push(true);
        self.active_count += 1;
        node
    }

    #[must_use]
    pub fn is_active(&self, node: NodeId) -> bool {
        self.active.get(node.0).copied().unwrap_or(false)
    }

    pub(crate) fn deactivate(&mut self, node: NodeId) -> Result<(), AttributeError> {
        match self.active.get_mut(node.0) {
            Some(active) if *active => {
                *active = false;
                self.active_count -= 1;
                Ok(())
            }
            _ => Err(AttributeError::InactiveNode(node)),
        }
    }

    pub(crate) fn is_declared(&self, type_id: TypeId) -> bool {
        self.attribute_metadata
            .iter()
            .any(|info| info.type_id() == type_id)
    }

    pub(crate) fn info_by_name(&self, name: &str) -> Option<&AttributeInfo> {
        self.attribute_metadata
            .iter()
            .find(|info| info.name() == name)
    }

    pub(crate) fn check_declared<T: Attribute>(&self) -> Result<(), AttributeError> {
        if self.is_declared(type_of::<T>()) {
            Ok(())
        } else {
            Err(AttributeError::UnknownAttribute(T::name().to_string()))
        }
    }

    pub(crate) fn check_active(&self, node: NodeId) -> Result<(), AttributeError> {
        if self.is_active(node) {
            Ok(())
        } else {
            Err(AttributeError::InactiveNode(node))
        }
    }

    /// Raw read; does not check that the attribute was declared or that the node is active.
    pub(crate) fn get_attribute_ref<T: Attribute>(&self, node: NodeId) -> Option<&T> {
        self.attributes
            .column::<T>()
            .and_then(|column| column.get(node.0))
    }

    pub(crate) fn set_attribute<T: Attribute>(&mut self, node: NodeId, value: T) {
        self.attributes.column_mut::<T>().set(node.0, value);
    }

    pub(super) fn check_initialization_list<L: InitializationList>(
        &self,
        initialization: &L,
    ) -> Result<(), AttributeError> {
        let mut provided = vec![];
        initialization.collect_attributes(&mut provided);
        for (type_id, name) in provided {
            if !self.is_declared(type_id) {
                return Err(AttributeError::UnknownAttribute(name.to_string()));
            }
        }

        for info in &self.attribute_metadata {
            if info.is_required() && !initialization.has_attribute(info.type_id()) {
                return Err(AttributeError::MissingAttribute(info.name()));
            }
        }

        Ok(())
    }

    /// Iterates over active nodes in id order.
    pub(crate) fn active_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, active)| **active)
            .map(|(index, _)| NodeId(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{DiseaseStatus, Group};

    #[test]
    fn allocation_is_monotonic_and_never_reuses_ids() {
        let mut data = PopulationData::default();
        let a = data.allocate_node();
        let b = data.allocate_node();
        data.deactivate(a).unwrap();
        let c = data.allocate_node();

        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert_eq!(data.active_count, 2);
        assert_eq!(data.active_nodes().collect::<Vec<_>>(), vec![b, c]);
    }

    #[test]
    fn deactivating_twice_fails() {
        let mut data = PopulationData::default();
        let a = data.allocate_node();
        data.deactivate(a).unwrap();
        assert_eq!(data.deactivate(a), Err(AttributeError::InactiveNode(a)));
        assert_eq!(
            data.deactivate(NodeId(99)),
            Err(AttributeError::InactiveNode(NodeId(99)))
        );
    }

    #[test]
    fn initialization_list_checks() {
        let mut data = PopulationData::default();
        data.attribute_metadata.push(Group::attribute_info());

        assert!(data.check_initialization_list(&(Group(0),)).is_ok());
        assert_eq!(
            data.check_initialization_list(&()),
            Err(AttributeError::MissingAttribute("group"))
        );
        assert_eq!(
            data.check_initialization_list(&(Group(0), DiseaseStatus::Infected)),
            Err(AttributeError::UnknownAttribute("status".to_string()))
        );
    }
}
