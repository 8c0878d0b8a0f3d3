use crate::{
    attribute::Attribute,
    context::Context,
    error::AttributeError,
    network::ContextNetworkExt,
    population::{InitializationList, PopulationData, Query},
    NodeId,
};
use log::trace;

pub trait ContextPopulationExt {
    /// Makes `T` a known attribute. Declaring the same attribute twice is a no-op.
    fn declare_attribute<T: Attribute>(&mut self);

    /// Reports whether an attribute with this name has been declared.
    fn is_declared(&self, name: &str) -> bool;

    /// Adds a new active node with the given list of attributes. Every attribute in the list must
    /// be declared and every required attribute must be present.
    fn allocate_node<L: InitializationList>(&mut self, attributes: L) -> Result<NodeId, AttributeError>;

    /// Removes the node from the population together with all of its edges.
    fn deactivate_node(&mut self, node: NodeId) -> Result<(), AttributeError>;

    fn is_active(&self, node: NodeId) -> bool;

    fn get_attribute<T: Attribute>(&self, node: NodeId) -> Result<T, AttributeError>;

    fn set_attribute<T: Attribute>(&mut self, node: NodeId, value: T) -> Result<(), AttributeError>;

    /// Reads the categorical code of the attribute called `name`.
    fn get_category(&self, node: NodeId, name: &str) -> Result<u32, AttributeError>;

    fn active_node_count(&self) -> usize;

    /// The number of ids handed out so far, active or not.
    fn allocated_node_count(&self) -> usize;

    /// All active nodes in id order.
    fn active_nodes(&self) -> Vec<NodeId>;

    /// Get the count of all active nodes matching a given set of attribute values.
    ///
    /// Takes any type that implements [Query], but instead of implementing query yourself it is
    /// best to use the automatic syntax that implements [Query] for tuples of values, like so:
    /// `context.count_nodes((Group(1), DiseaseStatus::Infected))`.
    fn count_nodes<Q: Query>(&self, query: Q) -> Result<usize, AttributeError>;

    /// The active nodes matching a given set of attribute values, in id order.
    fn query_nodes<Q: Query>(&self, query: Q) -> Result<Vec<NodeId>, AttributeError>;
}

fn population(context: &Context) -> Option<&PopulationData> {
    context.get_data_container::<PopulationData>()
}

impl ContextPopulationExt for Context {
    fn declare_attribute<T: Attribute>(&mut self) {
        let population = self.get_data_container_mut::<PopulationData>();
        if population.check_declared::<T>().is_err() {
            trace!("declaring attribute {}", T::name());
            population.attribute_metadata.push(T::attribute_info());
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        population(self).is_some_and(|population| population.info_by_name(name).is_some())
    }

    fn allocate_node<L: InitializationList>(&mut self, attributes: L) -> Result<NodeId, AttributeError> {
        let population = self.get_data_container_mut::<PopulationData>();
        population.check_initialization_list(&attributes)?;

        let node = population.allocate_node();
        attributes.set_attributes(population, node);

        Ok(node)
    }

    fn deactivate_node(&mut self, node: NodeId) -> Result<(), AttributeError> {
        self.get_data_container_mut::<PopulationData>().deactivate(node)?;
        self.remove_incident_edges(node);
        Ok(())
    }

    fn is_active(&self, node: NodeId) -> bool {
        population(self).is_some_and(|population| population.is_active(node))
    }

    fn get_attribute<T: Attribute>(&self, node: NodeId) -> Result<T, AttributeError> {
        let population =
            population(self).ok_or_else(|| AttributeError::UnknownAttribute(T::name().to_string()))?;
        population.check_declared::<T>()?;
        population.check_active(node)?;
        population
            .get_attribute_ref::<T>(node)
            .cloned()
            // Declared, active, but never given a value.
            .ok_or(AttributeError::MissingAttribute(T::name()))
    }

    fn set_attribute<T: Attribute>(&mut self, node: NodeId, value: T) -> Result<(), AttributeError> {
        let population = self.get_data_container_mut::<PopulationData>();
        population.check_declared::<T>()?;
        population.check_active(node)?;
        population.set_attribute(node, value);
        Ok(())
    }

    fn get_category(&self, node: NodeId, name: &str) -> Result<u32, AttributeError> {
        let population =
            population(self).ok_or_else(|| AttributeError::UnknownAttribute(name.to_string()))?;
        let info = population
            .info_by_name(name)
            .ok_or_else(|| AttributeError::UnknownAttribute(name.to_string()))?;
        population.check_active(node)?;
        (info.reader)(population, node).ok_or(AttributeError::MissingAttribute(info.name()))
    }

    fn active_node_count(&self) -> usize {
        population(self).map_or(0, |population| population.active_count)
    }

    fn allocated_node_count(&self) -> usize {
        population(self).map_or(0, |population| population.active.len())
    }

    fn active_nodes(&self) -> Vec<NodeId> {
        population(self).map_or_else(Vec::new, |population| population.active_nodes().collect())
    }

    fn count_nodes<Q: Query>(&self, query: Q) -> Result<usize, AttributeError> {
        let Some(population) = population(self) else {
            return Ok(0);
        };
        query.check_declared(population)?;
        Ok(population
            .active_nodes()
            .filter(|node| query.matches(population, *node))
            .count())
    }

    fn query_nodes<Q: Query>(&self, query: Q) -> Result<Vec<NodeId>, AttributeError> {
        let Some(population) = population(self) else {
            return Ok(vec![]);
        };
        query.check_declared(population)?;
        Ok(population
            .active_nodes()
            .filter(|node| query.matches(population, *node))
            .collect())
    }
}
