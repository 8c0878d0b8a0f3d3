/*!

The evolving partnership network.

Each undirected edge is stored once, keyed by its normalized `(low, high)` endpoint pair, with an
adjacency set per node giving the symmetric view. Edges may only join two distinct active nodes,
and a pair is joined at most once.

Removal is idempotent: removing an edge that does not exist returns `None` rather than failing.
Dissolution and departure handling both rely on this, since a departure can remove an edge the
dissolution pass has already decided about.

*/

use crate::{
    context::{Context, DataPlugin},
    error::NetworkError,
    population::PopulationData,
    HashMap, HashSet, NodeId,
};

/// An active partnership.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    low: NodeId,
    high: NodeId,
    formed_at: usize,
    expected_duration: f64,
}

impl Edge {
    /// Endpoints in increasing id order.
    #[must_use]
    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.low, self.high)
    }

    /// The step during which the edge was formed.
    #[must_use]
    pub fn formed_at(&self) -> usize {
        self.formed_at
    }

    #[must_use]
    pub fn expected_duration(&self) -> f64 {
        self.expected_duration
    }

    /// The number of steps the edge has existed for as of `step`.
    #[must_use]
    pub fn age(&self, step: usize) -> usize {
        step.saturating_sub(self.formed_at)
    }
}

fn normalize(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Default)]
pub(crate) struct NetworkData {
    edges: HashMap<(NodeId, NodeId), Edge>,
    adjacency: HashMap<NodeId, HashSet<NodeId>>,
}

impl DataPlugin for NetworkData {
    const new: &'static dyn Fn() -> Self = &NetworkData::default;
}

impl NetworkData {
    fn insert(&mut self, edge: Edge) {
        let (low, high) = edge.endpoints();
        self.adjacency.entry(low).or_default().insert(high);
        self.adjacency.entry(high).or_default().insert(low);
        self.edges.insert((low, high), edge);
    }

    fn remove(&mut self, a: NodeId, b: NodeId) -> Option<Edge> {
        let key = normalize(a, b);
        let edge = self.edges.remove(&key)?;
        for (from, to) in [(key.0, key.1), (key.1, key.0)] {
            if let Some(neighbors) = self.adjacency.get_mut(&from) {
                neighbors.remove(&to);
                if neighbors.is_empty() {
                    self.adjacency.remove(&from);
                }
            }
        }
        Some(edge)
    }

    pub(crate) fn contains(&self, a: NodeId, b: NodeId) -> bool {
        self.edges.contains_key(&normalize(a, b))
    }

    pub(crate) fn degree(&self, node: NodeId) -> usize {
        self.adjacency.get(&node).map_or(0, |partners| partners.len())
    }

    pub(crate) fn neighbors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.get(&node).into_iter().flatten().copied()
    }

    /// Edge keys in increasing order. Stochastic passes over the edge set iterate in this order
    /// so that results depend only on the seed.
    pub(crate) fn sorted_keys(&self) -> Vec<(NodeId, NodeId)> {
        let mut keys: Vec<_> = self.edges.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.edges.len()
    }

    fn check_invariants(&self, population: &PopulationData) -> Result<(), String> {
        for (&(low, high), edge) in &self.edges {
            if low == high {
                return Err(format!("self loop on {low}"));
            }
            if edge.endpoints() != (low, high) {
                return Err(format!("edge stored under ({low}, {high}) has endpoints {:?}", edge.endpoints()));
            }
            for node in [low, high] {
                if !population.is_active(node) {
                    return Err(format!("edge ({low}, {high}) references inactive {node}"));
                }
            }
            let symmetric = self.adjacency.get(&low).is_some_and(|n| n.contains(&high))
                && self.adjacency.get(&high).is_some_and(|n| n.contains(&low));
            if !symmetric {
                return Err(format!("edge ({low}, {high}) missing from adjacency"));
            }
        }
        let adjacency_entries: usize = self.adjacency.values().map(|partners| partners.len()).sum();
        if adjacency_entries != 2 * self.edges.len() {
            return Err(format!(
                "adjacency holds {adjacency_entries} entries for {} edges",
                self.edges.len()
            ));
        }
        Ok(())
    }
}

pub trait ContextNetworkExt {
    /// Adds an edge formed at the current step. Fails with `InvalidEdge` if `a == b`, if either
    /// endpoint is not an active node, or if the pair is already joined.
    fn add_edge(&mut self, a: NodeId, b: NodeId, expected_duration: f64) -> Result<(), NetworkError>;

    /// Removes the edge between `a` and `b`, returning it. Removing an edge that does not exist is
    /// a no-op that returns `None`.
    fn remove_edge(&mut self, a: NodeId, b: NodeId) -> Option<Edge>;

    /// Removes every edge incident to `node`, returning them in endpoint order.
    fn remove_incident_edges(&mut self, node: NodeId) -> Vec<Edge>;

    fn has_edge(&self, a: NodeId, b: NodeId) -> bool;

    /// The partners of `node`, in id order.
    fn edges_of(&self, node: NodeId) -> Vec<NodeId>;

    fn degree(&self, node: NodeId) -> usize;

    fn edge_count(&self) -> usize;

    /// A snapshot of every edge, ordered by endpoints.
    fn edge_list(&self) -> Vec<Edge>;

    /// Verifies that every edge joins two distinct active nodes and that the adjacency view is
    /// symmetric. Returns a description of the first violation found.
    fn check_network_invariants(&self) -> Result<(), String>;
}

fn network(context: &Context) -> Option<&NetworkData> {
    context.get_data_container::<NetworkData>()
}

impl ContextNetworkExt for Context {
    fn add_edge(&mut self, a: NodeId, b: NodeId, expected_duration: f64) -> Result<(), NetworkError> {
        let invalid = |reason| NetworkError::InvalidEdge { a, b, reason };
        if a == b {
            return Err(invalid("self loop"));
        }
        let active = self
            .get_data_container::<PopulationData>()
            .is_some_and(|population| population.is_active(a) && population.is_active(b));
        if !active {
            return Err(invalid("endpoint is not an active node"));
        }
        if self.has_edge(a, b) {
            return Err(invalid("pair is already joined"));
        }

        let (low, high) = normalize(a, b);
        let formed_at = self.current_step();
        self.get_data_container_mut::<NetworkData>().insert(Edge {
            low,
            high,
            formed_at,
            expected_duration,
        });
        Ok(())
    }

    fn remove_edge(&mut self, a: NodeId, b: NodeId) -> Option<Edge> {
        self.get_data_container_mut::<NetworkData>().remove(a, b)
    }

    fn remove_incident_edges(&mut self, node: NodeId) -> Vec<Edge> {
        let network = self.get_data_container_mut::<NetworkData>();
        let mut partners: Vec<_> = network.neighbors(node).collect();
        partners.sort_unstable();
        partners
            .into_iter()
            .filter_map(|partner| network.remove(node, partner))
            .collect()
    }

    fn has_edge(&self, a: NodeId, b: NodeId) -> bool {
        network(self).is_some_and(|network| network.contains(a, b))
    }

    fn edges_of(&self, node: NodeId) -> Vec<NodeId> {
        let mut partners: Vec<_> = network(self)
            .map(|network| network.neighbors(node).collect())
            .unwrap_or_default();
        partners.sort_unstable();
        partners
    }

    fn degree(&self, node: NodeId) -> usize {
        network(self).map_or(0, |network| network.degree(node))
    }

    fn edge_count(&self) -> usize {
        network(self).map_or(0, NetworkData::len)
    }

    fn edge_list(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = network(self)
            .map(|network| network.iter().cloned().collect())
            .unwrap_or_default();
        edges.sort_unstable_by_key(Edge::endpoints);
        edges
    }

    fn check_network_invariants(&self) -> Result<(), String> {
        match (network(self), self.get_data_container::<PopulationData>()) {
            (Some(network), Some(population)) => network.check_invariants(population),
            (Some(network), None) if network.len() > 0 => {
                Err("edges exist without a population".to_string())
            }
            _ => Ok(()),
        }
    }
}
