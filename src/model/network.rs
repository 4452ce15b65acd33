use std::fmt::Display;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context as _};
use pathfinding::prelude::{dijkstra, dijkstra_reach};
use rand::{rngs::SmallRng, seq::IndexedRandom};
use rstar::{primitives::GeomWithData, RTree};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{read_csv, MapType, Timestamp, TravelTime};

/// Dense non-negative road-junction identifier.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step of a concrete travel plan: the vehicle reaches `node` at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub node: NodeId,
    pub time: Timestamp,
}

/// Sequence of route points with non-decreasing arrival times, starting at
/// the origin and ending at the destination. Empty when no path exists.
pub type Route = Vec<RoutePoint>;

#[derive(Debug, Deserialize)]
pub struct NetworkNode {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Deserialize)]
pub struct NetworkEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub length: f64,
    pub time: TravelTime,
}

#[derive(Debug, Clone, Copy)]
struct EdgeAttrs {
    length: f64,
    time: TravelTime,
}

/// Undirected road graph with node coordinates. Immutable once built; the
/// nearest-node index is constructed on first use.
pub struct RoadNetwork {
    coords: MapType<NodeId, (f64, f64)>,
    adjacency: MapType<NodeId, MapType<NodeId, EdgeAttrs>>,
    node_ids: Vec<NodeId>,
    nearest_index: OnceLock<RTree<GeomWithData<[f64; 2], NodeId>>>,
}

impl RoadNetwork {
    pub fn new(nodes: Vec<NetworkNode>, edges: Vec<NetworkEdge>) -> anyhow::Result<Self> {
        if nodes.is_empty() {
            bail!("road network has no nodes");
        }
        let mut coords = MapType::new();
        for node in &nodes {
            if coords.insert(node.id, (node.x, node.y)).is_some() {
                bail!("duplicate node id {}", node.id);
            }
        }
        let mut adjacency: MapType<NodeId, MapType<NodeId, EdgeAttrs>> =
            coords.keys().map(|id| (*id, MapType::new())).collect();
        for edge in edges {
            if edge.time <= 0 {
                bail!(
                    "edge {} - {} has non-positive travel time {}",
                    edge.source,
                    edge.target,
                    edge.time
                );
            }
            if !coords.contains_key(&edge.source) || !coords.contains_key(&edge.target) {
                bail!("edge {} - {} references an unknown node", edge.source, edge.target);
            }
            let attrs = EdgeAttrs {
                length: edge.length,
                time: edge.time,
            };
            if let Some(neighbours) = adjacency.get_mut(&edge.source) {
                neighbours.insert(edge.target, attrs);
            }
            if let Some(neighbours) = adjacency.get_mut(&edge.target) {
                neighbours.insert(edge.source, attrs);
            }
        }
        let node_ids = coords.keys().copied().collect();
        Ok(Self {
            coords,
            adjacency,
            node_ids,
            nearest_index: OnceLock::new(),
        })
    }

    pub fn from_csv(
        nodes_path: impl AsRef<Path>,
        edges_path: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        let nodes = read_csv(nodes_path).context("unable to load network nodes")?;
        let edges = read_csv(edges_path).context("unable to load network edges")?;
        Self::new(nodes, edges)
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.coords.contains_key(&node)
    }

    pub fn coord(&self, node: NodeId) -> Option<(f64, f64)> {
        self.coords.get(&node).copied()
    }

    /// Uniformly random node of the whole network.
    pub fn random_node(&self, rng: &mut SmallRng) -> Option<NodeId> {
        self.node_ids.choose(rng).copied()
    }

    /// All nodes reachable from `origin` within the time budget, excluding
    /// `origin` itself, in increasing path-time order.
    pub fn nodes_within(&self, origin: NodeId, budget: TravelTime) -> Vec<NodeId> {
        if !self.adjacency.contains_key(&origin) {
            debug!(%origin, "reachability query for unknown node");
            return Vec::new();
        }
        dijkstra_reach(&origin, |node| self.successors(*node))
            .take_while(|item| item.total_cost <= budget)
            .filter(|item| item.node != origin)
            .map(|item| item.node)
            .collect()
    }

    /// Uniformly random node among [`Self::nodes_within`].
    pub fn random_node_within(
        &self,
        origin: NodeId,
        budget: TravelTime,
        rng: &mut SmallRng,
    ) -> Option<NodeId> {
        self.nodes_within(origin, budget).choose(rng).copied()
    }

    /// Node closest to `(x, y)` by Euclidean distance.
    pub fn nearest_node(&self, x: f64, y: f64) -> Option<NodeId> {
        let tree = self.nearest_index.get_or_init(|| {
            RTree::bulk_load(
                self.coords
                    .iter()
                    .map(|(id, (x, y))| GeomWithData::new([*x, *y], *id))
                    .collect(),
            )
        });
        tree.nearest_neighbor(&[x, y]).map(|entry| entry.data)
    }

    /// Minimum-travel-time path from `source` to `target`, annotated with the
    /// arrival time at every node. Empty when no path exists.
    pub fn shortest_path(&self, source: NodeId, target: NodeId, start_time: Timestamp) -> Route {
        if !self.contains(source) || !self.contains(target) {
            debug!(%source, %target, "path query for unknown node");
            return Route::new();
        }
        let Some((path, _)) = dijkstra(&source, |node| self.successors(*node), |node| *node == target)
        else {
            debug!(%source, %target, "no path between nodes");
            return Route::new();
        };
        let mut route = Vec::with_capacity(path.len());
        let mut now = start_time;
        route.push(RoutePoint {
            node: source,
            time: now,
        });
        for step in path.windows(2) {
            if let Some(edge) = self.edge(step[0], step[1]) {
                now += edge.time;
            }
            route.push(RoutePoint {
                node: step[1],
                time: now,
            });
        }
        route
    }

    /// Cost of the minimum-travel-time path, `None` when unreachable.
    pub fn shortest_travel_time(&self, source: NodeId, target: NodeId) -> Option<TravelTime> {
        if !self.contains(source) || !self.contains(target) {
            return None;
        }
        dijkstra(&source, |node| self.successors(*node), |node| *node == target)
            .map(|(_, cost)| cost)
    }

    /// Physical length of a route, summed over its edges.
    pub fn path_length(&self, route: &[RoutePoint]) -> f64 {
        route
            .windows(2)
            .filter(|step| step[0].node != step[1].node)
            .filter_map(|step| self.edge(step[0].node, step[1].node))
            .map(|edge| edge.length)
            .sum()
    }

    fn edge(&self, from: NodeId, to: NodeId) -> Option<EdgeAttrs> {
        self.adjacency.get(&from).and_then(|n| n.get(&to)).copied()
    }

    fn successors(&self, node: NodeId) -> Vec<(NodeId, TravelTime)> {
        self.adjacency
            .get(&node)
            .map(|neighbours| {
                neighbours
                    .iter()
                    .map(|(to, edge)| (*to, edge.time))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn line_network(len: u32) -> RoadNetwork {
        let nodes = (0..len)
            .map(|i| NetworkNode {
                id: NodeId(i),
                x: f64::from(i),
                y: 0.0,
            })
            .collect();
        let edges = (1..len)
            .map(|i| NetworkEdge {
                source: NodeId(i - 1),
                target: NodeId(i),
                length: 10.0,
                time: 1,
            })
            .collect();
        RoadNetwork::new(nodes, edges).unwrap()
    }

    #[test]
    fn rejects_empty_and_malformed_input() {
        assert!(RoadNetwork::new(Vec::new(), Vec::new()).is_err());
        let nodes = vec![NetworkNode {
            id: NodeId(0),
            x: 0.0,
            y: 0.0,
        }];
        let bad_edge = vec![NetworkEdge {
            source: NodeId(0),
            target: NodeId(1),
            length: 1.0,
            time: 1,
        }];
        assert!(RoadNetwork::new(nodes, bad_edge).is_err());
    }

    #[test]
    fn shortest_path_accumulates_arrival_times() {
        let network = line_network(5);
        let route = network.shortest_path(NodeId(0), NodeId(3), 100);
        let expected: Vec<(u32, Timestamp)> = vec![(0, 100), (1, 101), (2, 102), (3, 103)];
        let actual: Vec<(u32, Timestamp)> = route.iter().map(|p| (p.node.0, p.time)).collect();
        assert_eq!(actual, expected);
        assert_eq!(network.shortest_travel_time(NodeId(0), NodeId(3)), Some(3));
        assert_eq!(network.path_length(&route), 30.0);
    }

    #[test]
    fn path_to_self_is_a_single_point() {
        let network = line_network(3);
        let route = network.shortest_path(NodeId(1), NodeId(1), 7);
        assert_eq!(route.len(), 1);
        assert_eq!(route[0], RoutePoint {
            node: NodeId(1),
            time: 7
        });
        assert_eq!(network.shortest_travel_time(NodeId(1), NodeId(1)), Some(0));
    }

    #[test]
    fn disconnected_pairs_are_unreachable() {
        // two nodes, no edges
        let nodes = vec![
            NetworkNode {
                id: NodeId(0),
                x: 0.0,
                y: 0.0,
            },
            NetworkNode {
                id: NodeId(1),
                x: 1.0,
                y: 0.0,
            },
        ];
        let network = RoadNetwork::new(nodes, Vec::new()).unwrap();
        assert!(network.shortest_path(NodeId(0), NodeId(1), 0).is_empty());
        assert_eq!(network.shortest_travel_time(NodeId(0), NodeId(1)), None);
        assert!(network.nodes_within(NodeId(0), 100).is_empty());
    }

    #[test]
    fn reachable_set_respects_the_budget() {
        let network = line_network(10);
        let within = network.nodes_within(NodeId(0), 3);
        assert_eq!(
            within,
            vec![NodeId(1), NodeId(2), NodeId(3)],
            "only nodes within 3 time units, origin excluded"
        );

        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..20 {
            let node = network.random_node_within(NodeId(5), 2, &mut rng).unwrap();
            let cost = network.shortest_travel_time(NodeId(5), node).unwrap();
            assert!(cost >= 1 && cost <= 2);
        }
    }

    #[test]
    fn sampling_is_deterministic_for_a_seed() {
        let network = line_network(50);
        let mut a = SmallRng::seed_from_u64(9);
        let mut b = SmallRng::seed_from_u64(9);
        let picks_a: Vec<_> = (0..10).filter_map(|_| network.random_node(&mut a)).collect();
        let picks_b: Vec<_> = (0..10).filter_map(|_| network.random_node(&mut b)).collect();
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn nearest_node_uses_euclidean_distance() {
        let network = line_network(4);
        assert_eq!(network.nearest_node(0.1, 5.0), Some(NodeId(0)));
        assert_eq!(network.nearest_node(2.6, -1.0), Some(NodeId(3)));
    }
}
