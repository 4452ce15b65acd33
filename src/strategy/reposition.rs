use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context as _};
use ordered_float::OrderedFloat;
use rand::{rngs::SmallRng, seq::IndexedRandom};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::{
    network::{NodeId, RoadNetwork},
    read_csv,
    vehicle::{Vehicle, VehicleId},
    MapType, Timestamp, TravelTime,
};
use crate::simulation::fleet::RepositionAssignment;

pub const DEFAULT_CLUSTERS: usize = 5;
pub const DEFAULT_TOP_FRACTION: f64 = 0.2;

const KMEANS_MAX_ITERATIONS: usize = 50;

/// Where idle vehicles are sent between trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositionStrategy {
    /// Uniformly random reachable node.
    Random,
    /// Spread vehicles round-robin over k-means clusters of the candidate
    /// nodes.
    Cluster,
    /// Prefer historically high-demand nodes.
    Demand,
    /// Greedy farthest-point spread over already chosen destinations.
    Balanced,
}

impl FromStr for RepositionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "cluster" => Ok(Self::Cluster),
            "demand" => Ok(Self::Demand),
            "balanced" => Ok(Self::Balanced),
            other => bail!(
                "unknown reposition strategy {other:?} (expected random, cluster, demand or balanced)"
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DemandRecord {
    node: NodeId,
    count: u64,
}

/// Historical pickup counts per node, for [`RepositionStrategy::Demand`].
pub fn load_demand(path: impl AsRef<Path>) -> anyhow::Result<MapType<NodeId, u64>> {
    let records: Vec<DemandRecord> =
        read_csv(path).context("unable to load historical demand")?;
    Ok(records.into_iter().map(|r| (r.node, r.count)).collect())
}

type Candidates = Vec<(VehicleId, NodeId, Vec<NodeId>)>;

/// Plans idle-vehicle relocation each tick. Stateless across ticks; the
/// policy only sees the candidate sets, the network geometry and the
/// engine RNG.
pub struct RepositionPlanner {
    strategy: RepositionStrategy,
    max_reposition_time: TravelTime,
    clusters: usize,
    top_fraction: f64,
    historical_demand: Option<MapType<NodeId, u64>>,
}

impl RepositionPlanner {
    pub fn new(strategy: RepositionStrategy, max_reposition_time: TravelTime) -> Self {
        Self {
            strategy,
            max_reposition_time,
            clusters: DEFAULT_CLUSTERS,
            top_fraction: DEFAULT_TOP_FRACTION,
            historical_demand: None,
        }
    }

    pub fn with_historical_demand(mut self, demand: MapType<NodeId, u64>) -> Self {
        self.historical_demand = Some(demand);
        self
    }

    pub fn with_clusters(mut self, clusters: usize) -> Self {
        self.clusters = clusters.max(1);
        self
    }

    /// Produces at most one `(taxi, destination, route)` entry per idle
    /// vehicle. Vehicles without reachable candidates stay idle this tick.
    pub fn plan(
        &self,
        idle: &[&Vehicle],
        network: &RoadNetwork,
        current_time: Timestamp,
        rng: &mut SmallRng,
    ) -> Vec<RepositionAssignment> {
        if idle.is_empty() {
            return Vec::new();
        }
        let candidates: Candidates = idle
            .iter()
            .map(|taxi| {
                (
                    taxi.taxi_id,
                    taxi.position_node,
                    network.nodes_within(taxi.position_node, self.max_reposition_time),
                )
            })
            .collect();
        let picks = match self.strategy {
            RepositionStrategy::Random => random_policy(&candidates, rng),
            RepositionStrategy::Cluster => self.cluster_policy(&candidates, network, rng),
            RepositionStrategy::Demand => self.demand_policy(&candidates, rng),
            RepositionStrategy::Balanced => balanced_policy(&candidates, network, rng),
        };
        candidates
            .iter()
            .filter_map(|(taxi_id, position, _)| {
                let destination = *picks.get(taxi_id)?;
                let route = network.shortest_path(*position, destination, current_time);
                if route.is_empty() {
                    debug!(%taxi_id, %destination, "no route to reposition target");
                    return None;
                }
                Some(RepositionAssignment {
                    taxi_id: *taxi_id,
                    destination,
                    route,
                })
            })
            .collect()
    }

    fn cluster_policy(
        &self,
        candidates: &Candidates,
        network: &RoadNetwork,
        rng: &mut SmallRng,
    ) -> MapType<VehicleId, NodeId> {
        if candidates.len() < self.clusters {
            return random_policy(candidates, rng);
        }
        let all_nodes: BTreeSet<NodeId> = candidates
            .iter()
            .flat_map(|(_, _, nodes)| nodes.iter().copied())
            .collect();
        let located: Vec<(NodeId, (f64, f64))> = all_nodes
            .iter()
            .filter_map(|node| network.coord(*node).map(|coord| (*node, coord)))
            .collect();
        if located.is_empty() {
            warn!("no located candidate nodes, repositioning at random");
            return random_policy(candidates, rng);
        }
        let k = self.clusters.min(located.len());
        let points: Vec<(f64, f64)> = located.iter().map(|(_, coord)| *coord).collect();
        let labels = kmeans(&points, k, rng);
        let mut clusters: MapType<usize, BTreeSet<NodeId>> = MapType::new();
        for ((node, _), label) in located.iter().zip(&labels) {
            clusters.entry(*label).or_default().insert(*node);
        }
        let cluster_sets: Vec<&BTreeSet<NodeId>> = clusters.values().collect();

        let mut picks = MapType::new();
        for (index, (taxi_id, _, nodes)) in candidates.iter().enumerate() {
            let in_cluster: Vec<NodeId> = nodes
                .iter()
                .copied()
                .filter(|node| cluster_sets[index % cluster_sets.len()].contains(node))
                .collect();
            let choice = if in_cluster.is_empty() {
                nodes.choose(rng).copied()
            } else {
                in_cluster.choose(rng).copied()
            };
            if let Some(node) = choice {
                picks.insert(*taxi_id, node);
            }
        }
        picks
    }

    fn demand_policy(
        &self,
        candidates: &Candidates,
        rng: &mut SmallRng,
    ) -> MapType<VehicleId, NodeId> {
        let Some(demand) = self.historical_demand.as_ref().filter(|d| !d.is_empty()) else {
            warn!("no historical demand data, repositioning at random");
            return random_policy(candidates, rng);
        };
        let mut ranked: Vec<(NodeId, u64)> = demand.iter().map(|(n, c)| (*n, *c)).collect();
        ranked.sort_by_key(|(node, count)| (std::cmp::Reverse(*count), *node));
        let top = ((ranked.len() as f64 * self.top_fraction) as usize).max(1);
        let hot: BTreeSet<NodeId> = ranked.into_iter().take(top).map(|(node, _)| node).collect();

        let mut picks = MapType::new();
        for (taxi_id, _, nodes) in candidates {
            let hot_nodes: Vec<NodeId> =
                nodes.iter().copied().filter(|node| hot.contains(node)).collect();
            let choice = if hot_nodes.is_empty() {
                nodes.choose(rng).copied()
            } else {
                hot_nodes.choose(rng).copied()
            };
            if let Some(node) = choice {
                picks.insert(*taxi_id, node);
            }
        }
        picks
    }
}

fn random_policy(candidates: &Candidates, rng: &mut SmallRng) -> MapType<VehicleId, NodeId> {
    candidates
        .iter()
        .filter_map(|(taxi_id, _, nodes)| nodes.choose(rng).map(|node| (*taxi_id, *node)))
        .collect()
}

fn balanced_policy(
    candidates: &Candidates,
    network: &RoadNetwork,
    rng: &mut SmallRng,
) -> MapType<VehicleId, NodeId> {
    if candidates.len() <= 1 {
        return random_policy(candidates, rng);
    }
    let mut picks = MapType::new();
    let mut chosen: Vec<(f64, f64)> = Vec::new();
    for (taxi_id, _, nodes) in candidates {
        let located: Vec<(NodeId, (f64, f64))> = nodes
            .iter()
            .filter_map(|node| network.coord(*node).map(|coord| (*node, coord)))
            .collect();
        if located.is_empty() {
            // no coordinates to spread on, fall back to a random candidate
            if let Some(node) = nodes.choose(rng) {
                picks.insert(*taxi_id, *node);
            }
            continue;
        }
        let pick = if chosen.is_empty() {
            located.choose(rng).copied()
        } else {
            let mut best: Option<(NodeId, (f64, f64), f64)> = None;
            for (node, coord) in &located {
                let nearest = chosen
                    .iter()
                    .map(|other| euclidean(*coord, *other))
                    .fold(f64::INFINITY, f64::min);
                if best.as_ref().map_or(true, |(_, _, distance)| nearest > *distance) {
                    best = Some((*node, *coord, nearest));
                }
            }
            best.map(|(node, coord, _)| (node, coord))
        };
        if let Some((node, coord)) = pick {
            picks.insert(*taxi_id, node);
            chosen.push(coord);
        }
    }
    picks
}

fn euclidean(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Lloyd's algorithm over plane points; returns a cluster label per point.
/// Centroids start on a random sample of the points, so the labelling is
/// deterministic for a given RNG state.
fn kmeans(points: &[(f64, f64)], k: usize, rng: &mut SmallRng) -> Vec<usize> {
    let mut centroids: Vec<(f64, f64)> = points.choose_multiple(rng, k).copied().collect();
    let mut labels = vec![0usize; points.len()];
    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut moved = false;
        for (index, point) in points.iter().enumerate() {
            let label = (0..centroids.len())
                .min_by_key(|c| OrderedFloat(squared_distance(*point, centroids[*c])))
                .unwrap_or(0);
            if labels[index] != label {
                labels[index] = label;
                moved = true;
            }
        }
        let mut sums = vec![(0.0f64, 0.0f64, 0usize); centroids.len()];
        for (point, label) in points.iter().zip(&labels) {
            sums[*label].0 += point.0;
            sums[*label].1 += point.1;
            sums[*label].2 += 1;
        }
        for (centroid, sum) in centroids.iter_mut().zip(&sums) {
            if sum.2 > 0 {
                *centroid = (sum.0 / sum.2 as f64, sum.1 / sum.2 as f64);
            }
        }
        if !moved {
            break;
        }
    }
    labels
}

fn squared_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)
}
