use std::time::Instant;

use anyhow::{ensure, Context as _};
use humantime::format_duration;
use indicatif::ProgressBar;
use rand::{rngs::SmallRng, SeedableRng};
use tracing::{debug, info};

use crate::export::{FleetExport, OrdersExport};
use crate::model::{
    network::{NodeId, RoadNetwork},
    order::{OrderId, OrderRecord},
    vehicle::VehicleId,
    MapType, Timestamp, TravelTime,
};
use crate::strategy::{
    matching::MatchStrategy,
    reposition::{RepositionPlanner, RepositionStrategy},
    CostMatrix,
};

use super::{fleet::Fleet, order_book::OrderBook};

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub taxi_count: u32,
    pub start_time: Timestamp,
    /// Tick size; the clock advances by this much every step.
    pub time_window: Timestamp,
    pub match_strategy: MatchStrategy,
    pub reposition_strategy: RepositionStrategy,
    /// Waiting orders older than this are cancelled.
    pub waiting_threshold: Timestamp,
    /// Upper bound on the pickup leg accepted by nearest matching.
    pub max_pickup_time: TravelTime,
    /// Travel-time budget for repositioning candidates.
    pub max_reposition_time: TravelTime,
    pub export_orders: bool,
    pub export_fleet: bool,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            taxi_count: 10,
            start_time: 0,
            time_window: 60,
            match_strategy: MatchStrategy::Nearest,
            reposition_strategy: RepositionStrategy::Random,
            waiting_threshold: 300,
            max_pickup_time: 300,
            max_reposition_time: 60,
            export_orders: false,
            export_fleet: false,
            seed: 42,
        }
    }
}

/// Where the fleet starts out.
pub enum VehiclePlacement {
    /// Uniformly random nodes, one draw per taxi.
    Random,
    /// Explicit starting nodes; overrides the configured taxi count.
    Fixed(Vec<NodeId>),
}

/// Owns the whole simulation: network, fleet, order book, strategies and the
/// engine RNG. Advances in fixed time windows.
pub struct Simulator {
    config: SimulatorConfig,
    network: RoadNetwork,
    fleet: Fleet,
    order_book: OrderBook,
    reposition_planner: RepositionPlanner,
    rng: SmallRng,
    current_time: Timestamp,
    end_time: Option<Timestamp>,
    total_route_length: f64,
}

impl Simulator {
    pub fn new(
        config: SimulatorConfig,
        network: RoadNetwork,
        orders: Vec<OrderRecord>,
        placement: VehiclePlacement,
    ) -> anyhow::Result<Self> {
        ensure!(config.time_window > 0, "time window must be positive");
        ensure!(network.node_count() > 0, "road network has no nodes");

        let mut rng = SmallRng::seed_from_u64(config.seed);
        let positions = match placement {
            VehiclePlacement::Random => {
                ensure!(config.taxi_count > 0, "taxi count must be positive");
                let mut positions = Vec::with_capacity(config.taxi_count as usize);
                for _ in 0..config.taxi_count {
                    positions.push(
                        network
                            .random_node(&mut rng)
                            .context("road network has no nodes")?,
                    );
                }
                positions
            }
            VehiclePlacement::Fixed(positions) => {
                ensure!(!positions.is_empty(), "taxi count must be positive");
                for node in &positions {
                    ensure!(network.contains(*node), "taxi placed on unknown node {node}");
                }
                positions
            }
        };

        let fleet = Fleet::new(&positions);
        let order_book = OrderBook::new(orders, config.start_time, config.waiting_threshold);
        let reposition_planner =
            RepositionPlanner::new(config.reposition_strategy, config.max_reposition_time);
        Ok(Self {
            current_time: config.start_time,
            end_time: None,
            total_route_length: 0.0,
            config,
            network,
            fleet,
            order_book,
            reposition_planner,
            rng,
        })
    }

    /// Supplies pickup statistics for the demand repositioning policy.
    pub fn with_historical_demand(mut self, demand: MapType<NodeId, u64>) -> Self {
        self.reposition_planner = self.reposition_planner.with_historical_demand(demand);
        self
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.order_book
    }

    /// Total physical length of every route handed out so far.
    pub fn total_route_length(&self) -> f64 {
        self.total_route_length
    }

    /// Runs one tick: advance the clock and every vehicle, apply the
    /// resulting order events, match waiting orders, reposition the idle
    /// remainder. Returns the new clock value.
    pub fn step(&mut self) -> Timestamp {
        self.current_time += self.config.time_window;
        let updates = self.fleet.advance_all(self.current_time);
        self.order_book.apply_transitions(&updates);
        self.match_and_assign();
        self.reposition_idle();
        self.current_time
    }

    /// Runs `until_step` ticks with a progress bar.
    pub fn run(&mut self, until_step: u64) -> Timestamp {
        let started = Instant::now();
        self.end_time =
            Some(self.config.start_time + until_step as Timestamp * self.config.time_window);
        info!(
            steps = until_step,
            start_time = self.config.start_time,
            "simulation started"
        );
        let progress = ProgressBar::new(until_step);
        for _ in 0..until_step {
            self.step();
            progress.inc(1);
        }
        progress.finish_and_clear();
        info!(
            end_time = self.current_time,
            total_route_length = self.total_route_length,
            elapsed = %format_duration(started.elapsed()),
            "simulation finished"
        );
        self.current_time
    }

    fn match_and_assign(&mut self) {
        let waiting: Vec<(OrderId, NodeId, NodeId)> = self
            .order_book
            .waiting_orders(self.current_time)
            .iter()
            .map(|order| (order.order_id, order.pickup_node, order.dropoff_node))
            .collect();
        let idle: Vec<(VehicleId, NodeId)> = self
            .fleet
            .idle_vehicles()
            .iter()
            .map(|taxi| (taxi.taxi_id, taxi.position_node))
            .collect();
        if idle.is_empty() || waiting.is_empty() {
            return;
        }

        let mut costs = CostMatrix::new();
        for (taxi_id, position) in &idle {
            let mut row = MapType::new();
            for (order_id, pickup_node, _) in &waiting {
                if let Some(cost) = self.network.shortest_travel_time(*position, *pickup_node) {
                    row.insert(*order_id, cost);
                }
            }
            costs.insert(*taxi_id, row);
        }

        let matches =
            self.config
                .match_strategy
                .run(&costs, self.config.max_pickup_time, &mut self.rng);
        for (taxi_id, order_id) in matches {
            let Some((_, pickup_node, dropoff_node)) =
                waiting.iter().find(|(id, _, _)| *id == order_id).copied()
            else {
                continue;
            };
            let Some(position) = self.fleet.get(taxi_id).map(|taxi| taxi.position_node) else {
                continue;
            };
            let pickup_leg = self
                .network
                .shortest_path(position, pickup_node, self.current_time);
            let Some(pickup_arrival) = pickup_leg.last().map(|point| point.time) else {
                debug!(%taxi_id, %order_id, "no pickup route, match dropped");
                continue;
            };
            let delivery_leg = self
                .network
                .shortest_path(pickup_node, dropoff_node, pickup_arrival);
            if delivery_leg.is_empty() {
                debug!(%taxi_id, %order_id, "no delivery route, match dropped");
                continue;
            }
            if !self.order_book.assign(order_id, taxi_id, self.current_time) {
                continue;
            }
            let mut route = pickup_leg;
            route.extend(delivery_leg);
            self.total_route_length += self.network.path_length(&route);
            if !self.fleet.assign(taxi_id, order_id, pickup_node, route) {
                debug!(%taxi_id, %order_id, "fleet refused the assignment");
            }
        }
    }

    fn reposition_idle(&mut self) {
        let plan = {
            let idle = self.fleet.idle_vehicles();
            if idle.is_empty() {
                return;
            }
            self.reposition_planner
                .plan(&idle, &self.network, self.current_time, &mut self.rng)
        };
        for entry in &plan {
            self.total_route_length += self.network.path_length(&entry.route);
        }
        self.fleet.reposition(plan);
    }

    /// Export records for every order requested during the run window.
    pub fn export_orders(&self) -> OrdersExport {
        let end_time = self.end_time.unwrap_or(self.current_time);
        self.order_book
            .export_orders(self.config.start_time, end_time)
    }

    /// Fleet histories; `generated_time` comes from the caller so replays
    /// can pin it.
    pub fn export_fleet(&self, generated_time: &str) -> FleetExport {
        self.fleet.export_history(generated_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::{NetworkEdge, NetworkNode};

    fn small_network() -> RoadNetwork {
        let nodes = (0..4)
            .map(|i| NetworkNode {
                id: NodeId(i),
                x: f64::from(i),
                y: 0.0,
            })
            .collect();
        let edges = (1..4)
            .map(|i| NetworkEdge {
                source: NodeId(i - 1),
                target: NodeId(i),
                length: 1.0,
                time: 1,
            })
            .collect();
        RoadNetwork::new(nodes, edges).unwrap()
    }

    #[test]
    fn construction_validates_the_configuration() {
        let config = SimulatorConfig {
            taxi_count: 0,
            ..Default::default()
        };
        assert!(Simulator::new(
            config,
            small_network(),
            Vec::new(),
            VehiclePlacement::Random
        )
        .is_err());

        let config = SimulatorConfig {
            time_window: 0,
            ..Default::default()
        };
        assert!(Simulator::new(
            config,
            small_network(),
            Vec::new(),
            VehiclePlacement::Random
        )
        .is_err());

        assert!(Simulator::new(
            SimulatorConfig::default(),
            small_network(),
            Vec::new(),
            VehiclePlacement::Fixed(vec![NodeId(99)]),
        )
        .is_err());
    }

    #[test]
    fn random_placement_uses_the_configured_count() {
        let config = SimulatorConfig {
            taxi_count: 7,
            ..Default::default()
        };
        let simulator = Simulator::new(
            config,
            small_network(),
            Vec::new(),
            VehiclePlacement::Random,
        )
        .unwrap();
        assert_eq!(simulator.fleet().len(), 7);
        for taxi in simulator.fleet().vehicles() {
            assert!(simulator.network().contains(taxi.position_node));
        }
    }

    #[test]
    fn the_clock_moves_by_whole_windows() {
        let config = SimulatorConfig {
            taxi_count: 1,
            time_window: 30,
            ..Default::default()
        };
        let mut simulator = Simulator::new(
            config,
            small_network(),
            Vec::new(),
            VehiclePlacement::Fixed(vec![NodeId(0)]),
        )
        .unwrap();
        assert_eq!(simulator.step(), 30);
        assert_eq!(simulator.step(), 60);
        assert_eq!(simulator.current_time(), 60);
    }
}
