use tracing::{debug, info};

use crate::export::{fleet_export, FleetExport};
use crate::model::{
    network::{NodeId, Route},
    order::OrderId,
    vehicle::{OrderUpdate, Vehicle, VehicleId, VehicleMap, VehicleStatus},
    Map as _, MapType, Timestamp,
};

/// One entry of a repositioning plan.
#[derive(Debug, Clone)]
pub struct RepositionAssignment {
    pub taxi_id: VehicleId,
    pub destination: NodeId,
    pub route: Route,
}

/// Owns every vehicle of the run; all vehicle mutation goes through here.
pub struct Fleet {
    taxis: VehicleMap,
}

impl Fleet {
    /// Creates one taxi per initial position, with ids assigned from 1 in
    /// order.
    pub fn new(initial_positions: &[NodeId]) -> Self {
        let mut taxis = MapType::new();
        for (index, position) in initial_positions.iter().enumerate() {
            let taxi_id = VehicleId(index as u32 + 1);
            taxis.insert(taxi_id, Vehicle::new(taxi_id, *position));
        }
        info!(taxis = taxis.len(), "fleet initialised");
        Self {
            taxis: taxis.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.taxis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxis.is_empty()
    }

    pub fn get(&self, taxi_id: VehicleId) -> Option<&Vehicle> {
        self.taxis.get(&taxi_id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.taxis.values()
    }

    pub fn idle_vehicles(&self) -> Vec<&Vehicle> {
        self.taxis
            .values()
            .filter(|taxi| taxi.status == VehicleStatus::Idle)
            .collect()
    }

    /// Delegates an order to a taxi. No-op (returning `false`) for unknown or
    /// non-idle taxis.
    pub fn assign(
        &mut self,
        taxi_id: VehicleId,
        order_id: OrderId,
        pickup_node: NodeId,
        route: Route,
    ) -> bool {
        match self.taxis.get_mut(&taxi_id) {
            Some(taxi) => taxi.assign_order(order_id, pickup_node, route),
            None => {
                debug!(%taxi_id, "assignment for unknown taxi ignored");
                false
            }
        }
    }

    /// Applies a repositioning plan; entries for unknown or non-idle taxis
    /// are skipped.
    pub fn reposition(&mut self, plan: Vec<RepositionAssignment>) {
        for entry in plan {
            let Some(taxi) = self.taxis.get_mut(&entry.taxi_id) else {
                debug!(taxi_id = %entry.taxi_id, "reposition for unknown taxi ignored");
                continue;
            };
            if !taxi.start_repositioning(entry.destination, entry.route) {
                debug!(taxi_id = %entry.taxi_id, "reposition skipped, taxi not idle");
            }
        }
    }

    /// Advances every vehicle to `current_time` and collects the resulting
    /// order events, in taxi-id order.
    pub fn advance_all(&mut self, current_time: Timestamp) -> Vec<OrderUpdate> {
        self.taxis
            .values_mut()
            .filter_map(|taxi| taxi.advance(current_time))
            .collect()
    }

    pub fn export_history(&self, generated_time: &str) -> FleetExport {
        fleet_export(self.taxis.values(), generated_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::RoutePoint;
    use crate::model::vehicle::OrderUpdateKind;

    fn route(points: &[(u32, Timestamp)]) -> Route {
        points
            .iter()
            .map(|(node, time)| RoutePoint {
                node: NodeId(*node),
                time: *time,
            })
            .collect()
    }

    #[test]
    fn taxis_get_sequential_ids_from_one() {
        let fleet = Fleet::new(&[NodeId(3), NodeId(8), NodeId(3)]);
        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet.get(VehicleId(1)).unwrap().position_node, NodeId(3));
        assert_eq!(fleet.get(VehicleId(2)).unwrap().position_node, NodeId(8));
        assert!(fleet.get(VehicleId(4)).is_none());
        assert_eq!(fleet.idle_vehicles().len(), 3);
    }

    #[test]
    fn assignment_removes_the_taxi_from_the_idle_pool() {
        let mut fleet = Fleet::new(&[NodeId(0), NodeId(5)]);
        assert!(fleet.assign(
            VehicleId(1),
            OrderId(1001),
            NodeId(2),
            route(&[(0, 0), (1, 1), (2, 2)]),
        ));
        let idle: Vec<VehicleId> = fleet.idle_vehicles().iter().map(|t| t.taxi_id).collect();
        assert_eq!(idle, vec![VehicleId(2)]);
        assert_eq!(
            fleet.get(VehicleId(1)).unwrap().order_history,
            vec![OrderId(1001)]
        );
        // a busy taxi refuses further orders, an unknown one is ignored
        assert!(!fleet.assign(VehicleId(1), OrderId(1002), NodeId(3), route(&[(2, 0)])));
        assert!(!fleet.assign(VehicleId(9), OrderId(1002), NodeId(3), route(&[(2, 0)])));
    }

    #[test]
    fn reposition_only_moves_idle_taxis() {
        let mut fleet = Fleet::new(&[NodeId(0), NodeId(5)]);
        fleet.assign(
            VehicleId(1),
            OrderId(1001),
            NodeId(2),
            route(&[(0, 0), (2, 2)]),
        );
        fleet.reposition(vec![
            RepositionAssignment {
                taxi_id: VehicleId(1),
                destination: NodeId(9),
                route: route(&[(0, 0), (9, 4)]),
            },
            RepositionAssignment {
                taxi_id: VehicleId(2),
                destination: NodeId(9),
                route: route(&[(5, 0), (9, 4)]),
            },
            RepositionAssignment {
                taxi_id: VehicleId(7),
                destination: NodeId(9),
                route: route(&[(5, 0), (9, 4)]),
            },
        ]);
        assert_eq!(
            fleet.get(VehicleId(1)).unwrap().status,
            VehicleStatus::EnroutePickup
        );
        assert_eq!(
            fleet.get(VehicleId(2)).unwrap().status,
            VehicleStatus::Repositioning
        );
    }

    #[test]
    fn advance_all_reports_events_in_taxi_id_order() {
        let mut fleet = Fleet::new(&[NodeId(0), NodeId(5)]);
        // both taxis start on their pickup node and finish within one tick
        fleet.assign(
            VehicleId(2),
            OrderId(2002),
            NodeId(5),
            route(&[(5, 0), (5, 0), (6, 1)]),
        );
        fleet.assign(
            VehicleId(1),
            OrderId(1001),
            NodeId(0),
            route(&[(0, 0), (0, 0), (1, 1)]),
        );
        let updates = fleet.advance_all(10);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].order_id, OrderId(1001));
        assert_eq!(updates[0].kind, OrderUpdateKind::Completed);
        assert_eq!(updates[1].order_id, OrderId(2002));
        assert!(fleet.idle_vehicles().len() == 2);
    }
}
