use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::define_map;

use super::{
    network::{NodeId, Route, RoutePoint},
    order::OrderId,
    Timestamp,
};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

impl Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleStatus {
    Idle,
    EnroutePickup,
    Occupied,
    Repositioning,
}

impl VehicleStatus {
    pub fn is_moving(self) -> bool {
        !matches!(self, VehicleStatus::Idle)
    }
}

/// Order-lifecycle change observed while a vehicle advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    pub kind: OrderUpdateKind,
    pub time: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderUpdateKind {
    PickedUp,
    Completed,
}

/// A taxi. While moving it follows `current_route`; `route_history` and
/// `order_history` are append-only.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub taxi_id: VehicleId,
    pub position_node: NodeId,
    pub status: VehicleStatus,
    pub current_order: Option<OrderId>,
    pub current_destination: Option<NodeId>,
    pub current_route: Option<Route>,
    pub order_history: Vec<OrderId>,
    pub route_history: Vec<RoutePoint>,
}

impl Vehicle {
    pub fn new(taxi_id: VehicleId, position_node: NodeId) -> Self {
        Self {
            taxi_id,
            position_node,
            status: VehicleStatus::Idle,
            current_order: None,
            current_destination: None,
            current_route: None,
            order_history: Vec::new(),
            route_history: Vec::new(),
        }
    }

    /// Accepts an order. The route must run from the current position to the
    /// pickup node and on to the dropoff node. Refused unless idle.
    pub fn assign_order(&mut self, order_id: OrderId, pickup_node: NodeId, route: Route) -> bool {
        if self.status != VehicleStatus::Idle || route.is_empty() {
            return false;
        }
        self.status = VehicleStatus::EnroutePickup;
        self.current_order = Some(order_id);
        self.current_destination = Some(pickup_node);
        self.order_history.push(order_id);
        self.route_history.extend_from_slice(&route);
        self.current_route = Some(route);
        true
    }

    /// Sends the idle vehicle towards `destination_node` without a passenger.
    pub fn start_repositioning(&mut self, destination_node: NodeId, route: Route) -> bool {
        if self.status != VehicleStatus::Idle || route.is_empty() {
            return false;
        }
        self.status = VehicleStatus::Repositioning;
        self.current_destination = Some(destination_node);
        self.route_history.extend_from_slice(&route);
        self.current_route = Some(route);
        true
    }

    fn arrive_at_pickup(&mut self) -> bool {
        if self.status != VehicleStatus::EnroutePickup {
            return false;
        }
        self.status = VehicleStatus::Occupied;
        if let Some(destination) = self.current_destination {
            self.position_node = destination;
        }
        // the passenger rides to the final node of the combined route
        self.current_destination = self
            .current_route
            .as_ref()
            .and_then(|route| route.last())
            .map(|point| point.node);
        true
    }

    fn complete_order(&mut self) -> bool {
        if self.status != VehicleStatus::Occupied {
            return false;
        }
        self.status = VehicleStatus::Idle;
        if let Some(destination) = self.current_destination {
            self.position_node = destination;
        }
        self.current_order = None;
        self.current_destination = None;
        self.current_route = None;
        true
    }

    fn complete_repositioning(&mut self) -> bool {
        if self.status != VehicleStatus::Repositioning {
            return false;
        }
        self.status = VehicleStatus::Idle;
        if let Some(destination) = self.current_destination {
            self.position_node = destination;
        }
        self.current_destination = None;
        self.current_route = None;
        true
    }

    /// Moves the vehicle to the last route node reached by `current_time` and
    /// applies any status transition that entails: reaching the pickup node
    /// turns the vehicle occupied, reaching the route end completes the trip
    /// or the repositioning. Returns at most one order event; when pickup and
    /// dropoff fall within the same call only the completion is reported.
    pub fn advance(&mut self, current_time: Timestamp) -> Option<OrderUpdate> {
        if !self.status.is_moving() {
            return None;
        }
        let route = self.current_route.clone()?;
        let last = *route.last()?;
        let mut update = None;

        if self.status == VehicleStatus::EnroutePickup {
            let order_id = self.current_order;
            for point in &route {
                if point.time > current_time {
                    break;
                }
                self.position_node = point.node;
                if Some(point.node) == self.current_destination && self.arrive_at_pickup() {
                    if let Some(order_id) = order_id {
                        update = Some(OrderUpdate {
                            order_id,
                            kind: OrderUpdateKind::PickedUp,
                            time: point.time,
                        });
                    }
                }
            }
        } else {
            for point in &route {
                if point.time > current_time {
                    break;
                }
                self.position_node = point.node;
            }
        }

        if current_time >= last.time {
            self.position_node = last.node;
            match self.status {
                VehicleStatus::Occupied => {
                    let order_id = self.current_order;
                    if self.complete_order() {
                        if let Some(order_id) = order_id {
                            update = Some(OrderUpdate {
                                order_id,
                                kind: OrderUpdateKind::Completed,
                                time: last.time,
                            });
                        }
                    }
                }
                VehicleStatus::Repositioning => {
                    self.complete_repositioning();
                }
                _ => {}
            }
        }

        update
    }
}

define_map!(VehicleId, Vehicle, VehicleMap);
