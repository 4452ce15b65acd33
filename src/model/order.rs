use std::fmt::Display;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::define_map;

use super::{
    network::{NodeId, RoadNetwork},
    read_csv, Timestamp,
};
use super::vehicle::VehicleId;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub i64);

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Waiting,
    Assigned,
    PickedUp,
    Completed,
    Cancelled,
}

/// One row of the simulator's order input table.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub pickup_node: NodeId,
    pub dropoff_node: NodeId,
    pub ot: Timestamp,
}

impl OrderRecord {
    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Vec<OrderRecord>> {
        read_csv(path).context("unable to load orders")
    }
}

/// Raw ride request with geographic endpoints, before snapping onto the
/// network.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOrderRecord {
    pub id: OrderId,
    #[serde(deserialize_with = "crate::model::seconds_of_day")]
    pub stime: Timestamp,
    pub slon: f64,
    pub slat: f64,
    pub elon: f64,
    pub elat: f64,
}

impl RawOrderRecord {
    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Vec<RawOrderRecord>> {
        read_csv(path).context("unable to load raw orders")
    }
}

/// Snaps raw requests to their nearest network nodes and sorts them by
/// request time. Requests that cannot be snapped are dropped.
pub fn snap_orders(raw: Vec<RawOrderRecord>, network: &RoadNetwork) -> Vec<OrderRecord> {
    let mut records: Vec<OrderRecord> = raw
        .into_iter()
        .filter_map(|request| {
            let pickup_node = network.nearest_node(request.slon, request.slat);
            let dropoff_node = network.nearest_node(request.elon, request.elat);
            match (pickup_node, dropoff_node) {
                (Some(pickup_node), Some(dropoff_node)) => Some(OrderRecord {
                    id: request.id,
                    pickup_node,
                    dropoff_node,
                    ot: request.stime,
                }),
                _ => {
                    debug!(order_id = %request.id, "request could not be snapped to the network");
                    None
                }
            }
        })
        .collect();
    records.sort_by_key(|record| (record.ot, record.id));
    records
}

/// A passenger request and its lifecycle state. Transitions move strictly
/// forward; `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: OrderId,
    pub pickup_node: NodeId,
    pub dropoff_node: NodeId,
    pub request_time: Timestamp,
    pub assigned_taxi: Option<VehicleId>,
    pub assigned_time: Option<Timestamp>,
    pub pickup_time: Option<Timestamp>,
    pub dropoff_time: Option<Timestamp>,
    pub cancel_time: Option<Timestamp>,
    pub status: OrderStatus,
}

impl Order {
    pub fn new(record: &OrderRecord) -> Self {
        Self {
            order_id: record.id,
            pickup_node: record.pickup_node,
            dropoff_node: record.dropoff_node,
            request_time: record.ot,
            assigned_taxi: None,
            assigned_time: None,
            pickup_time: None,
            dropoff_time: None,
            cancel_time: None,
            status: OrderStatus::Waiting,
        }
    }

    pub fn assign(&mut self, taxi_id: VehicleId, current_time: Timestamp) -> bool {
        if self.status != OrderStatus::Waiting {
            return false;
        }
        self.assigned_taxi = Some(taxi_id);
        self.assigned_time = Some(current_time);
        self.status = OrderStatus::Assigned;
        true
    }

    pub fn pickup(&mut self, current_time: Timestamp) -> bool {
        if self.status != OrderStatus::Assigned {
            return false;
        }
        self.pickup_time = Some(current_time);
        self.status = OrderStatus::PickedUp;
        true
    }

    /// A trip shorter than one tick reports only its terminal event, so
    /// completion may arrive while the order is still `assigned`; the pickup
    /// timestamp then stays unset.
    pub fn complete(&mut self, current_time: Timestamp) -> bool {
        if !matches!(self.status, OrderStatus::PickedUp | OrderStatus::Assigned) {
            return false;
        }
        self.dropoff_time = Some(current_time);
        self.status = OrderStatus::Completed;
        true
    }

    pub fn cancel(&mut self, current_time: Timestamp) -> bool {
        if self.status != OrderStatus::Waiting {
            return false;
        }
        self.cancel_time = Some(current_time);
        self.status = OrderStatus::Cancelled;
        true
    }
}

define_map!(OrderId, Order, OrderMap);
