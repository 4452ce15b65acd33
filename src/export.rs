use std::fs;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::model::{
    network::NodeId,
    order::{Order, OrderId, OrderStatus},
    vehicle::{Vehicle, VehicleId},
    MapType, Timestamp,
};

/// Exported order record; missing timestamps serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExport {
    pub order_id: OrderId,
    pub pickup_node: NodeId,
    pub dropoff_node: NodeId,
    pub request_time: Timestamp,
    pub assigned_taxi: Option<VehicleId>,
    pub assigned_time: Option<Timestamp>,
    pub pickup_time: Option<Timestamp>,
    pub dropoff_time: Option<Timestamp>,
    pub status: OrderStatus,
}

impl From<&Order> for OrderExport {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id,
            pickup_node: order.pickup_node,
            dropoff_node: order.dropoff_node,
            request_time: order.request_time,
            assigned_taxi: order.assigned_taxi,
            assigned_time: order.assigned_time,
            pickup_time: order.pickup_time,
            dropoff_time: order.dropoff_time,
            status: order.status,
        }
    }
}

/// Order export document, keyed by order id rendered as a string.
pub type OrdersExport = MapType<String, OrderExport>;

/// Builds the export for every order requested inside
/// `[start_time, end_time]`.
pub fn orders_export<'a>(
    orders: impl Iterator<Item = &'a Order>,
    start_time: Timestamp,
    end_time: Timestamp,
) -> OrdersExport {
    orders
        .filter(|order| order.request_time >= start_time && order.request_time <= end_time)
        .map(|order| (order.order_id.to_string(), OrderExport::from(order)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHistoryEntry {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteHistoryEntry {
    pub position: NodeId,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxiHistory {
    pub taxi_id: VehicleId,
    pub order_history: Vec<OrderHistoryEntry>,
    pub route_history: Vec<RouteHistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub generated_time: String,
    pub total_taxis: usize,
}

/// Fleet export document: run metadata plus per-taxi histories keyed by
/// taxi id rendered as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetExport {
    pub metadata: ExportMetadata,
    pub fleet_data: MapType<String, TaxiHistory>,
}

/// Builds the fleet export. `generated_time` is supplied by the caller so
/// that replays can pin it.
pub fn fleet_export<'a>(
    vehicles: impl Iterator<Item = &'a Vehicle>,
    generated_time: &str,
) -> FleetExport {
    let fleet_data: MapType<String, TaxiHistory> = vehicles
        .map(|taxi| {
            (
                taxi.taxi_id.to_string(),
                TaxiHistory {
                    taxi_id: taxi.taxi_id,
                    order_history: taxi
                        .order_history
                        .iter()
                        .map(|order_id| OrderHistoryEntry {
                            order_id: *order_id,
                        })
                        .collect(),
                    route_history: taxi
                        .route_history
                        .iter()
                        .map(|point| RouteHistoryEntry {
                            position: point.node,
                            timestamp: point.time,
                        })
                        .collect(),
                },
            )
        })
        .collect();
    FleetExport {
        metadata: ExportMetadata {
            generated_time: generated_time.to_string(),
            total_taxis: fleet_data.len(),
        },
        fleet_data,
    }
}

/// Serializes `value` next to `path` and moves it into place with a single
/// rename, so readers never observe a partial file.
pub fn write_json<T>(path: impl AsRef<Path>, value: &T) -> anyhow::Result<()>
where
    T: ?Sized + Serialize,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("unable to create {}", parent.display()))?;
        }
    }
    let body = serde_json::to_vec_pretty(value).context("unable to serialize export")?;
    let staging = path.with_extension("tmp");
    fs::write(&staging, body)
        .with_context(|| format!("unable to write {}", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("unable to move export into {}", path.display()))?;
    Ok(())
}

/// Reads an order export back; inverse of writing [`OrdersExport`].
pub fn read_orders(path: impl AsRef<Path>) -> anyhow::Result<OrdersExport> {
    let path = path.as_ref();
    let body = fs::read_to_string(path)
        .with_context(|| format!("unable to read {}", path.display()))?;
    serde_json::from_str(&body).context("unable to parse orders export")
}
