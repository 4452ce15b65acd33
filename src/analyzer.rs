use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::export::{read_orders, OrderExport, OrdersExport};
use crate::model::{vehicle::VehicleId, MapType, Timestamp};

/// Aggregate service-quality metrics computed from an order export.
#[derive(Debug, Clone, Serialize)]
pub struct KeyMetrics {
    pub total_orders: usize,
    /// Share of orders that got a taxi.
    pub response_rate: f64,
    /// Mean time from request to assignment, over assigned orders.
    pub avg_response_wait_time: Option<f64>,
    /// Mean time from assignment to pickup, over picked-up orders.
    pub avg_pickup_after_assignment: Option<f64>,
    /// Mean time from pickup to dropoff, over completed trips with a pickup.
    pub avg_trip_time: Option<f64>,
    /// Mean over taxis of occupied time divided by the observed span.
    pub avg_vehicle_occupancy_rate: f64,
    /// Dropoff recorded without a pickup timestamp.
    pub special_case_no_pickup: usize,
    /// Identical pickup and dropoff nodes.
    pub special_case_same_location: usize,
    /// Assignment timestamped before the request.
    pub special_case_invalid_assignment: usize,
    /// Dropoff timestamped before the pickup.
    pub special_case_negative_trip: usize,
    pub total_special_cases: usize,
}

/// Computes run statistics from exported order records.
pub struct OrderAnalyzer {
    records: Vec<OrderExport>,
}

impl OrderAnalyzer {
    pub fn new(export: &OrdersExport) -> Self {
        Self {
            records: export.values().cloned().collect(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(&read_orders(path)?))
    }

    pub fn key_metrics(&self) -> KeyMetrics {
        let total_orders = self.records.len();
        let assigned: Vec<&OrderExport> = self
            .records
            .iter()
            .filter(|record| record.assigned_taxi.is_some())
            .collect();

        let response_rate = if total_orders > 0 {
            assigned.len() as f64 / total_orders as f64
        } else {
            0.0
        };

        let avg_response_wait_time = mean(
            assigned
                .iter()
                .filter_map(|r| r.assigned_time.map(|t| t - r.request_time)),
        );
        let avg_pickup_after_assignment = mean(self.records.iter().filter_map(|r| {
            match (r.pickup_time, r.assigned_time) {
                (Some(pickup), Some(assigned)) => Some(pickup - assigned),
                _ => None,
            }
        }));

        let trip_times: Vec<Timestamp> = self
            .records
            .iter()
            .filter_map(|r| match (r.pickup_time, r.dropoff_time) {
                (Some(pickup), Some(dropoff)) => Some(dropoff - pickup),
                _ => None,
            })
            .collect();
        let avg_trip_time = mean(trip_times.iter().copied());
        let special_case_negative_trip = trip_times.iter().filter(|t| **t < 0).count();

        let special_case_no_pickup = self
            .records
            .iter()
            .filter(|r| r.pickup_time.is_none() && r.dropoff_time.is_some())
            .count();
        let special_case_same_location = self
            .records
            .iter()
            .filter(|r| r.pickup_node == r.dropoff_node)
            .count();
        let special_case_invalid_assignment = self
            .records
            .iter()
            .filter(|r| r.assigned_time.is_some_and(|t| t < r.request_time))
            .count();

        KeyMetrics {
            total_orders,
            response_rate,
            avg_response_wait_time,
            avg_pickup_after_assignment,
            avg_trip_time,
            avg_vehicle_occupancy_rate: self.occupancy_rate(&assigned),
            special_case_no_pickup,
            special_case_same_location,
            special_case_invalid_assignment,
            special_case_negative_trip,
            total_special_cases: special_case_no_pickup
                + special_case_same_location
                + special_case_invalid_assignment
                + special_case_negative_trip,
        }
    }

    /// Per-taxi occupied time (assignment to dropoff) over the observed
    /// span, averaged over every taxi that served an order.
    fn occupancy_rate(&self, assigned: &[&OrderExport]) -> f64 {
        if assigned.is_empty() {
            return 0.0;
        }
        let span_start = assigned.iter().map(|r| r.request_time).min().unwrap_or(0);
        let span_end = assigned
            .iter()
            .map(|r| r.request_time)
            .max()
            .unwrap_or(0)
            .max(
                assigned
                    .iter()
                    .filter_map(|r| r.dropoff_time)
                    .max()
                    .unwrap_or(0),
            );
        let span = span_end - span_start;
        if span <= 0 {
            return 0.0;
        }
        let mut occupied: MapType<VehicleId, Timestamp> = MapType::new();
        for record in assigned {
            let Some(taxi_id) = record.assigned_taxi else {
                continue;
            };
            let slot = occupied.entry(taxi_id).or_insert(0);
            if let (Some(assigned_time), Some(dropoff_time)) =
                (record.assigned_time, record.dropoff_time)
            {
                *slot += (dropoff_time - assigned_time).max(0);
            }
        }
        let rates: Vec<f64> = occupied
            .values()
            .map(|time| *time as f64 / span as f64)
            .collect();
        rates.iter().sum::<f64>() / rates.len() as f64
    }

    /// Human-readable summary of [`Self::key_metrics`].
    pub fn report(&self) -> String {
        let metrics = self.key_metrics();
        let mut out = String::new();
        let _ = writeln!(out, "===== Order key metrics =====");
        let _ = writeln!(out, "1. Total orders: {}", metrics.total_orders);
        let _ = writeln!(out, "2. Response rate: {:.2}%", metrics.response_rate * 100.0);
        match metrics.avg_response_wait_time {
            Some(value) => {
                let _ = writeln!(out, "3. Average response wait: {value:.2} time units");
                let _ = writeln!(out, "   (request to assignment)");
            }
            None => {
                let _ = writeln!(out, "3. Average response wait: no data");
            }
        }
        match metrics.avg_pickup_after_assignment {
            Some(value) => {
                let _ = writeln!(out, "4. Average pickup after assignment: {value:.2} time units");
                let _ = writeln!(out, "   (assignment to pickup)");
            }
            None => {
                let _ = writeln!(out, "4. Average pickup after assignment: no data");
            }
        }
        match metrics.avg_trip_time {
            Some(value) => {
                let _ = writeln!(out, "5. Average trip time: {value:.2} time units");
                let _ = writeln!(out, "   (pickup to dropoff)");
            }
            None => {
                let _ = writeln!(out, "5. Average trip time: no data");
            }
        }
        let _ = writeln!(
            out,
            "6. Average vehicle occupancy rate: {:.2}%",
            metrics.avg_vehicle_occupancy_rate * 100.0
        );
        let _ = writeln!(out, "7. Special cases:");
        let _ = writeln!(
            out,
            "   - dropoff recorded without pickup: {}",
            metrics.special_case_no_pickup
        );
        let _ = writeln!(
            out,
            "   - identical pickup and dropoff nodes: {}",
            metrics.special_case_same_location
        );
        let _ = writeln!(
            out,
            "   - assignment before request: {}",
            metrics.special_case_invalid_assignment
        );
        let _ = writeln!(
            out,
            "   - negative trip time: {}",
            metrics.special_case_negative_trip
        );
        let _ = writeln!(out, "   - total: {}", metrics.total_special_cases);
        out
    }
}

fn mean(values: impl Iterator<Item = Timestamp>) -> Option<f64> {
    let collected: Vec<Timestamp> = values.collect();
    if collected.is_empty() {
        return None;
    }
    Some(collected.iter().sum::<Timestamp>() as f64 / collected.len() as f64)
}
