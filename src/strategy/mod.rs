use crate::model::{order::OrderId, vehicle::VehicleId, MapType, TravelTime};

pub mod matching;
pub mod reposition;

/// Sparse per-tick travel-time table: idle vehicle -> reachable order ->
/// time from the vehicle position to the order pickup. Unreachable pairs are
/// absent.
pub type CostMatrix = MapType<VehicleId, MapType<OrderId, TravelTime>>;
