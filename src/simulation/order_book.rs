use tracing::{debug, info};

use crate::export::{orders_export, OrdersExport};
use crate::model::{
    order::{Order, OrderId, OrderMap, OrderRecord, OrderStatus},
    vehicle::{OrderUpdate, OrderUpdateKind, VehicleId},
    Map as _, MapType, Timestamp,
};

/// Owns every order of the run and applies all lifecycle changes.
pub struct OrderBook {
    orders: OrderMap,
    waiting_threshold: Timestamp,
}

impl OrderBook {
    /// Builds the book from the input table. Records requested before
    /// `start_time` are discarded.
    pub fn new(records: Vec<OrderRecord>, start_time: Timestamp, waiting_threshold: Timestamp) -> Self {
        let mut orders = MapType::new();
        let mut discarded = 0usize;
        for record in records {
            if record.ot < start_time {
                discarded += 1;
                continue;
            }
            orders.insert(record.id, Order::new(&record));
        }
        info!(orders = orders.len(), discarded, "order book initialised");
        Self {
            orders: orders.into(),
            waiting_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Orders that are ready to be matched at `current_time`. Any waiting
    /// order whose age exceeds the threshold is cancelled first and excluded
    /// from the result.
    pub fn waiting_orders(&mut self, current_time: Timestamp) -> Vec<&Order> {
        let overdue: Vec<OrderId> = self
            .orders
            .values()
            .filter(|order| {
                order.status == OrderStatus::Waiting
                    && order.request_time <= current_time
                    && current_time - order.request_time > self.waiting_threshold
            })
            .map(|order| order.order_id)
            .collect();
        for order_id in overdue {
            if let Some(order) = self.orders.get_mut(&order_id) {
                order.cancel(current_time);
                debug!(%order_id, "order cancelled after waiting too long");
            }
        }
        self.orders
            .values()
            .filter(|order| {
                order.status == OrderStatus::Waiting && order.request_time <= current_time
            })
            .collect()
    }

    /// Hands a waiting order to a taxi. Returns whether the transition
    /// happened.
    pub fn assign(&mut self, order_id: OrderId, taxi_id: VehicleId, current_time: Timestamp) -> bool {
        match self.orders.get_mut(&order_id) {
            Some(order) => order.assign(taxi_id, current_time),
            None => {
                debug!(%order_id, "assignment for unknown order ignored");
                false
            }
        }
    }

    /// Applies the batch of lifecycle events reported by the fleet. Unknown
    /// ids and out-of-order events are dropped.
    pub fn apply_transitions(&mut self, updates: &[OrderUpdate]) {
        for update in updates {
            let Some(order) = self.orders.get_mut(&update.order_id) else {
                debug!(order_id = %update.order_id, "update for unknown order ignored");
                continue;
            };
            let applied = match update.kind {
                OrderUpdateKind::PickedUp => order.pickup(update.time),
                OrderUpdateKind::Completed => order.complete(update.time),
            };
            if !applied {
                debug!(
                    order_id = %update.order_id,
                    status = ?order.status,
                    "out-of-order transition dropped"
                );
            }
        }
    }

    /// Export records for every order requested inside `[start_time, end_time]`.
    pub fn export_orders(&self, start_time: Timestamp, end_time: Timestamp) -> OrdersExport {
        orders_export(self.orders.values(), start_time, end_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::NodeId;

    fn record(id: i64, ot: Timestamp) -> OrderRecord {
        OrderRecord {
            id: OrderId(id),
            pickup_node: NodeId(0),
            dropoff_node: NodeId(5),
            ot,
        }
    }

    #[test]
    fn records_before_start_are_discarded() {
        let book = OrderBook::new(vec![record(1, 99), record(2, 100), record(3, 101)], 100, 300);
        assert_eq!(book.len(), 2);
        assert!(book.get(OrderId(1)).is_none());
        assert!(book.get(OrderId(2)).is_some());
    }

    #[test]
    fn waiting_orders_hides_future_requests() {
        let mut book = OrderBook::new(vec![record(1, 0), record(2, 50)], 0, 300);
        let ready: Vec<OrderId> = book.waiting_orders(10).iter().map(|o| o.order_id).collect();
        assert_eq!(ready, vec![OrderId(1)]);
    }

    #[test]
    fn timeout_fires_strictly_after_the_threshold() {
        let mut book = OrderBook::new(vec![record(1, 0)], 0, 5);
        // at the threshold the order still waits
        assert_eq!(book.waiting_orders(5).len(), 1);
        assert_eq!(book.get(OrderId(1)).unwrap().status, OrderStatus::Waiting);
        // one unit later it is cancelled and hidden
        assert!(book.waiting_orders(6).is_empty());
        let order = book.get(OrderId(1)).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.cancel_time, Some(6));
    }

    #[test]
    fn assigned_orders_stop_waiting() {
        let mut book = OrderBook::new(vec![record(1, 0)], 0, 300);
        assert!(book.assign(OrderId(1), VehicleId(4), 10));
        assert!(book.waiting_orders(10).is_empty());
        assert!(!book.assign(OrderId(1), VehicleId(5), 11));
        assert!(!book.assign(OrderId(99), VehicleId(5), 11));
    }

    #[test]
    fn transition_batches_update_timestamps() {
        let mut book = OrderBook::new(vec![record(1, 0)], 0, 300);
        book.assign(OrderId(1), VehicleId(4), 10);
        book.apply_transitions(&[
            OrderUpdate {
                order_id: OrderId(1),
                kind: OrderUpdateKind::PickedUp,
                time: 20,
            },
            // unknown order is ignored
            OrderUpdate {
                order_id: OrderId(42),
                kind: OrderUpdateKind::Completed,
                time: 21,
            },
        ]);
        let order = book.get(OrderId(1)).unwrap();
        assert_eq!(order.status, OrderStatus::PickedUp);
        assert_eq!(order.pickup_time, Some(20));

        book.apply_transitions(&[OrderUpdate {
            order_id: OrderId(1),
            kind: OrderUpdateKind::Completed,
            time: 30,
        }]);
        let order = book.get(OrderId(1)).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.dropoff_time, Some(30));
    }

    #[test]
    fn completion_without_pickup_is_tolerated() {
        let mut book = OrderBook::new(vec![record(1, 0)], 0, 300);
        book.assign(OrderId(1), VehicleId(4), 10);
        book.apply_transitions(&[OrderUpdate {
            order_id: OrderId(1),
            kind: OrderUpdateKind::Completed,
            time: 12,
        }]);
        let order = book.get(OrderId(1)).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.pickup_time.is_none());
        assert_eq!(order.dropoff_time, Some(12));
    }
}
