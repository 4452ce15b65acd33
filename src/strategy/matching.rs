use std::collections::BTreeSet;
use std::str::FromStr;

use anyhow::bail;
use rand::{rngs::SmallRng, seq::SliceRandom};
use tracing::warn;

use crate::model::{order::OrderId, vehicle::VehicleId, TravelTime};

use super::CostMatrix;

/// How waiting orders are paired with idle vehicles each tick. Pure
/// functions of the cost matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Arbitrary pairing, deterministic for a seed.
    Random,
    /// Cheapest vehicle per order, capped by the pickup-time limit.
    Nearest,
    /// Reserved for a global assignment algorithm; currently behaves like
    /// [`MatchStrategy::Nearest`].
    Batch,
}

impl FromStr for MatchStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "nearest" => Ok(Self::Nearest),
            "batch" => Ok(Self::Batch),
            other => bail!("unknown match strategy {other:?} (expected random, nearest or batch)"),
        }
    }
}

impl MatchStrategy {
    /// Returns `(taxi, order)` pairs; every id appears at most once.
    pub fn run(
        &self,
        costs: &CostMatrix,
        max_pickup_time: TravelTime,
        rng: &mut SmallRng,
    ) -> Vec<(VehicleId, OrderId)> {
        match self {
            Self::Random => random_matching(costs, rng),
            Self::Nearest => nearest_matching(costs, max_pickup_time),
            Self::Batch => {
                warn!("batch matching is not implemented, falling back to nearest");
                nearest_matching(costs, max_pickup_time)
            }
        }
    }
}

fn candidate_orders(costs: &CostMatrix) -> BTreeSet<OrderId> {
    costs
        .values()
        .flat_map(|row| row.keys().copied())
        .collect()
}

fn random_matching(costs: &CostMatrix, rng: &mut SmallRng) -> Vec<(VehicleId, OrderId)> {
    let mut taxi_ids: Vec<VehicleId> = costs.keys().copied().collect();
    let mut order_ids: Vec<OrderId> = candidate_orders(costs).into_iter().collect();
    taxi_ids.shuffle(rng);
    order_ids.shuffle(rng);

    let mut taken: BTreeSet<OrderId> = BTreeSet::new();
    let mut matches = Vec::new();
    for taxi_id in taxi_ids {
        let Some(row) = costs.get(&taxi_id) else {
            continue;
        };
        let choice = order_ids
            .iter()
            .find(|order_id| !taken.contains(order_id) && row.contains_key(order_id));
        if let Some(order_id) = choice {
            taken.insert(*order_id);
            matches.push((taxi_id, *order_id));
        }
    }
    matches
}

fn nearest_matching(costs: &CostMatrix, max_pickup_time: TravelTime) -> Vec<(VehicleId, OrderId)> {
    let mut free: BTreeSet<VehicleId> = costs.keys().copied().collect();
    let mut matches = Vec::new();
    for order_id in candidate_orders(costs) {
        let mut best: Option<(TravelTime, VehicleId)> = None;
        for (taxi_id, row) in costs {
            if !free.contains(taxi_id) {
                continue;
            }
            let Some(cost) = row.get(&order_id) else {
                continue;
            };
            // strict less keeps the lowest taxi id on ties
            if *cost <= max_pickup_time && best.map_or(true, |(c, _)| *cost < c) {
                best = Some((*cost, *taxi_id));
            }
        }
        if let Some((_, taxi_id)) = best {
            free.remove(&taxi_id);
            matches.push((taxi_id, order_id));
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MapType;
    use rand::SeedableRng;

    fn matrix(rows: &[(u32, &[(i64, TravelTime)])]) -> CostMatrix {
        rows.iter()
            .map(|(taxi, entries)| {
                (
                    VehicleId(*taxi),
                    entries
                        .iter()
                        .map(|(order, cost)| (OrderId(*order), *cost))
                        .collect::<MapType<_, _>>(),
                )
            })
            .collect()
    }

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(17)
    }

    #[test]
    fn nearest_prefers_the_cheapest_vehicle() {
        let costs = matrix(&[
            (1, &[(10, 120), (11, 5)]),
            (2, &[(10, 30), (11, 200)]),
            (3, &[(10, 90)]),
        ]);
        let matches = MatchStrategy::Nearest.run(&costs, 300, &mut rng());
        // orders in id order: 10 goes to taxi 2 (cost 30), 11 to taxi 1 (cost 5)
        assert_eq!(
            matches,
            vec![(VehicleId(2), OrderId(10)), (VehicleId(1), OrderId(11))]
        );
    }

    #[test]
    fn nearest_breaks_ties_by_taxi_id() {
        let costs = matrix(&[(5, &[(10, 40)]), (2, &[(10, 40)]), (9, &[(10, 40)])]);
        let matches = MatchStrategy::Nearest.run(&costs, 300, &mut rng());
        assert_eq!(matches, vec![(VehicleId(2), OrderId(10))]);
    }

    #[test]
    fn nearest_respects_the_pickup_cap() {
        let costs = matrix(&[(1, &[(10, 301)]), (2, &[(10, 500)])]);
        assert!(MatchStrategy::Nearest.run(&costs, 300, &mut rng()).is_empty());
        // at the cap the match is allowed
        let costs = matrix(&[(1, &[(10, 300)])]);
        assert_eq!(
            MatchStrategy::Nearest.run(&costs, 300, &mut rng()),
            vec![(VehicleId(1), OrderId(10))]
        );
    }

    #[test]
    fn unreachable_pairs_never_match() {
        // order 11 is absent from every row
        let costs = matrix(&[(1, &[(10, 3)]), (2, &[(10, 7)])]);
        let matches = MatchStrategy::Nearest.run(&costs, 300, &mut rng());
        assert_eq!(matches, vec![(VehicleId(1), OrderId(10))]);
        // an empty matrix produces no matches
        assert!(MatchStrategy::Random.run(&CostMatrix::new(), 300, &mut rng()).is_empty());
    }

    #[test]
    fn random_matching_is_exclusive_and_deterministic() {
        let costs = matrix(&[
            (1, &[(10, 1), (11, 1), (12, 1)]),
            (2, &[(10, 1), (11, 1)]),
            (3, &[(12, 1)]),
        ]);
        let first = MatchStrategy::Random.run(&costs, 300, &mut rng());
        let second = MatchStrategy::Random.run(&costs, 300, &mut rng());
        assert_eq!(first, second, "same seed, same pairing");
        // taxis 1 and 2 can always be served whatever the shuffle order
        assert!(first.len() >= 2);

        let mut taxis: Vec<VehicleId> = first.iter().map(|(t, _)| *t).collect();
        let mut orders: Vec<OrderId> = first.iter().map(|(_, o)| *o).collect();
        taxis.sort();
        taxis.dedup();
        orders.sort();
        orders.dedup();
        assert_eq!(taxis.len(), first.len(), "no taxi is matched twice");
        assert_eq!(orders.len(), first.len(), "no order is matched twice");
        for (taxi_id, order_id) in &first {
            assert!(costs[taxi_id].contains_key(order_id), "pairs come from the matrix");
        }
    }

    #[test]
    fn random_matching_only_pairs_reachable_orders() {
        let costs = matrix(&[(1, &[(10, 1)]), (2, &[])]);
        let matches = MatchStrategy::Random.run(&costs, 300, &mut rng());
        assert_eq!(matches, vec![(VehicleId(1), OrderId(10))]);
    }

    #[test]
    fn batch_behaves_like_nearest() {
        let costs = matrix(&[(1, &[(10, 9)]), (2, &[(10, 4)])]);
        assert_eq!(
            MatchStrategy::Batch.run(&costs, 300, &mut rng()),
            MatchStrategy::Nearest.run(&costs, 300, &mut rng())
        );
    }

    #[test]
    fn strategy_keys_parse_case_insensitively() {
        assert_eq!("Nearest".parse::<MatchStrategy>().unwrap(), MatchStrategy::Nearest);
        assert_eq!("random".parse::<MatchStrategy>().unwrap(), MatchStrategy::Random);
        assert_eq!("BATCH".parse::<MatchStrategy>().unwrap(), MatchStrategy::Batch);
        assert!("hungarian".parse::<MatchStrategy>().is_err());
    }
}
