use std::{
    borrow::{Borrow, BorrowMut},
    hash::Hash,
    path::Path,
};

use chrono::Timelike;
use serde::{de::DeserializeOwned, Deserialize};

pub mod network;
pub mod order;
pub mod vehicle;

/// Simulated clock value, in seconds from midnight.
pub type Timestamp = i64;

/// Path cost along the road network, in the same unit as [`Timestamp`].
pub type TravelTime = i64;

pub fn read_csv<T>(path: impl AsRef<Path>) -> anyhow::Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let mut reader = csv::Reader::from_path(path)?;
    let records: csv::Result<Vec<T>> = reader.deserialize().collect();
    Ok(records?)
}

/// Parses an `HH:MM:SS` column into seconds from midnight.
pub fn seconds_of_day<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let time = chrono::NaiveTime::parse_from_str(&s, "%H:%M:%S").map_err(serde::de::Error::custom)?;
    Ok(Timestamp::from(time.num_seconds_from_midnight()))
}

pub trait Map<K, V>: BorrowMut<MapType<K, V>> + Into<MapType<K, V>>
where
    K: Eq + Ord + 'static,
    V: 'static,
{
    fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q> + Ord,
        Q: ?Sized + Hash + Eq + Ord,
    {
        self.borrow().get(key)
    }

    fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q> + Ord,
        Q: ?Sized + Hash + Eq + Ord,
    {
        self.borrow_mut().get_mut(key)
    }

    fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.borrow().iter()
    }

    fn keys(&self) -> impl Iterator<Item = &K> {
        self.borrow().keys()
    }

    fn values(&self) -> impl Iterator<Item = &V> {
        self.borrow().values()
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.borrow_mut().values_mut()
    }

    fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q> + Ord,
        Q: ?Sized + Hash + Eq + Ord,
    {
        self.borrow().contains_key(key)
    }

    fn insert(&mut self, key: K, value: V) {
        self.borrow_mut().insert(key, value);
    }

    fn len(&self) -> usize {
        self.borrow().len()
    }

    fn is_empty(&self) -> bool {
        self.borrow().is_empty()
    }
}

pub type MapType<K, V> = std::collections::BTreeMap<K, V>;

#[macro_export]
macro_rules! define_map {
    ($key:ty, $value:ty, $base:ident) => {
        #[derive(Debug, Default, Clone)]
        pub struct $base($crate::model::MapType<$key, $value>);

        impl std::borrow::Borrow<$crate::model::MapType<$key, $value>> for $base {
            fn borrow(&self) -> &$crate::model::MapType<$key, $value> {
                &self.0
            }
        }

        impl std::borrow::BorrowMut<$crate::model::MapType<$key, $value>> for $base {
            fn borrow_mut(&mut self) -> &mut $crate::model::MapType<$key, $value> {
                &mut self.0
            }
        }

        impl $crate::model::Map<$key, $value> for $base {}

        impl From<$crate::model::MapType<$key, $value>> for $base {
            fn from(map: $crate::model::MapType<$key, $value>) -> Self {
                Self(map)
            }
        }

        impl From<$base> for $crate::model::MapType<$key, $value> {
            fn from(base: $base) -> Self {
                base.0
            }
        }

        impl IntoIterator for $base {
            type Item = ($key, $value);
            type IntoIter =
                <$crate::model::MapType<$key, $value> as std::iter::IntoIterator>::IntoIter;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }
    };
}
