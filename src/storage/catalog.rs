//! Collaborator interfaces consumed by the query engine
//!
//! The engine never touches storage formats directly. It resolves schema
//! through a [`SchemaCatalog`] and reads raw per-series point streams from
//! [`ShardReader`]s, one call per (series, field) pair.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::model::{DataType, SeriesKey, Tags, TimeRange};
use crate::query::iterator::BoxedIterator;
use crate::storage::error::StorageResult;

/// Schema and shard metadata
pub trait SchemaCatalog: Send + Sync {
    fn database_exists(&self, database: &str) -> bool;

    fn retention_policy_exists(&self, database: &str, policy: &str) -> bool;

    /// Policy used when a source names none
    fn default_retention_policy(&self, database: &str) -> Option<String>;

    /// Measurement names, sorted
    fn measurements(&self, database: &str, policy: &str) -> Vec<String>;

    /// Field names and types of a measurement (empty if unknown)
    fn field_types(
        &self,
        database: &str,
        policy: &str,
        measurement: &str,
    ) -> BTreeMap<String, DataType>;

    /// Tag sets of every series of a measurement, sorted
    fn series(&self, database: &str, policy: &str, measurement: &str) -> Vec<Tags>;

    /// Tag keys present on any series of a measurement
    fn tag_keys(&self, database: &str, policy: &str, measurement: &str) -> BTreeSet<String> {
        self.series(database, policy, measurement)
            .iter()
            .flat_map(|tags| tags.keys().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    /// Shards whose time range overlaps `range`, ordered by shard id
    fn shards(
        &self,
        database: &str,
        policy: &str,
        range: TimeRange,
    ) -> Vec<Arc<dyn ShardReader>>;
}

/// Read access to one shard
pub trait ShardReader: Send + Sync {
    fn id(&self) -> u64;

    /// Time range covered by this shard (inclusive)
    fn time_range(&self) -> TimeRange;

    /// Open a time-ordered point stream for one series field
    ///
    /// Returns `None` when the shard holds nothing for the key. Points carry
    /// the store's write sequence in `seq`. `ascending = false` yields
    /// points newest first.
    fn open_series_iterator(
        &self,
        key: &SeriesKey,
        range: TimeRange,
        ascending: bool,
    ) -> StorageResult<Option<BoxedIterator>>;
}
