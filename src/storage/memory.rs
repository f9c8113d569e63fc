//! In-memory reference store
//!
//! Implements both collaborator traits over plain maps so the engine can be
//! driven end to end without an on-disk format. Data is organised as
//! database → retention policy → time-partitioned shards, with every series
//! field kept as a time-sorted vector inside its shard.
//!
//! Every written point gets a store-wide write sequence number. Readers hand
//! it out in `Point::seq`, which the engine uses to order points sharing a
//! timestamp (later writes win).

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::{DataType, Point, SeriesKey, Tags, TimeRange};
use crate::query::duration::WEEK;
use crate::query::iterator::{BoxedIterator, BufferedIterator};
use crate::storage::catalog::{SchemaCatalog, ShardReader};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::line_protocol::{parse_lines, LinePoint};

/// Policy created with every database
pub const DEFAULT_RETENTION_POLICY: &str = "autogen";

/// Shard width of the default policy
pub const DEFAULT_SHARD_DURATION: i64 = WEEK;

#[derive(Debug)]
struct Database {
    default_policy: String,
    policies: BTreeMap<String, RetentionPolicy>,
}

#[derive(Debug)]
struct RetentionPolicy {
    shard_duration: i64,
    shards: BTreeMap<u64, Arc<MemoryShard>>,
    measurements: BTreeMap<String, MeasurementSchema>,
}

#[derive(Debug, Default)]
struct MeasurementSchema {
    fields: BTreeMap<String, DataType>,
    series: BTreeSet<Tags>,
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    databases: RwLock<BTreeMap<String, Database>>,
    next_seq: AtomicU64,
    next_shard_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database with the default retention policy (no-op if it exists)
    pub fn create_database(&self, name: &str) {
        let mut databases = self.databases.write();
        databases.entry(name.to_string()).or_insert_with(|| {
            let mut policies = BTreeMap::new();
            policies.insert(
                DEFAULT_RETENTION_POLICY.to_string(),
                RetentionPolicy::new(DEFAULT_SHARD_DURATION),
            );
            Database {
                default_policy: DEFAULT_RETENTION_POLICY.to_string(),
                policies,
            }
        });
    }

    /// Create a retention policy, optionally making it the default
    pub fn create_retention_policy(
        &self,
        database: &str,
        name: &str,
        shard_duration: i64,
        make_default: bool,
    ) -> StorageResult<()> {
        let mut databases = self.databases.write();
        let db = databases
            .get_mut(database)
            .ok_or_else(|| StorageError::DatabaseNotFound(database.to_string()))?;
        db.policies
            .entry(name.to_string())
            .or_insert_with(|| RetentionPolicy::new(shard_duration.max(1)));
        if make_default {
            db.default_policy = name.to_string();
        }
        Ok(())
    }

    /// Create a shard covering an explicit range
    ///
    /// Explicit shards may overlap existing ones; points written to them
    /// through [`MemoryStore::write_to_shard`] are merged at query time.
    pub fn create_shard(&self, database: &str, policy: &str, range: TimeRange) -> StorageResult<u64> {
        let mut databases = self.databases.write();
        let rp = policy_mut(&mut databases, database, Some(policy))?;
        let id = self.next_shard_id.fetch_add(1, Ordering::Relaxed) + 1;
        rp.shards.insert(id, Arc::new(MemoryShard::new(id, range)));
        Ok(id)
    }

    /// Write one point, placing it in the shard covering its timestamp
    pub fn write(&self, database: &str, policy: Option<&str>, point: &LinePoint, now: i64) -> StorageResult<()> {
        let time = point.timestamp.unwrap_or(now);
        let mut databases = self.databases.write();
        let rp = policy_mut(&mut databases, database, policy)?;
        rp.register(point)?;

        let existing = rp.shards.values().find(|s| s.range.contains(time)).cloned();
        let shard = match existing {
            Some(shard) => shard,
            None => {
                let id = self.next_shard_id.fetch_add(1, Ordering::Relaxed) + 1;
                let start = time.saturating_sub(time.rem_euclid(rp.shard_duration));
                let end = start.saturating_add(rp.shard_duration - 1);
                let shard = Arc::new(MemoryShard::new(id, TimeRange::new(start, end)));
                rp.shards.insert(id, shard.clone());
                shard
            }
        };
        shard.insert(point, time, self.next_seq());
        Ok(())
    }

    /// Write one point into a specific shard
    pub fn write_to_shard(
        &self,
        database: &str,
        policy: &str,
        shard_id: u64,
        point: &LinePoint,
        now: i64,
    ) -> StorageResult<()> {
        let time = point.timestamp.unwrap_or(now);
        let mut databases = self.databases.write();
        let rp = policy_mut(&mut databases, database, Some(policy))?;
        let shard = rp
            .shards
            .get(&shard_id)
            .cloned()
            .ok_or_else(|| StorageError::ShardRead(format!("shard {} does not exist", shard_id)))?;
        rp.register(point)?;
        shard.insert(point, time, self.next_seq());
        Ok(())
    }

    /// Parse and write a block of line protocol, returning the number of points
    pub fn write_lines(&self, database: &str, policy: Option<&str>, text: &str, now: i64) -> StorageResult<usize> {
        let points = parse_lines(text)?;
        for point in &points {
            self.write(database, policy, point, now)?;
        }
        tracing::debug!(database, points = points.len(), "wrote line protocol");
        Ok(points.len())
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn with_policy<T>(
        &self,
        database: &str,
        policy: &str,
        default: T,
        f: impl FnOnce(&RetentionPolicy) -> T,
    ) -> T {
        let databases = self.databases.read();
        match databases.get(database).and_then(|db| db.policies.get(policy)) {
            Some(rp) => f(rp),
            None => default,
        }
    }
}

fn policy_mut<'a>(
    databases: &'a mut BTreeMap<String, Database>,
    database: &str,
    policy: Option<&str>,
) -> StorageResult<&'a mut RetentionPolicy> {
    let db = databases
        .get_mut(database)
        .ok_or_else(|| StorageError::DatabaseNotFound(database.to_string()))?;
    let name = policy.unwrap_or(&db.default_policy).to_string();
    db.policies
        .get_mut(&name)
        .ok_or(StorageError::RetentionPolicyNotFound(name))
}

impl RetentionPolicy {
    fn new(shard_duration: i64) -> Self {
        Self {
            shard_duration,
            shards: BTreeMap::new(),
            measurements: BTreeMap::new(),
        }
    }

    /// Record schema for a point; the first type written to a field sticks
    fn register(&mut self, point: &LinePoint) -> StorageResult<()> {
        let schema = self
            .measurements
            .entry(point.measurement.clone())
            .or_default();

        for (field, value) in &point.fields {
            if let Some(existing) = schema.fields.get(field) {
                if *existing != value.data_type() {
                    return Err(StorageError::FieldTypeConflict {
                        field: field.clone(),
                        existing: *existing,
                        attempted: value.data_type(),
                    });
                }
            }
        }
        for (field, value) in &point.fields {
            schema.fields.insert(field.clone(), value.data_type());
        }
        schema.series.insert(point.tags.clone());
        Ok(())
    }
}

/// One time partition of a retention policy
#[derive(Debug)]
pub struct MemoryShard {
    id: u64,
    range: TimeRange,
    series: RwLock<HashMap<SeriesKey, Vec<Point>>>,
}

impl MemoryShard {
    fn new(id: u64, range: TimeRange) -> Self {
        Self {
            id,
            range,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Insert every field of a point; a point at an existing timestamp
    /// replaces it
    fn insert(&self, point: &LinePoint, time: i64, seq: u64) {
        let name: Arc<str> = Arc::from(point.measurement.as_str());
        let mut series = self.series.write();
        for (field, value) in &point.fields {
            let key = SeriesKey::new(point.measurement.clone(), point.tags.clone(), field.clone());
            let stored = Point::new(name.clone(), point.tags.clone(), time, value.clone()).with_seq(seq);
            let points = series.entry(key).or_default();
            match points.binary_search_by_key(&time, |p| p.time) {
                Ok(i) => points[i] = stored,
                Err(i) => points.insert(i, stored),
            }
        }
    }
}

impl ShardReader for MemoryShard {
    fn id(&self) -> u64 {
        self.id
    }

    fn time_range(&self) -> TimeRange {
        self.range
    }

    fn open_series_iterator(
        &self,
        key: &SeriesKey,
        range: TimeRange,
        ascending: bool,
    ) -> StorageResult<Option<BoxedIterator>> {
        let series = self.series.read();
        let Some(points) = series.get(key) else {
            return Ok(None);
        };

        let lo = points.partition_point(|p| p.time < range.min);
        let hi = points.partition_point(|p| p.time <= range.max);
        if lo >= hi {
            return Ok(None);
        }

        let mut selected: Vec<Point> = points[lo..hi].to_vec();
        if !ascending {
            selected.reverse();
        }
        let data_type = selected
            .first()
            .map(|p| p.value.data_type())
            .unwrap_or_default();
        Ok(Some(BufferedIterator::new(selected, data_type).boxed()))
    }
}

impl SchemaCatalog for MemoryStore {
    fn database_exists(&self, database: &str) -> bool {
        self.databases.read().contains_key(database)
    }

    fn retention_policy_exists(&self, database: &str, policy: &str) -> bool {
        self.databases
            .read()
            .get(database)
            .is_some_and(|db| db.policies.contains_key(policy))
    }

    fn default_retention_policy(&self, database: &str) -> Option<String> {
        self.databases
            .read()
            .get(database)
            .map(|db| db.default_policy.clone())
    }

    fn measurements(&self, database: &str, policy: &str) -> Vec<String> {
        self.with_policy(database, policy, Vec::new(), |rp| {
            rp.measurements.keys().cloned().collect()
        })
    }

    fn field_types(&self, database: &str, policy: &str, measurement: &str) -> BTreeMap<String, DataType> {
        self.with_policy(database, policy, BTreeMap::new(), |rp| {
            rp.measurements
                .get(measurement)
                .map(|m| m.fields.clone())
                .unwrap_or_default()
        })
    }

    fn series(&self, database: &str, policy: &str, measurement: &str) -> Vec<Tags> {
        self.with_policy(database, policy, Vec::new(), |rp| {
            rp.measurements
                .get(measurement)
                .map(|m| m.series.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn shards(&self, database: &str, policy: &str, range: TimeRange) -> Vec<Arc<dyn ShardReader>> {
        self.with_policy(database, policy, Vec::new(), |rp| {
            rp.shards
                .values()
                .filter(|s| s.range.overlaps(&range))
                .map(|s| s.clone() as Arc<dyn ShardReader>)
                .collect()
        })
    }
}
