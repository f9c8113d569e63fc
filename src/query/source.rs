//! Statement inputs
//!
//! A statement reads from [`RowSource`]s. A stored measurement opens one
//! shard iterator per (series, field, shard), merges the shards of each
//! field and aligns the fields into rows. A subquery re-plans its inner
//! statement for the requested range and order and exposes the inner result
//! rows as rows of the same shape, so both kinds compose identically.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::model::{DataType, Point, SeriesKey, Tags, TimeRange, Value};
use crate::query::ast::{SelectStatement, SortOrder};
use crate::query::context::QueryContext;
use crate::query::cursor::GroupCursor;
use crate::query::error::QueryResult;
use crate::query::iterator::{BoxedIterator, BufferedIterator, PointIterator};
use crate::query::merge::{FieldAlignIterator, SortedMergeIterator};
use crate::query::planner::Planner;
use crate::query::scan::ScanScheduler;
use crate::storage::SchemaCatalog;

/// One input series: measurement (or inner series) name and full tag set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesInfo {
    pub name: Arc<str>,
    pub tags: Tags,
}

/// Something a statement can read rows from
pub trait RowSource: Send + Sync {
    /// Every series of this source, sorted
    fn series(&self) -> &[SeriesInfo];

    /// Column names and types
    fn field_types(&self) -> &BTreeMap<String, DataType>;

    /// Tag keys present on any series
    fn tag_keys(&self) -> BTreeSet<String> {
        self.series()
            .iter()
            .flat_map(|s| s.tags.keys().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    /// Open the rows of one series
    ///
    /// Each point carries one auxiliary value per requested column (null
    /// when the column has no value at that time) and a null point value.
    fn open(
        &self,
        series: &SeriesInfo,
        columns: &[String],
        range: TimeRange,
        ascending: bool,
        ctx: &QueryContext,
    ) -> QueryResult<BoxedIterator>;
}

/// A stored measurement
pub struct MeasurementSource {
    catalog: Arc<dyn SchemaCatalog>,
    database: String,
    policy: String,
    name: Arc<str>,
    series: Vec<SeriesInfo>,
    fields: BTreeMap<String, DataType>,
    scheduler: ScanScheduler,
}

impl MeasurementSource {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        database: &str,
        policy: &str,
        measurement: &str,
        scheduler: ScanScheduler,
    ) -> Self {
        let name: Arc<str> = Arc::from(measurement);
        let series = catalog
            .series(database, policy, measurement)
            .into_iter()
            .map(|tags| SeriesInfo {
                name: name.clone(),
                tags,
            })
            .collect();
        let fields = catalog.field_types(database, policy, measurement);
        Self {
            catalog,
            database: database.to_string(),
            policy: policy.to_string(),
            name,
            series,
            fields,
            scheduler,
        }
    }

    /// Shard streams of one field merged into a single stream
    fn open_field(
        &self,
        tags: &Tags,
        field: &str,
        range: TimeRange,
        ascending: bool,
        ctx: &QueryContext,
    ) -> QueryResult<BoxedIterator> {
        let data_type = self.fields.get(field).copied().unwrap_or_default();
        if !self.fields.contains_key(field) {
            return Ok(BufferedIterator::empty(data_type).boxed());
        }

        let key = SeriesKey::new(self.name.as_ref(), tags.clone(), field);
        let mut inputs = Vec::new();
        for shard in self.catalog.shards(&self.database, &self.policy, range) {
            if let Some(iter) = shard.open_series_iterator(&key, range, ascending)? {
                inputs.push(self.scheduler.schedule(iter, ctx));
            }
        }

        Ok(match inputs.len() {
            0 => BufferedIterator::empty(data_type).boxed(),
            1 => inputs.remove(0),
            _ => Box::new(SortedMergeIterator::new(inputs, ascending).dedupe()),
        })
    }
}

impl RowSource for MeasurementSource {
    fn series(&self) -> &[SeriesInfo] {
        &self.series
    }

    fn field_types(&self) -> &BTreeMap<String, DataType> {
        &self.fields
    }

    fn open(
        &self,
        series: &SeriesInfo,
        columns: &[String],
        range: TimeRange,
        ascending: bool,
        ctx: &QueryContext,
    ) -> QueryResult<BoxedIterator> {
        let inputs = columns
            .iter()
            .map(|c| self.open_field(&series.tags, c, range, ascending, ctx))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(Box::new(FieldAlignIterator::new(
            inputs,
            series.name.clone(),
            series.tags.clone(),
            ascending,
        )))
    }
}

/// An inner statement used as a source
pub struct SubquerySource {
    planner: Planner,
    statement: SelectStatement,
    series: Vec<SeriesInfo>,
    fields: BTreeMap<String, DataType>,
}

impl SubquerySource {
    /// Plan the inner statement once to learn its series and columns
    pub fn new(planner: Planner, statement: SelectStatement, ctx: &QueryContext) -> QueryResult<Self> {
        let plan = planner.plan(&statement, ctx)?;
        let series = plan
            .groups()
            .iter()
            .map(|g| SeriesInfo {
                name: g.name.clone(),
                tags: g.tags.clone(),
            })
            .collect();
        let fields = plan
            .columns()
            .iter()
            .skip(1)
            .cloned()
            .zip(plan.column_types().iter().copied())
            .collect();
        Ok(Self {
            planner,
            statement,
            series,
            fields,
        })
    }
}

impl RowSource for SubquerySource {
    fn series(&self) -> &[SeriesInfo] {
        &self.series
    }

    fn field_types(&self) -> &BTreeMap<String, DataType> {
        &self.fields
    }

    fn open(
        &self,
        series: &SeriesInfo,
        columns: &[String],
        range: TimeRange,
        ascending: bool,
        ctx: &QueryContext,
    ) -> QueryResult<BoxedIterator> {
        let mut inner = self.statement.clone();
        inner.time_range = inner.time_range.intersect(&range);
        inner.order = if ascending {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        };

        let plan = self.planner.plan(&inner, ctx)?;
        let Some(index) = plan.find_group(&series.name, &series.tags) else {
            return Ok(BufferedIterator::empty(DataType::Unknown).boxed());
        };
        debug!(series = %series.name, tags = %series.tags, "opening subquery series");

        let mapping = columns
            .iter()
            .map(|c| plan.columns().iter().skip(1).position(|inner| inner == c))
            .collect();
        let cursor = plan.open_group(index, ctx)?;
        Ok(Box::new(SubqueryRows {
            cursor,
            mapping,
            name: series.name.clone(),
            tags: series.tags.clone(),
            seq: 0,
        }))
    }
}

/// Inner result rows exposed as aligned rows
struct SubqueryRows {
    cursor: GroupCursor,
    /// Inner column index for each requested column
    mapping: Vec<Option<usize>>,
    name: Arc<str>,
    tags: Tags,
    seq: u64,
}

impl PointIterator for SubqueryRows {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        while let Some((time, values)) = self.cursor.next_row(ctx)? {
            let aux: Vec<Value> = self
                .mapping
                .iter()
                .map(|m| m.and_then(|i| values.get(i).cloned()).unwrap_or_default())
                .collect();
            if aux.iter().all(Value::is_null) {
                continue;
            }
            self.seq += 1;
            return Ok(Some(Point {
                name: self.name.clone(),
                tags: self.tags.clone(),
                time,
                value: Value::Null,
                aux,
                seq: self.seq,
            }));
        }
        Ok(None)
    }

    fn data_type(&self) -> DataType {
        DataType::Unknown
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Expr;
    use crate::query::iterator::drain;
    use crate::storage::line_protocol::LinePoint;
    use crate::storage::MemoryStore;

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_database("db");
        store
            .write_lines(
                "db",
                None,
                "cpu,host=a usage=1,load=10i 0\n\
                 cpu,host=a usage=2 10\n\
                 cpu,host=a load=30i 20\n\
                 cpu,host=b usage=5 0",
                0,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_measurement_rows_align_fields() {
        let store = store();
        let source = MeasurementSource::new(store, "db", "autogen", "cpu", ScanScheduler::inline());
        assert_eq!(source.series().len(), 2);
        assert_eq!(source.field_types().get("load"), Some(&DataType::Integer));

        let series = source.series()[0].clone();
        let columns = vec!["usage".to_string(), "load".to_string(), "missing".to_string()];
        let ctx = QueryContext::default();
        let mut rows = source
            .open(&series, &columns, TimeRange::unbounded(), true, &ctx)
            .unwrap();
        let rows: Vec<(i64, Vec<Value>)> = drain(&mut rows, &ctx)
            .unwrap()
            .into_iter()
            .map(|p| (p.time, p.aux))
            .collect();
        assert_eq!(
            rows,
            vec![
                (0, vec![Value::Float(1.0), Value::Integer(10), Value::Null]),
                (10, vec![Value::Float(2.0), Value::Null, Value::Null]),
                (20, vec![Value::Null, Value::Integer(30), Value::Null]),
            ]
        );
    }

    #[test]
    fn test_overlapping_shards_keep_latest_write() {
        let store = Arc::new(MemoryStore::new());
        store.create_database("db");
        let first = store.create_shard("db", "autogen", TimeRange::new(0, 100)).unwrap();
        let second = store.create_shard("db", "autogen", TimeRange::new(0, 100)).unwrap();
        let point = |v: f64| LinePoint::new("cpu", Tags::new(), "value", Value::Float(v), 10);
        store.write_to_shard("db", "autogen", second, &point(1.0), 0).unwrap();
        store.write_to_shard("db", "autogen", first, &point(2.0), 0).unwrap();

        let source = MeasurementSource::new(store, "db", "autogen", "cpu", ScanScheduler::inline());
        let series = source.series()[0].clone();
        let ctx = QueryContext::default();
        let mut rows = source
            .open(&series, &["value".to_string()], TimeRange::unbounded(), true, &ctx)
            .unwrap();
        let rows = drain(&mut rows, &ctx).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].aux, vec![Value::Float(2.0)]);
    }

    #[test]
    fn test_subquery_rows() {
        let store = store();
        let planner = Planner::new(store, "db");
        let inner = SelectStatement::builder()
            .field(Expr::call("max", vec![Expr::var("usage")]))
            .from("cpu")
            .group_by("host")
            .build();
        let ctx = QueryContext::default();
        let source = SubquerySource::new(planner, inner, &ctx).unwrap();
        assert_eq!(source.series().len(), 2);
        assert!(source.field_types().contains_key("max"));

        let series = source.series()[1].clone();
        assert_eq!(series.tags.get("host"), Some("b"));
        let mut rows = source
            .open(&series, &["max".to_string()], TimeRange::unbounded(), true, &ctx)
            .unwrap();
        let rows = drain(&mut rows, &ctx).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].aux, vec![Value::Float(5.0)]);
        assert_eq!(rows[0].time, 0);
    }
}
