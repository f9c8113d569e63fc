//! Statement planning
//!
//! Turns a [`SelectStatement`] into a [`Plan`]: sources are resolved,
//! wildcards expanded and every call validated before any point is read.
//! The input series are then partitioned into output groups (one per
//! measurement and GROUP BY tag combination), guarded against excessive
//! fan-out and paginated with SLIMIT/SOFFSET.
//!
//! Iterator trees are built lazily, one group at a time, by
//! [`Plan::open_group`]. For each call the tree is
//!
//! ```text
//! rows(series) → filter → project ┐
//! rows(series) → filter → project ┼→ merge → reduce → fill → transform
//! rows(series) → filter → project ┘
//! ```
//!
//! and a [`GroupCursor`] zips the calls of a group into result rows.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::{DataType, Tags, TimeRange, MIN_TIME};
use crate::query::ast::{
    column_names, BinaryOp, Call, Expr, Field, FillOption, MeasurementName, SelectStatement, Source,
};
use crate::query::bucket::ReduceIterator;
use crate::query::context::QueryContext;
use crate::query::cursor::GroupCursor;
use crate::query::duration::SECOND;
use crate::query::error::{LimitViolation, QueryError, QueryResult};
use crate::query::eval::{eval_condition, Valuer};
use crate::query::fill::FillIterator;
use crate::query::functions::{
    compile_call, new_reducer, CallOptions, CompileEnv, CompiledCall, Function, TransformIterator,
    TransformState,
};
use crate::query::iterator::{BoxedIterator, BufferedIterator, PointIterator};
use crate::query::merge::SortedMergeIterator;
use crate::query::row::{AuxRef, FilterIterator, ProjectIterator};
use crate::query::scan::ScanScheduler;
use crate::query::source::{MeasurementSource, RowSource, SeriesInfo, SubquerySource};
use crate::query::window::{Interval, Window};
use crate::storage::SchemaCatalog;

/// Builds plans against a catalog
#[derive(Clone)]
pub struct Planner {
    catalog: Arc<dyn SchemaCatalog>,
    database: String,
    scheduler: ScanScheduler,
}

impl Planner {
    /// Planner resolving unqualified measurements in `database`
    pub fn new(catalog: Arc<dyn SchemaCatalog>, database: impl Into<String>) -> Self {
        Self {
            catalog,
            database: database.into(),
            scheduler: ScanScheduler::inline(),
        }
    }

    /// Builder method: schedule leaf scans with `scheduler`
    pub fn with_scheduler(mut self, scheduler: ScanScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Validate a statement and partition its input into groups
    pub fn plan(&self, stmt: &SelectStatement, ctx: &QueryContext) -> QueryResult<Plan> {
        ctx.check()?;
        if stmt.fields.is_empty() {
            return Err(QueryError::invalid("at least 1 non-time field must be queried"));
        }
        let interval = match stmt.dimensions.interval {
            Some(i) if i.duration <= 0 => {
                return Err(QueryError::invalid("GROUP BY time interval must be positive"))
            }
            other => other,
        };

        let sources = self.resolve_sources(stmt, ctx)?;
        let mut field_types: BTreeMap<String, DataType> = BTreeMap::new();
        let mut tag_keys: BTreeSet<String> = BTreeSet::new();
        for source in &sources {
            for (name, t) in source.field_types() {
                let entry = field_types.entry(name.clone()).or_default();
                *entry = entry.widen(*t);
            }
            tag_keys.extend(source.tag_keys());
        }

        let dim_keys: Vec<String> = if stmt.dimensions.wildcard {
            tag_keys.iter().cloned().collect()
        } else {
            stmt.dimensions.tags.clone()
        };
        let schema = Schema {
            field_types,
            tag_keys,
            dim_keys,
        };

        let mut fields = expand_wildcards(&stmt.fields, &schema);
        let env = CompileEnv {
            interval: interval.map(|i| i.duration),
            limit: stmt.limit,
        };
        let calls = compile_calls(&fields, &schema, &env)?;
        let projection = validate(&mut fields, calls, &schema, interval.is_some())?;

        let columns = column_names(&fields);
        let column_types = fields
            .iter()
            .map(|f| infer_type(&f.expr, &projection, &schema))
            .collect();

        let (tag_conditions, row_condition) = split_condition(stmt.condition.as_ref(), &schema);
        let leaf_columns = leaf_columns(&fields, &projection, row_condition.as_ref(), &schema);
        let projection = projection.resolve_aux(&leaf_columns, &schema);

        let range = stmt.time_range;
        if let Some(interval) = interval {
            let window = Window::new(Some(interval), stmt.tz_offset, range);
            let limit = ctx.limits().max_select_buckets;
            if range.has_min() && range.has_max() && limit > 0 {
                let count = window.bucket_count(range.min, range.max);
                if count > limit {
                    warn!(buckets = count, limit, "statement rejected by bucket guard");
                    return Err(QueryError::LimitExceeded(LimitViolation::MaxSelectBuckets {
                        actual: count,
                        limit,
                    }));
                }
            }
        }

        let groups = partition(&sources, &schema.dim_keys, &tag_conditions, stmt, ctx)?;
        debug!(
            groups = groups.len(),
            columns = ?columns,
            leaf_columns = ?leaf_columns,
            "planned statement"
        );

        let mut shape = Shape {
            sources,
            fields: fields.into_iter().map(|f| f.expr).collect(),
            leaf_columns: leaf_columns.into(),
            row_condition,
            projection,
            range,
            interval,
            tz_offset: stmt.tz_offset,
            fill: stmt.fill.clone(),
            fill_start: None,
            ascending: stmt.is_ascending(),
            limit: stmt.limit,
            offset: stmt.offset,
        };
        if shape.fills_from_data() {
            shape.fill_start = shape.earliest_bucket(&groups, ctx)?;
            debug!(start = ?shape.fill_start, "implicit fill start");

            let limit = ctx.limits().max_select_buckets;
            if let Some(start) = shape.fill_start.filter(|_| range.has_max() && limit > 0) {
                let window = Window::new(interval, stmt.tz_offset, range);
                let count = window.bucket_count(start, range.max);
                if count > limit {
                    warn!(buckets = count, limit, "statement rejected by bucket guard");
                    return Err(QueryError::LimitExceeded(LimitViolation::MaxSelectBuckets {
                        actual: count,
                        limit,
                    }));
                }
            }
        }

        Ok(Plan {
            columns,
            column_types,
            groups,
            shape: Arc::new(shape),
        })
    }

    fn resolve_sources(
        &self,
        stmt: &SelectStatement,
        ctx: &QueryContext,
    ) -> QueryResult<Vec<Arc<dyn RowSource>>> {
        let mut sources: Vec<Arc<dyn RowSource>> = Vec::new();
        for source in &stmt.sources {
            match source {
                Source::Measurement(m) => {
                    let database = m.database.as_deref().unwrap_or(&self.database);
                    if !self.catalog.database_exists(database) {
                        return Err(QueryError::database_not_found(database));
                    }
                    let policy = match &m.retention_policy {
                        Some(rp) if self.catalog.retention_policy_exists(database, rp) => rp.clone(),
                        Some(rp) => return Err(QueryError::retention_policy_not_found(rp)),
                        None => self
                            .catalog
                            .default_retention_policy(database)
                            .ok_or_else(|| QueryError::retention_policy_not_found("default"))?,
                    };
                    let names = match &m.name {
                        MeasurementName::Exact(name) => vec![name.clone()],
                        MeasurementName::Regex(re) => self
                            .catalog
                            .measurements(database, &policy)
                            .into_iter()
                            .filter(|name| re.is_match(name))
                            .collect(),
                    };
                    for name in names {
                        sources.push(Arc::new(MeasurementSource::new(
                            self.catalog.clone(),
                            database,
                            &policy,
                            &name,
                            self.scheduler.clone(),
                        )));
                    }
                }
                Source::Subquery(inner) => {
                    sources.push(Arc::new(SubquerySource::new(
                        self.clone(),
                        (**inner).clone(),
                        ctx,
                    )?));
                }
            }
        }
        Ok(sources)
    }
}

/// Fields, tags and grouping keys visible to a statement
struct Schema {
    field_types: BTreeMap<String, DataType>,
    tag_keys: BTreeSet<String>,
    dim_keys: Vec<String>,
}

impl Schema {
    fn is_field(&self, name: &str) -> bool {
        self.field_types.contains_key(name)
    }

    fn is_tag(&self, name: &str) -> bool {
        !self.is_field(name) && self.tag_keys.contains(name)
    }

    fn field_type(&self, name: &str) -> DataType {
        self.field_types.get(name).copied().unwrap_or_default()
    }
}

/// A validated call of the select list
#[derive(Debug, Clone)]
struct PlannedCall {
    call: Call,
    compiled: CompiledCall,
    field_type: DataType,
}

enum Projection {
    /// Raw rows, no calls
    Raw,
    /// Call outputs zipped by time
    Calls {
        calls: Vec<PlannedCall>,
        /// Bare references resolved from the selected point
        aux_names: Vec<String>,
        aux_refs: Vec<AuxRef>,
    },
}

impl Projection {
    fn resolve_aux(self, leaf_columns: &[String], schema: &Schema) -> Self {
        match self {
            Projection::Calls {
                calls, aux_names, ..
            } => {
                let aux_refs = aux_names
                    .iter()
                    .map(|name| match leaf_columns.iter().position(|c| c == name) {
                        Some(i) if schema.is_field(name) => AuxRef::Column(i),
                        _ => AuxRef::Tag(name.clone()),
                    })
                    .collect();
                Projection::Calls {
                    calls,
                    aux_names,
                    aux_refs,
                }
            }
            raw => raw,
        }
    }
}

/// Expand `*` in the select list and in call arguments
fn expand_wildcards(fields: &[Field], schema: &Schema) -> Vec<Field> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        match &field.expr {
            Expr::Wildcard => {
                let names: BTreeSet<&String> = schema
                    .field_types
                    .keys()
                    .chain(schema.tag_keys.iter().filter(|k| !schema.dim_keys.contains(k)))
                    .collect();
                out.extend(names.into_iter().map(|n| Field::new(Expr::var(n.clone()))));
            }
            Expr::Call(call) => match wildcard_function(call) {
                Some(inner) => {
                    let prefix = field.alias.clone().unwrap_or_else(|| call.name.clone());
                    for (name, t) in &schema.field_types {
                        if inner.map_or(true, |f| f.accepts(*t)) {
                            out.push(Field {
                                expr: Expr::Call(substitute_wildcard(call, name)),
                                alias: Some(format!("{}_{}", prefix, name)),
                            });
                        }
                    }
                }
                None => out.push(field.clone()),
            },
            _ => out.push(field.clone()),
        }
    }
    out
}

/// The function applied directly to `*` inside `call`, if any
fn wildcard_function(call: &Call) -> Option<Option<Function>> {
    match call.args.first() {
        Some(Expr::Wildcard) => Some(Function::lookup(&call.name)),
        Some(Expr::Call(inner)) => wildcard_function(inner),
        _ => None,
    }
}

fn substitute_wildcard(call: &Call, field: &str) -> Call {
    let mut call = call.clone();
    if let Some(first) = call.args.first_mut() {
        match first {
            Expr::Wildcard => *first = Expr::var(field),
            Expr::Call(inner) => *inner = substitute_wildcard(inner, field),
            _ => {}
        }
    }
    call
}

fn compile_calls(fields: &[Field], schema: &Schema, env: &CompileEnv) -> QueryResult<Vec<PlannedCall>> {
    let mut calls = Vec::new();
    for field in fields {
        let mut found = Vec::new();
        field.expr.collect_calls(&mut found);
        for call in found {
            let compiled = compile_call(call, env)?;
            let field_type = schema.field_type(compiled.field());
            calls.push(PlannedCall {
                call: call.clone(),
                compiled,
                field_type,
            });
        }
    }
    Ok(calls)
}

/// Check how calls and bare references combine, and pick the projection
fn validate(
    fields: &mut Vec<Field>,
    calls: Vec<PlannedCall>,
    schema: &Schema,
    grouped_by_time: bool,
) -> QueryResult<Projection> {
    if calls.is_empty() {
        if grouped_by_time {
            return Err(QueryError::invalid("GROUP BY requires at least one aggregate function"));
        }
        return Ok(Projection::Raw);
    }

    let has_distinct = calls.iter().any(|c| c.compiled.function == Function::Distinct);
    if has_distinct && (calls.len() > 1 || fields.len() > 1 || !matches!(fields[0].expr, Expr::Call(_))) {
        return Err(QueryError::DistinctCombination);
    }

    if let Some(top) = calls.iter().find(|c| c.compiled.function.is_top_bottom()) {
        if calls.len() > 1 {
            return Err(QueryError::invalid(format!(
                "selector function {}() cannot be combined with other functions",
                top.compiled.function
            )));
        }
    }

    let selector = calls.len() == 1
        && (calls[0].compiled.function.is_point_selector() || calls[0].compiled.function.is_top_bottom());

    let mut aux_names: Vec<String> = Vec::new();
    for field in fields.iter() {
        let mut vars = Vec::new();
        field.expr.collect_vars(&mut vars);
        for var in vars {
            if schema.dim_keys.iter().any(|k| k == var) {
                continue;
            }
            if !selector {
                return Err(QueryError::MixedAggregate);
            }
            if !aux_names.iter().any(|a| a == var) {
                aux_names.push(var.to_string());
            }
        }
    }

    // top(value, host, 2) also reports the host it selected
    if let CallOptions::TopBottom { tags, .. } = &calls[0].compiled.options {
        let position = fields
            .iter()
            .position(|f| f.expr.contains_call())
            .map_or(fields.len(), |i| i + 1);
        let missing: Vec<&String> = tags.iter().filter(|t| !aux_names.contains(*t)).collect();
        for (i, tag) in missing.into_iter().enumerate() {
            fields.insert(position + i, Field::new(Expr::var(tag.clone())));
            aux_names.push(tag.clone());
        }
    }

    for call in &calls {
        call.compiled.check_type(call.field_type)?;
    }

    Ok(Projection::Calls {
        calls,
        aux_names,
        aux_refs: Vec::new(),
    })
}

/// Output type of a select-list expression
fn infer_type(expr: &Expr, projection: &Projection, schema: &Schema) -> DataType {
    match expr {
        Expr::VarRef(name) if schema.is_field(name) => schema.field_type(name),
        Expr::VarRef(name) if schema.tag_keys.contains(name) => DataType::String,
        Expr::VarRef(_) | Expr::Wildcard | Expr::Regex(_) => DataType::Unknown,
        Expr::Call(call) => match projection {
            Projection::Calls { calls, .. } => calls
                .iter()
                .find(|c| &c.call == call)
                .map(|c| c.compiled.output_type(c.field_type))
                .unwrap_or_default(),
            Projection::Raw => DataType::Unknown,
        },
        Expr::Paren(inner) => infer_type(inner, projection, schema),
        Expr::Binary(b) if b.op.is_arithmetic() => {
            let lhs = infer_type(&b.lhs, projection, schema);
            let rhs = infer_type(&b.rhs, projection, schema);
            match (b.op, lhs, rhs) {
                (BinaryOp::Div, _, _) => DataType::Float,
                (_, DataType::Integer, DataType::Integer) => DataType::Integer,
                _ => DataType::Float,
            }
        }
        Expr::Binary(_) => DataType::Boolean,
        literal => literal.literal().map(|v| v.data_type()).unwrap_or_default(),
    }
}

/// Split a condition into tag-only conjuncts and the remainder
///
/// Tag-only conjuncts prune whole series at plan time; the rest is
/// evaluated per row.
fn split_condition(condition: Option<&Expr>, schema: &Schema) -> (Vec<Expr>, Option<Expr>) {
    let Some(condition) = condition else {
        return (Vec::new(), None);
    };
    let mut conjuncts = Vec::new();
    flatten_and(condition, &mut conjuncts);

    let mut tags = Vec::new();
    let mut rest: Option<Expr> = None;
    for expr in conjuncts {
        let mut vars = Vec::new();
        expr.collect_vars(&mut vars);
        if !vars.is_empty() && vars.iter().all(|v| schema.is_tag(v)) {
            tags.push(expr.clone());
        } else {
            rest = Some(match rest {
                Some(lhs) => Expr::binary(BinaryOp::And, lhs, expr.clone()),
                None => expr.clone(),
            });
        }
    }
    (tags, rest)
}

fn flatten_and<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary(b) if b.op == BinaryOp::And => {
            flatten_and(&b.lhs, out);
            flatten_and(&b.rhs, out);
        }
        Expr::Paren(inner) => flatten_and(inner, out),
        other => out.push(other),
    }
}

/// Columns every leaf row must carry
fn leaf_columns(
    fields: &[Field],
    projection: &Projection,
    condition: Option<&Expr>,
    schema: &Schema,
) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !columns.iter().any(|c| c == name) {
            columns.push(name.to_string());
        }
    };

    match projection {
        Projection::Calls {
            calls, aux_names, ..
        } => {
            for call in calls {
                push(call.compiled.field());
            }
            for name in aux_names.iter().filter(|n| schema.is_field(n)) {
                push(name);
            }
        }
        Projection::Raw => {
            for field in fields {
                let mut vars = Vec::new();
                field.expr.collect_vars(&mut vars);
                for var in vars.into_iter().filter(|v| schema.is_field(v)) {
                    push(var);
                }
            }
        }
    }

    if let Some(condition) = condition {
        let mut vars = Vec::new();
        condition.collect_vars(&mut vars);
        for var in vars.into_iter().filter(|v| schema.is_field(v)) {
            push(var);
        }
    }
    columns
}

/// Answers tag lookups for one series; missing tags are empty strings
struct TagValuer<'a>(&'a Tags);

impl Valuer for TagValuer<'_> {
    fn value(&self, name: &str) -> Option<crate::model::Value> {
        Some(self.0.get(name).unwrap_or_default().into())
    }
}

/// Group the input series by measurement and GROUP BY tags
fn partition(
    sources: &[Arc<dyn RowSource>],
    dim_keys: &[String],
    tag_conditions: &[Expr],
    stmt: &SelectStatement,
    ctx: &QueryContext,
) -> QueryResult<Vec<GroupPlan>> {
    let mut grouped: BTreeMap<(Arc<str>, Tags), Vec<Member>> = BTreeMap::new();
    let mut total = 0usize;
    for (index, source) in sources.iter().enumerate() {
        for series in source.series() {
            let valuer = TagValuer(&series.tags);
            if !tag_conditions.iter().all(|c| eval_condition(c, &valuer)) {
                continue;
            }
            total += 1;
            grouped
                .entry((series.name.clone(), series.tags.subset(dim_keys)))
                .or_default()
                .push(Member {
                    source: index,
                    series: series.clone(),
                });
        }
    }

    let limit = ctx.limits().max_select_series;
    if limit > 0 && total > limit {
        warn!(series = total, limit, "statement rejected by series guard");
        return Err(QueryError::LimitExceeded(LimitViolation::MaxSelectSeries {
            actual: total,
            limit,
        }));
    }

    let take = if stmt.slimit > 0 { stmt.slimit } else { usize::MAX };
    Ok(grouped
        .into_iter()
        .skip(stmt.soffset)
        .take(take)
        .map(|((name, tags), members)| GroupPlan {
            name,
            tags,
            members,
        })
        .collect())
}

#[derive(Debug, Clone)]
struct Member {
    source: usize,
    series: SeriesInfo,
}

/// One output series: a measurement and a GROUP BY tag combination
#[derive(Debug, Clone)]
pub struct GroupPlan {
    pub name: Arc<str>,
    pub tags: Tags,
    members: Vec<Member>,
}

impl GroupPlan {
    /// Number of input series feeding this group
    pub fn series_count(&self) -> usize {
        self.members.len()
    }
}

/// Statement-wide settings shared by every group's iterator tree
struct Shape {
    sources: Vec<Arc<dyn RowSource>>,
    fields: Arc<[Expr]>,
    leaf_columns: Arc<[String]>,
    row_condition: Option<Expr>,
    projection: Projection,
    range: TimeRange,
    interval: Option<Interval>,
    tz_offset: Option<i32>,
    fill: FillOption,
    /// First bucket of every fill walk when the range has no lower bound
    fill_start: Option<i64>,
    ascending: bool,
    limit: usize,
    offset: usize,
}

impl Shape {
    /// Filtered leaf rows of one series
    fn open_member(
        &self,
        member: &Member,
        range: TimeRange,
        ascending: bool,
        ctx: &QueryContext,
    ) -> QueryResult<BoxedIterator> {
        let source = &self.sources[member.source];
        let mut iter = source.open(&member.series, &self.leaf_columns, range, ascending, ctx)?;
        if let Some(condition) = &self.row_condition {
            iter = Box::new(FilterIterator::new(
                iter,
                condition.clone(),
                self.leaf_columns.clone(),
            ));
        }
        Ok(iter)
    }

    /// Filtered leaf rows of every series in a group
    fn open_rows(&self, group: &GroupPlan, range: TimeRange, ctx: &QueryContext) -> QueryResult<Vec<BoxedIterator>> {
        group
            .members
            .iter()
            .map(|member| self.open_member(member, range, self.ascending, ctx))
            .collect()
    }

    /// Some call fills empty buckets and nothing bounds the range below
    fn fills_from_data(&self) -> bool {
        if self.interval.is_none() || self.fill == FillOption::None || self.range.has_min() {
            return false;
        }
        match &self.projection {
            Projection::Raw => false,
            Projection::Calls { calls, .. } => calls
                .iter()
                .any(|c| !c.compiled.reducing_call().function.is_top_bottom()),
        }
    }

    /// Bucket holding the earliest matching point across all groups
    fn earliest_bucket(&self, groups: &[GroupPlan], ctx: &QueryContext) -> QueryResult<Option<i64>> {
        let mut earliest: Option<i64> = None;
        for member in groups.iter().flat_map(|g| g.members.iter()) {
            let mut rows = self.open_member(member, self.range, true, ctx)?;
            if let Some(point) = rows.next_point(ctx)? {
                earliest = Some(earliest.map_or(point.time, |t| t.min(point.time)));
            }
            rows.close();
        }
        let window = Window::new(self.interval, self.tz_offset, self.range);
        Ok(earliest.map(|t| window.bucket_start(t)))
    }

    fn merge(&self, mut inputs: Vec<BoxedIterator>, data_type: DataType) -> BoxedIterator {
        match inputs.len() {
            0 => BufferedIterator::empty(data_type).boxed(),
            1 => inputs.remove(0),
            _ => Box::new(SortedMergeIterator::new(inputs, self.ascending)),
        }
    }

    /// Buckets of look-back a transform needs before the query range
    fn extension(&self, call: &CompiledCall) -> i64 {
        let Some(interval) = self.interval else {
            return 0;
        };
        let periods = match (call.function, &call.options) {
            (Function::MovingAverage, CallOptions::Window(n)) => n.saturating_sub(1) as i64,
            (
                Function::Derivative
                | Function::NonNegativeDerivative
                | Function::Difference
                | Function::NonNegativeDifference,
                _,
            ) => 1,
            _ => 0,
        };
        interval.duration.saturating_mul(periods)
    }

    fn scan_range(&self, extension: i64) -> TimeRange {
        let mut range = self.range;
        if extension > 0 {
            if self.ascending && range.has_min() {
                range.min = range.min.saturating_sub(extension);
            } else if !self.ascending && range.has_max() {
                range.max = range.max.saturating_add(extension);
            }
        }
        range
    }

    /// Output range of a transform over extended buckets
    fn clip_range(&self) -> TimeRange {
        let window = Window::new(self.interval, self.tz_offset, self.range);
        let min = if self.range.has_min() {
            window.bucket_start(self.range.min)
        } else {
            MIN_TIME
        };
        TimeRange::new(min, self.range.max)
    }

    fn build_call(
        &self,
        group: &GroupPlan,
        planned: &PlannedCall,
        aux: &[AuxRef],
        lone: bool,
        ctx: &QueryContext,
    ) -> QueryResult<BoxedIterator> {
        let compiled = &planned.compiled;
        let function = compiled.function;
        let grouped = self.interval.is_some();
        let output_type = compiled.output_type(planned.field_type);

        let Some(column) = self.leaf_columns.iter().position(|c| c == compiled.field()) else {
            return Ok(BufferedIterator::empty(output_type).boxed());
        };

        let extension = self.extension(compiled);
        let scan_range = self.scan_range(extension);
        let window = Window::new(self.interval, self.tz_offset, scan_range);
        if extension > 0 {
            debug!(call = %planned.call, range = ?scan_range, "extended scan for transform");
        }

        let leaves = self
            .open_rows(group, scan_range, ctx)?
            .into_iter()
            .map(|rows| {
                Box::new(ProjectIterator::new(rows, column, aux.to_vec(), planned.field_type))
                    as BoxedIterator
            })
            .collect();
        let input = self.merge(leaves, planned.field_type);

        if function.is_transform() && !grouped {
            let state = TransformState::new(compiled, SECOND)?;
            return Ok(Box::new(TransformIterator::new(input, state, output_type, self.ascending)));
        }

        let reducing = compiled.reducing_call();
        let reduced_type = reducing.output_type(planned.field_type);
        let keep_time = reducing.function.is_top_bottom()
            || (lone && !grouped && reducing.function.is_point_selector());

        let mut iter: BoxedIterator = Box::new(ReduceIterator::new(
            input,
            new_reducer(reducing),
            window,
            keep_time,
            self.ascending,
            group.name.clone(),
            group.tags.clone(),
            reduced_type,
        ));

        if grouped && !reducing.function.is_top_bottom() && self.fill != FillOption::None {
            iter = Box::new(FillIterator::new(
                iter,
                window,
                self.fill.clone(),
                reducing.function.zero_value(),
                reduced_type,
                self.ascending,
                group.name.clone(),
                group.tags.clone(),
            )
            .with_implicit_start(self.fill_start));
        }

        if function.is_transform() {
            let state = TransformState::new(compiled, window.every())?;
            iter = Box::new(
                TransformIterator::new(iter, state, output_type, self.ascending)
                    .with_clip(self.clip_range()),
            );
        }
        Ok(iter)
    }
}

/// A validated statement ready to execute group by group
pub struct Plan {
    columns: Vec<String>,
    column_types: Vec<DataType>,
    groups: Vec<GroupPlan>,
    shape: Arc<Shape>,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("columns", &self.columns)
            .field("column_types", &self.column_types)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

impl Plan {
    /// Output columns, `time` first
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Types of the non-time columns
    pub fn column_types(&self) -> &[DataType] {
        &self.column_types
    }

    /// Output groups, sorted by measurement and tags, after SLIMIT/SOFFSET
    pub fn groups(&self) -> &[GroupPlan] {
        &self.groups
    }

    pub fn find_group(&self, name: &str, tags: &Tags) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.name.as_ref() == name && &g.tags == tags)
    }

    /// Build the iterator tree of one group
    pub fn open_group(&self, index: usize, ctx: &QueryContext) -> QueryResult<GroupCursor> {
        let shape = &self.shape;
        let group = self
            .groups
            .get(index)
            .ok_or_else(|| QueryError::Internal(format!("no group {}", index)))?;

        match &shape.projection {
            Projection::Raw => {
                let rows = shape.open_rows(group, shape.range, ctx)?;
                let input = shape.merge(rows, DataType::Unknown);
                Ok(GroupCursor::raw(
                    group.name.clone(),
                    group.tags.clone(),
                    input,
                    shape.leaf_columns.clone(),
                    shape.fields.clone(),
                    (shape.limit, shape.offset),
                ))
            }
            Projection::Calls {
                calls,
                aux_names,
                aux_refs,
            } => {
                let lone = calls.len() == 1;
                let inputs = calls
                    .iter()
                    .enumerate()
                    .map(|(i, call)| {
                        let aux: &[AuxRef] = if i == 0 { aux_refs } else { &[] };
                        shape.build_call(group, call, aux, lone, ctx)
                    })
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(GroupCursor::calls(
                    group.name.clone(),
                    group.tags.clone(),
                    inputs,
                    calls.iter().map(|c| c.call.clone()).collect(),
                    aux_names.clone().into(),
                    shape.fields.clone(),
                    shape.ascending,
                    (shape.limit, shape.offset),
                ))
            }
        }
    }
}
