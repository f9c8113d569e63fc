//! Statement results
//!
//! Shapes returned to callers: one [`Series`] per output group, chunked
//! when a chunk size is configured, collected into a [`StatementResult`]
//! per statement. Results serialize to the usual
//! `{"results": [{"statement_id": 0, "series": [...]}]}` JSON layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Tags, Value};
use crate::query::error::QueryError;

/// Rows of one output group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Column names, `time` first
    pub columns: Vec<String>,
    /// Rows; the first value of each row is the timestamp
    pub values: Vec<Vec<Value>>,
    /// More rows of this series follow in the next chunk
    #[serde(default, skip_serializing_if = "is_false")]
    pub partial: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Series {
    pub fn new(name: impl Into<String>, tags: &Tags, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tags: tags.to_map(),
            columns,
            values: Vec::new(),
            partial: false,
        }
    }

    /// Split into chunks of at most `size` rows (0 keeps one chunk)
    ///
    /// Every chunk but the last is marked partial.
    pub fn chunked(self, size: usize) -> Vec<Series> {
        if size == 0 || self.values.len() <= size {
            return vec![self];
        }
        let Series {
            name,
            tags,
            columns,
            values,
            ..
        } = self;
        let total = values.len().div_ceil(size);
        let mut chunks = Vec::with_capacity(total);
        let mut rows = values.into_iter().peekable();
        while rows.peek().is_some() {
            let values: Vec<Vec<Value>> = rows.by_ref().take(size).collect();
            chunks.push(Series {
                name: name.clone(),
                tags: tags.clone(),
                columns: columns.clone(),
                values,
                partial: true,
            });
        }
        if let Some(last) = chunks.last_mut() {
            last.partial = false;
        }
        chunks
    }

    /// Timestamp of row `i`
    pub fn time(&self, i: usize) -> Option<i64> {
        match self.values.get(i)?.first()? {
            Value::Integer(t) => Some(*t),
            _ => None,
        }
    }

    /// Values of one column, by name
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.values.iter().filter_map(|row| row.get(index)).collect())
    }
}

/// Outcome of one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementResult {
    pub statement_id: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatementResult {
    pub fn ok(statement_id: usize, series: Vec<Series>) -> Self {
        Self {
            statement_id,
            series,
            error: None,
        }
    }

    pub fn failed(statement_id: usize, error: &QueryError) -> Self {
        Self {
            statement_id,
            series: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Total rows across all series
    pub fn row_count(&self) -> usize {
        self.series.iter().map(|s| s.values.len()).sum()
    }
}

/// Results of a batch of statements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub results: Vec<StatementResult>,
}

/// Render results as CSV: `name,tags,<columns...>`, one header per
/// column layout
pub fn to_csv(results: &[StatementResult]) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    let mut header: Option<&[String]> = None;
    for series in results.iter().flat_map(|r| r.series.iter()) {
        if header != Some(series.columns.as_slice()) {
            let mut record = vec!["name", "tags"];
            record.extend(series.columns.iter().map(String::as_str));
            writer.write_record(&record)?;
            header = Some(series.columns.as_slice());
        }

        let tags = series
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        for row in &series.values {
            let mut record = vec![series.name.clone(), tags.clone()];
            record.extend(row.iter().map(|v| match v {
                Value::Null => String::new(),
                other => other.to_string(),
            }));
            writer.write_record(&record)?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(rows: usize) -> Series {
        let mut s = Series::new(
            "cpu",
            &Tags::from_pairs([("host", "a")]),
            vec!["time".into(), "mean".into()],
        );
        for i in 0..rows {
            s.values.push(vec![Value::Integer(i as i64), Value::Float(i as f64)]);
        }
        s
    }

    #[test]
    fn test_chunking() {
        let chunks = series(5).chunked(2);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].partial && chunks[1].partial);
        assert!(!chunks[2].partial);
        assert_eq!(chunks[2].values.len(), 1);

        let chunks = series(4).chunked(2);
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[1].partial);

        assert_eq!(series(3).chunked(0).len(), 1);
    }

    #[test]
    fn test_json_layout() {
        let response = Response {
            results: vec![
                StatementResult::ok(0, vec![series(1)]),
                StatementResult::failed(1, &QueryError::MixedAggregate),
            ],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "results": [
                    {
                        "statement_id": 0,
                        "series": [{
                            "name": "cpu",
                            "tags": {"host": "a"},
                            "columns": ["time", "mean"],
                            "values": [[0, 0.0]]
                        }]
                    },
                    {
                        "statement_id": 1,
                        "error": "mixing aggregate and non-aggregate queries is not supported"
                    }
                ]
            })
        );
    }

    #[test]
    fn test_csv() {
        let mut s = series(2);
        s.values[1][1] = Value::Null;
        let csv = to_csv(&[StatementResult::ok(0, vec![s])]).unwrap();
        assert_eq!(csv, "name,tags,time,mean\ncpu,host=a,0,0\ncpu,host=a,1,\n");
    }

    #[test]
    fn test_column_lookup() {
        let s = series(2);
        assert_eq!(s.time(1), Some(1));
        assert_eq!(s.column("mean"), Some(vec![&Value::Float(0.0), &Value::Float(1.0)]));
        assert!(s.column("max").is_none());
    }
}
