//! top() and bottom()
//!
//! Candidates are ranked by value (descending for top, ascending for
//! bottom), ties broken by ascending time and then by input order. With
//! grouping tags only the best point of each distinct tag combination is a
//! candidate. The N selected points are emitted in time order.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::Point;
use crate::query::functions::reduce::{Reduced, Reducer};

#[derive(Debug)]
pub struct TopReducer {
    n: usize,
    tags: Vec<String>,
    descending: bool,
    points: Vec<Point>,
}

impl TopReducer {
    pub fn top(n: usize, tags: Vec<String>) -> Self {
        Self {
            n,
            tags,
            descending: true,
            points: Vec::new(),
        }
    }

    pub fn bottom(n: usize, tags: Vec<String>) -> Self {
        Self {
            n,
            tags,
            descending: false,
            points: Vec::new(),
        }
    }

    /// Ranking order: better candidates sort first
    fn rank(&self, a: &Point, b: &Point) -> Ordering {
        let by_value = a.value.total_cmp(&b.value);
        let by_value = if self.descending {
            by_value.reverse()
        } else {
            by_value
        };
        by_value.then(a.time.cmp(&b.time))
    }

    /// Keep only the best point per tag combination, in first-seen order
    fn best_per_tag_set(&self, points: Vec<Point>) -> Vec<Point> {
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        let mut best: Vec<Point> = Vec::new();
        for point in points {
            let key: Vec<String> = self
                .tags
                .iter()
                .map(|k| point.tags.get(k).unwrap_or_default().to_string())
                .collect();
            match index.get(&key) {
                Some(&i) => {
                    if self.rank(&point, &best[i]) == Ordering::Less {
                        best[i] = point;
                    }
                }
                None => {
                    index.insert(key, best.len());
                    best.push(point);
                }
            }
        }
        best
    }

    /// Select the ranked candidates in selection order
    pub fn select(&self, points: Vec<Point>) -> Vec<Point> {
        let mut candidates = if self.tags.is_empty() {
            points
        } else {
            self.best_per_tag_set(points)
        };
        candidates.sort_by(|a, b| self.rank(a, b));
        candidates.truncate(self.n);
        candidates
    }
}

impl Reducer for TopReducer {
    fn aggregate(&mut self, point: &Point) {
        if point.value.as_f64().is_some() {
            self.points.push(point.clone());
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let points = std::mem::take(&mut self.points);
        let mut selected = self.select(points);
        selected.sort_by_key(|p| p.time);
        selected
            .into_iter()
            .map(|p| Reduced {
                time: Some(p.time),
                value: p.value,
                aux: p.aux,
            })
            .collect()
    }
}
