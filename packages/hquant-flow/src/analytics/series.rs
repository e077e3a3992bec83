use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Tick;

/// Timestamp-indexed scalar series.
///
/// Timestamps are kept in the order given; rolling routines operate on that
/// order. Undefined points are `f64::NAN`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn new(timestamps: Vec<i64>, values: Vec<f64>) -> Self {
        assert_eq!(timestamps.len(), values.len(), "timestamps/values length mismatch");
        Self { timestamps, values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs<I: IntoIterator<Item = (i64, f64)>>(pairs: I) -> Self {
        let (timestamps, values) = pairs.into_iter().unzip();
        Self { timestamps, values }
    }

    /// Price series of a tick slice, in slice order.
    pub fn from_ticks(ticks: &[Tick]) -> Self {
        Self::from_pairs(ticks.iter().map(|t| (t.timestamp, t.price)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter().copied())
    }

    /// Drops non-finite points.
    pub fn dropna(&self) -> Self {
        Self::from_pairs(self.iter().filter(|(_, v)| v.is_finite()))
    }
}

/// Two series inner-joined on timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aligned {
    pub timestamps: Vec<i64>,
    pub left: Vec<f64>,
    pub right: Vec<f64>,
}

impl Aligned {
    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

fn index(series: &Series) -> BTreeMap<i64, f64> {
    // A repeated timestamp keeps its last value.
    series.iter().collect()
}

/// Inner join on timestamp, ascending, dropping rows with a non-finite value.
pub fn align(left: &Series, right: &Series) -> Aligned {
    let rhs = index(right);
    let mut out = Aligned::default();
    for (ts, l) in index(left) {
        let Some(&r) = rhs.get(&ts) else { continue };
        if !l.is_finite() || !r.is_finite() {
            continue;
        }
        out.timestamps.push(ts);
        out.left.push(l);
        out.right.push(r);
    }
    out
}

/// N-way inner join on timestamp. Returns the common timestamps and one value
/// column per input, in input order.
pub fn align_many(series: &[&Series]) -> (Vec<i64>, Vec<Vec<f64>>) {
    let Some((first, rest)) = series.split_first() else {
        return (Vec::new(), Vec::new());
    };
    let others: Vec<BTreeMap<i64, f64>> = rest.iter().map(|s| index(s)).collect();
    let mut timestamps = Vec::new();
    let mut columns = vec![Vec::new(); series.len()];
    'rows: for (ts, v0) in index(first) {
        if !v0.is_finite() {
            continue;
        }
        let mut row = Vec::with_capacity(others.len());
        for other in &others {
            match other.get(&ts) {
                Some(&v) if v.is_finite() => row.push(v),
                _ => continue 'rows,
            }
        }
        timestamps.push(ts);
        columns[0].push(v0);
        for (col, v) in columns[1..].iter_mut().zip(row) {
            col.push(v);
        }
    }
    (timestamps, columns)
}
