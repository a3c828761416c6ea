//! Aggregate functions folded by the windowed engines.
//!
//! Aggregates are a closed set of tagged variants rather than closures so
//! their fold semantics can be checked in isolation.
//!
//! | Variant | Hopping window | Sliding buffer |
//! |---------|----------------|----------------|
//! | `sum`   | sum of values  | sum of buffer  |
//! | `count` | member events  | n/a            |
//! | `avg`   | mean of values | `sum / capacity` |
//! | `min` / `max` | extreme value | extreme of buffer |
//! | `first` / `last` | arrival order | n/a |
//! | `cumulative` | n/a | total of every value the key has seen |

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregate applied to each hopping window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    #[default]
    Sum,
    Count,
    Avg,
    Min,
    Max,
    First,
    Last,
}

impl AggregateFn {
    pub const ALL: [AggregateFn; 7] = [
        AggregateFn::Sum,
        AggregateFn::Count,
        AggregateFn::Avg,
        AggregateFn::Min,
        AggregateFn::Max,
        AggregateFn::First,
        AggregateFn::Last,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "sum",
            AggregateFn::Count => "count",
            AggregateFn::Avg => "avg",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
            AggregateFn::First => "first",
            AggregateFn::Last => "last",
        }
    }

    /// Whether the result depends on the order values were folded in.
    pub fn is_order_sensitive(&self) -> bool {
        matches!(self, AggregateFn::First | AggregateFn::Last)
    }
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregateFn {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownAggregate(s.to_string()))
    }
}

/// Running state for a hopping-window aggregate.
///
/// Tracks enough to answer every [`AggregateFn`], so the accumulator is the
/// same shape regardless of the configured function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    /// Number of values folded (events carrying the field)
    pub values: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub first: Option<f64>,
    pub last: Option<f64>,
}

impl Accumulator {
    /// Fold one value in arrival order.
    pub fn fold(&mut self, value: f64) {
        self.values += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        if self.first.is_none() {
            self.first = Some(value);
        }
        self.last = Some(value);
    }

    /// Evaluate the aggregate. `members` is the number of events in the
    /// window, including those that did not carry the field.
    ///
    /// An empty `sum` is `0.0`; an empty `avg`, `min`, `max`, `first` or
    /// `last` has no value.
    pub fn result(&self, aggregate: AggregateFn, members: u64) -> Option<f64> {
        match aggregate {
            AggregateFn::Sum => Some(self.sum),
            AggregateFn::Count => Some(members as f64),
            AggregateFn::Avg => (self.values > 0).then(|| self.sum / self.values as f64),
            AggregateFn::Min => self.min,
            AggregateFn::Max => self.max,
            AggregateFn::First => self.first,
            AggregateFn::Last => self.last,
        }
    }
}

/// Running sum that tolerates values being subtracted again.
///
/// Neumaier compensation keeps the rounding error lost to large values, so
/// adding `1e16` and later removing it leaves the small values intact.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    pub fn add(&mut self, value: f64) {
        let total = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - total) + value;
        } else {
            self.compensation += (value - total) + self.sum;
        }
        self.sum = total;
    }

    pub fn remove(&mut self, value: f64) {
        self.add(-value);
    }

    pub fn value(&self) -> f64 {
        // Infinite or NaN sums carry no usable compensation.
        if self.sum.is_finite() {
            self.sum + self.compensation
        } else {
            self.sum
        }
    }
}

impl FromIterator<f64> for CompensatedSum {
    fn from_iter<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut sum = Self::default();
        for value in values {
            sum.add(value);
        }
        sum
    }
}

/// Aggregate reported by the sliding buffer once it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlidingAggregate {
    Sum,
    #[default]
    Avg,
    Cumulative,
    Min,
    Max,
}

impl SlidingAggregate {
    pub const ALL: [SlidingAggregate; 5] = [
        SlidingAggregate::Sum,
        SlidingAggregate::Avg,
        SlidingAggregate::Cumulative,
        SlidingAggregate::Min,
        SlidingAggregate::Max,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SlidingAggregate::Sum => "sum",
            SlidingAggregate::Avg => "avg",
            SlidingAggregate::Cumulative => "cumulative",
            SlidingAggregate::Min => "min",
            SlidingAggregate::Max => "max",
        }
    }
}

impl fmt::Display for SlidingAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SlidingAggregate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownAggregate(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folded(values: &[f64]) -> Accumulator {
        let mut acc = Accumulator::default();
        for v in values {
            acc.fold(*v);
        }
        acc
    }

    #[test]
    fn test_fold_results() {
        let acc = folded(&[10.0, 28.0, 4.0]);

        assert_eq!(acc.result(AggregateFn::Sum, 3), Some(42.0));
        assert_eq!(acc.result(AggregateFn::Count, 3), Some(3.0));
        assert_eq!(acc.result(AggregateFn::Avg, 3), Some(14.0));
        assert_eq!(acc.result(AggregateFn::Min, 3), Some(4.0));
        assert_eq!(acc.result(AggregateFn::Max, 3), Some(28.0));
        assert_eq!(acc.result(AggregateFn::First, 3), Some(10.0));
        assert_eq!(acc.result(AggregateFn::Last, 3), Some(4.0));
    }

    #[test]
    fn test_empty_accumulator() {
        let acc = Accumulator::default();

        assert_eq!(acc.result(AggregateFn::Sum, 2), Some(0.0));
        assert_eq!(acc.result(AggregateFn::Count, 2), Some(2.0));
        assert_eq!(acc.result(AggregateFn::Avg, 2), None);
        assert_eq!(acc.result(AggregateFn::Max, 2), None);
    }

    #[test]
    fn test_compensated_sum_survives_large_removal() {
        let mut sum = CompensatedSum::default();
        sum.add(1e16);
        sum.add(1.0);
        sum.add(1.0);
        sum.remove(1e16);
        assert_eq!(sum.value(), 2.0);

        let collected: CompensatedSum = [0.1, 0.2, 0.3].into_iter().collect();
        assert!((collected.value() - 0.6).abs() < 1e-15);
    }

    #[test]
    fn test_compensated_sum_non_finite() {
        let mut sum = CompensatedSum::default();
        sum.add(f64::INFINITY);
        sum.add(1.0);
        assert_eq!(sum.value(), f64::INFINITY);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("AVG".parse::<AggregateFn>().unwrap(), AggregateFn::Avg);
        assert_eq!(
            "cumulative".parse::<SlidingAggregate>().unwrap(),
            SlidingAggregate::Cumulative
        );
        assert!(matches!(
            "median".parse::<AggregateFn>(),
            Err(ConfigError::UnknownAggregate(_))
        ));
        assert!(AggregateFn::Last.is_order_sensitive());
        assert!(!AggregateFn::Sum.is_order_sensitive());
    }
}
