//! Core data types for the SignalFlow client
//!
//! This module contains the data structures shared by the codec, the computation
//! sessions and the result aggregator.
//!
//! # Main Types
//!
//! - [`DataValue`] - A numeric sample, integer or double as the service sent it
//! - [`DataPoint`] - A single timestamped value
//! - [`TimeSeries`] - Ordered points for one time series identifier
//! - [`Properties`] - Descriptive metadata attached to a time series
//!
//! Time series identifiers are opaque strings; the client never interprets them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Descriptive properties of a time series (metric name, dimensions, ...)
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// A numeric value carried by a data message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Integral value
    Integer(i64),
    /// Floating point value
    Double(f64),
}

impl DataValue {
    /// The value widened to f64
    pub fn as_f64(&self) -> f64 {
        match *self {
            DataValue::Integer(v) => v as f64,
            DataValue::Double(v) => v,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Integer(v) => write!(f, "{}", v),
            DataValue::Double(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Integer(v)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Double(v)
    }
}

/// A single timestamped sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Logical timestamp in epoch milliseconds
    pub timestamp: i64,
    /// Sample value
    pub value: DataValue,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(timestamp: i64, value: impl Into<DataValue>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// Points collected for one time series, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Time series identifier
    pub tsid: String,
    /// Latest metadata received for this series, if any
    pub properties: Option<Properties>,
    /// Points in the order the service emitted them
    pub points: Vec<DataPoint>,
}

impl TimeSeries {
    /// Create an empty series
    pub fn new(tsid: impl Into<String>) -> Self {
        Self {
            tsid: tsid.into(),
            properties: None,
            points: Vec::new(),
        }
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series has no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First point, if any
    pub fn first(&self) -> Option<&DataPoint> {
        self.points.first()
    }

    /// Last point, if any
    pub fn last(&self) -> Option<&DataPoint> {
        self.points.last()
    }

    /// The metric name from the metadata properties (`sf_metric`)
    pub fn metric(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.get("sf_metric"))
            .and_then(|v| v.as_str())
    }
}

/// The outcome of draining a computation to its end
///
/// Only ever produced on a clean end of stream; an error during collection
/// yields an error instead of a partially filled value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedResult {
    /// Series that received at least one data point, keyed by identifier
    pub series: HashMap<String, TimeSeries>,
    /// Latest metadata per identifier, including series that never received data
    pub metadata: HashMap<String, Properties>,
}

impl CollectedResult {
    /// Look up one series by identifier
    pub fn get(&self, tsid: &str) -> Option<&TimeSeries> {
        self.series.get(tsid)
    }

    /// Number of series with data
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether no series received data
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Total number of points across every series
    pub fn total_points(&self) -> usize {
        self.series.values().map(TimeSeries::len).sum()
    }

    /// Series identifiers in sorted order
    pub fn tsids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.series.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
