//! Result aggregation
//!
//! [`ResultAggregator`] folds a stream of protocol messages into a
//! [`CollectedResult`]: one ordered point list per time series plus the latest
//! metadata seen for every series.
//!
//! The aggregator never reorders points and never drops a point for an id it has
//! not seen before; there is no cap on points per series. It has no read path of
//! its own and is fed exclusively by [`Computation::collect`].
//!
//! [`Computation::collect`]: crate::computation::Computation::collect

use crate::protocol::{DataMessage, Message, MetadataMessage};
use crate::types::{CollectedResult, DataPoint, Properties, TimeSeries};
use std::collections::HashMap;

/// Accumulates data and metadata messages into per-series records
#[derive(Debug, Default)]
pub struct ResultAggregator {
    series: HashMap<String, TimeSeries>,
    metadata: HashMap<String, Properties>,
    messages: u64,
}

impl ResultAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one message; anything but data and metadata is ignored
    pub fn ingest(&mut self, message: &Message) {
        match message {
            Message::Data(data) => self.ingest_data(data),
            Message::Metadata(meta) => self.ingest_metadata(meta),
            _ => return,
        }
        self.messages += 1;
    }

    /// Append every payload of a data batch to its series
    pub fn ingest_data(&mut self, data: &DataMessage) {
        for payload in &data.data {
            self.push_point(
                &payload.ts_id,
                DataPoint {
                    timestamp: data.logical_timestamp_ms,
                    value: payload.value,
                },
            );
        }
    }

    /// Record metadata for a series, replacing any earlier metadata
    pub fn ingest_metadata(&mut self, meta: &MetadataMessage) {
        self.metadata
            .insert(meta.ts_id.clone(), meta.properties.clone());
    }

    /// Append one point to a series, creating the series on first sight
    pub fn push_point(&mut self, tsid: &str, point: DataPoint) {
        match self.series.get_mut(tsid) {
            Some(series) => series.points.push(point),
            None => {
                let mut series = TimeSeries::new(tsid);
                series.points.push(point);
                self.series.insert(tsid.to_string(), series);
            }
        }
    }

    /// Number of data and metadata messages ingested
    pub fn message_count(&self) -> u64 {
        self.messages
    }

    /// Number of points across every series
    pub fn point_count(&self) -> usize {
        self.series.values().map(TimeSeries::len).sum()
    }

    /// Finish aggregation, attaching the latest metadata to each series
    pub fn finish(self) -> CollectedResult {
        let Self {
            mut series,
            metadata,
            ..
        } = self;
        for (tsid, record) in series.iter_mut() {
            record.properties = metadata.get(tsid).cloned();
        }
        CollectedResult { series, metadata }
    }
}
