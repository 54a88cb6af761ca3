//! Execute requests

use crate::error::{Result, SignalFlowError};
use crate::protocol::ExecuteFrame;

/// Parameters of one SignalFlow computation
///
/// `start` and `end` are epoch milliseconds and are sent as given; an inverted
/// window is left for the service to judge.
///
/// # Example
///
/// ```
/// use signalflow_rs::ExecuteRequest;
///
/// let request = ExecuteRequest::new("data('cpu.utilization').mean().publish()", 0, 60_000, 10_000)
///     .immediate(true)
///     .max_delay(5_000);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub program: String,
    pub start: i64,
    pub end: i64,
    pub resolution_ms: i64,
    pub immediate: Option<bool>,
    pub max_delay_ms: Option<i64>,
    pub timezone: Option<String>,
}

impl ExecuteRequest {
    pub fn new(program: impl Into<String>, start: i64, end: i64, resolution_ms: i64) -> Self {
        Self {
            program: program.into(),
            start,
            end,
            resolution_ms,
            immediate: None,
            max_delay_ms: None,
            timezone: None,
        }
    }

    /// Ask the service to emit results without waiting for the full max delay
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(immediate);
        self
    }

    /// Bound how long the service waits for late data
    pub fn max_delay(mut self, max_delay_ms: i64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Timezone used for calendar window alignment
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Reject requests that must never reach the wire
    pub fn validate(&self) -> Result<()> {
        if self.resolution_ms <= 0 {
            return Err(SignalFlowError::InvalidArgument(format!(
                "resolution must be positive, got {} ms",
                self.resolution_ms
            )));
        }
        if self.program.trim().is_empty() {
            return Err(SignalFlowError::InvalidArgument(
                "program must not be empty".to_string(),
            ));
        }
        if let Some(delay) = self.max_delay_ms {
            if delay < 0 {
                return Err(SignalFlowError::InvalidArgument(format!(
                    "max delay must not be negative, got {} ms",
                    delay
                )));
            }
        }
        Ok(())
    }

    /// The wire form of this request on `channel`
    pub fn to_frame(&self, channel: impl Into<String>) -> ExecuteFrame {
        ExecuteFrame {
            channel: channel.into(),
            program: self.program.clone(),
            start: self.start,
            stop: self.end,
            resolution: self.resolution_ms,
            immediate: self.immediate,
            max_delay: self.max_delay_ms,
            timezone: self.timezone.clone(),
        }
    }
}
