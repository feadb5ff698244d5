//! PLC counter delta calculation
//!
//! Industrial PLCs use fixed-width monotonic counters that wrap. A
//! backward reading is either a silent rollover (keep counting) or a
//! genuine restore/reset (start over from the new absolute value); the
//! distinction keeps hourly production accurate.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::events::{
    Anomaly, CounterAnomalyEvent, CounterDeltaEvent, CounterReadEvent, EngineEvent,
};

/// Common PLC counter maximums for rollover detection.
const MAX_16: i64 = (1 << 16) - 1; // 65535
const MAX_32: i64 = (1 << 32) - 1; // 4294967295

/// Compute the production delta between two counter readings.
///
/// - equal readings: `(0, None)`
/// - backward: plausible 16/32-bit rollover below the jump threshold is
///   normal production; otherwise a reset, and the returned delta is the
///   new absolute value
/// - forward: the difference, flagged `Jump` above the threshold
pub fn calculate_delta(last_count: i64, new_count: i64, jump_threshold: i64) -> (i64, Anomaly) {
    if new_count == last_count {
        return (0, Anomaly::None);
    }
    if new_count < last_count {
        if let Some(rollover) = try_rollover(last_count, new_count, jump_threshold) {
            return (rollover, Anomaly::None);
        }
        return (new_count, Anomaly::Reset);
    }
    let delta = new_count - last_count;
    if delta > jump_threshold {
        return (delta, Anomaly::Jump);
    }
    (delta, Anomaly::None)
}

/// Check whether the counter wrapped around a known PLC bit width.
/// Returns the rollover delta if plausible (positive and below the jump
/// threshold).
fn try_rollover(last_count: i64, new_count: i64, jump_threshold: i64) -> Option<i64> {
    for max in [MAX_16, MAX_32] {
        if last_count <= max {
            let d = (max - last_count) + new_count + 1;
            if d > 0 && d <= jump_threshold {
                return Some(d);
            }
        }
    }
    None
}

/// Identifies one reporting point and its line/style binding.
#[derive(Debug, Clone, Copy)]
pub struct ReportingPoint {
    pub id: i64,
    pub line_id: i64,
    pub job_style_id: i64,
}

/// Per-reporting-point counter state feeding [`calculate_delta`].
///
/// The first observation of a point only stores the baseline; deltas are
/// emitted from the second observation on.
pub struct CounterTracker {
    jump_threshold: i64,
    last_values: Mutex<HashMap<i64, i64>>,
    events: broadcast::Sender<EngineEvent>,
}

impl CounterTracker {
    pub fn new(jump_threshold: i64, events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            jump_threshold,
            last_values: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Feed one raw counter reading.
    pub fn observe(&self, point: ReportingPoint, value: i64) {
        let _ = self.events.send(EngineEvent::CounterRead(CounterReadEvent {
            reporting_point_id: point.id,
            value,
        }));

        let last = {
            let mut values = self.last_values.lock().unwrap();
            match values.insert(point.id, value) {
                Some(last) => last,
                None => {
                    tracing::debug!(point = point.id, value, "counter baseline stored");
                    return;
                }
            }
        };

        let (delta, anomaly) = calculate_delta(last, value, self.jump_threshold);
        if delta == 0 && anomaly == Anomaly::None {
            return;
        }

        if anomaly != Anomaly::None {
            tracing::warn!(
                point = point.id,
                old = last,
                new = value,
                anomaly = anomaly.as_str(),
                "counter anomaly"
            );
            let _ = self
                .events
                .send(EngineEvent::CounterAnomaly(CounterAnomalyEvent {
                    reporting_point_id: point.id,
                    old_value: last,
                    new_value: value,
                    anomaly,
                }));
        }

        // Reset deltas still go out with the absolute restored value;
        // the hourly tracker skips them, other consumers may not.
        let _ = self.events.send(EngineEvent::CounterDelta(CounterDeltaEvent {
            reporting_point_id: point.id,
            line_id: point.line_id,
            job_style_id: point.job_style_id,
            delta,
            new_count: value,
            anomaly,
        }));
    }
}
