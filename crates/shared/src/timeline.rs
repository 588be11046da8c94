//! Maps an order's status history onto the fixed milestones shown to the
//! customer.
//!
//! The history is assumed to be appended chronologically, so the last event
//! decides the current position. Milestone times are looked up by status
//! name; a milestone whose event is missing from the history is stamped with
//! the caller's fallback time.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::protocol::StatusEvent;

pub const STEP_PLACED: &str = "Order placed!";
pub const STEP_PREPARING: &str = "Preparing for dispatch";
pub const STEP_OUT_FOR_DELIVERY: &str = "Out for delivery";
pub const STEP_DELIVERED: &str = "Delivered";
pub const STEP_CANCELLED: &str = "Cancelled by you / store";

const STATUS_PLACED: &str = "placed";
const STATUS_PREPARING: &str = "preparing for dispatch";
const STATUS_OUT_FOR_DELIVERY: &str = "out for delivery";
const STATUS_DELIVERED: &str = "delivered";
const STATUS_CANCELLED: &str = "cancelled";

/// Status names in milestone order, excluding "placed" which is always step 0.
const PROGRESS_STATUSES: [&str; 3] = [STATUS_PREPARING, STATUS_OUT_FOR_DELIVERY, STATUS_DELIVERED];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Placed,
    PreparingForDispatch,
    OutForDelivery,
    Delivered,
    Cancelled,
    Unrecognized(String),
}

impl StatusKind {
    /// Classifies a raw status string, ignoring case.
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            STATUS_PLACED => Self::Placed,
            STATUS_PREPARING => Self::PreparingForDispatch,
            STATUS_OUT_FOR_DELIVERY => Self::OutForDelivery,
            STATUS_DELIVERED => Self::Delivered,
            STATUS_CANCELLED => Self::Cancelled,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Index of the milestone this status lights up on the normal path.
    fn progress_index(&self) -> Option<usize> {
        match self {
            Self::Placed => Some(0),
            Self::PreparingForDispatch => Some(1),
            Self::OutForDelivery => Some(2),
            Self::Delivered => Some(3),
            Self::Cancelled | Self::Unrecognized(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineStep {
    pub label: &'static str,
    pub time: Option<DateTime<Utc>>,
}

impl TimelineStep {
    fn new(label: &'static str) -> Self {
        Self { label, time: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    pub steps: Vec<TimelineStep>,
    pub active_index: usize,
    pub is_cancelled: bool,
    /// Lower-cased latest status when it matched no known milestone. The timeline is
    /// then rendered as if the order were only placed.
    pub unrecognized_status: Option<String>,
}

impl Timeline {
    pub fn active_step(&self) -> Option<&TimelineStep> {
        self.steps.get(self.active_index)
    }
}

pub fn derive_timeline(
    events: &[StatusEvent],
    fallback_time: DateTime<Utc>,
    order_created_at: DateTime<Utc>,
) -> Timeline {
    let latest = events
        .last()
        .map(|event| StatusKind::parse(&event.status))
        .unwrap_or(StatusKind::Placed);

    let mut placed = TimelineStep::new(STEP_PLACED);
    placed.time = Some(order_created_at);

    if latest == StatusKind::Cancelled {
        let cancelled = TimelineStep {
            label: STEP_CANCELLED,
            time: Some(event_time(events, STATUS_CANCELLED).unwrap_or(fallback_time)),
        };
        return Timeline {
            steps: vec![placed, cancelled],
            active_index: 1,
            is_cancelled: true,
            unrecognized_status: None,
        };
    }

    let mut steps = vec![
        placed,
        TimelineStep::new(STEP_PREPARING),
        TimelineStep::new(STEP_OUT_FOR_DELIVERY),
        TimelineStep::new(STEP_DELIVERED),
    ];

    let unrecognized_status = match &latest {
        StatusKind::Unrecognized(raw) => {
            warn!(status = %raw, "timeline: unrecognized order status, holding at placed");
            Some(raw.clone())
        }
        _ => None,
    };

    let active_index = latest.progress_index().unwrap_or(0);
    for (step, status) in steps
        .iter_mut()
        .skip(1)
        .zip(PROGRESS_STATUSES)
        .take(active_index)
    {
        step.time = Some(event_time(events, status).unwrap_or(fallback_time));
    }

    Timeline {
        steps,
        active_index,
        is_cancelled: false,
        unrecognized_status,
    }
}

fn event_time(events: &[StatusEvent], status: &str) -> Option<DateTime<Utc>> {
    events
        .iter()
        .find(|event| event.status.to_lowercase() == status)
        .map(|event| event.created_at)
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;
