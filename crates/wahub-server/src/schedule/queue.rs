//! Pending deferred sends.

use chrono::{DateTime, Utc};
use metrics::gauge;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;
use wahub_core::protocol::{ScheduleRequest, ScheduledMessage};

use crate::metrics::SCHEDULED_PENDING;

/// Why a schedule request was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleRejection {
    /// Message, recipients or trigger time missing.
    #[error("Message, date/time, and contacts are required.")]
    MissingFields,
    /// Trigger time is not RFC 3339.
    #[error("invalid dateTime: {0}")]
    InvalidDateTime(String),
}

/// A validated job waiting for its trigger time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingSchedule {
    /// Parsed trigger time.
    pub trigger_at: DateTime<Utc>,
    /// The job as listed to clients.
    pub job: ScheduledMessage,
}

impl PendingSchedule {
    /// Validate a client request and assign it an id.
    pub fn from_request(req: ScheduleRequest) -> Result<Self, ScheduleRejection> {
        if req.message.is_empty() || req.date_time.is_empty() || req.contacts.is_empty() {
            return Err(ScheduleRejection::MissingFields);
        }
        let trigger_at = DateTime::parse_from_rfc3339(&req.date_time)
            .map_err(|e| ScheduleRejection::InvalidDateTime(e.to_string()))?
            .with_timezone(&Utc);

        if req.is_recurring || req.recurring_config.is_some() {
            warn!(
                interval = req.recurring_config.as_ref().map(|c| c.interval.as_str()),
                "recurring schedule accepted; it will fire once"
            );
        }

        Ok(Self {
            trigger_at,
            job: ScheduledMessage {
                id: format!("sched_{}", Uuid::now_v7()),
                message: req.message,
                contacts: req.contacts,
                date_time: req.date_time,
                is_recurring: req.is_recurring,
                recurring_config: req.recurring_config,
            },
        })
    }

    /// Whether the trigger time has been reached at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.trigger_at <= now
    }
}

/// Unordered collection of pending jobs shared by command handlers and the
/// dispatch loop.
#[derive(Default)]
pub struct ScheduleQueue {
    pending: Mutex<Vec<PendingSchedule>>,
}

impl ScheduleQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job. Returns the new queue length.
    pub fn enqueue(&self, entry: PendingSchedule) -> usize {
        let mut pending = self.pending.lock();
        pending.push(entry);
        record_pending(pending.len());
        pending.len()
    }

    /// Copy of every pending job, in submission order.
    pub fn list(&self) -> Vec<ScheduledMessage> {
        self.pending.lock().iter().map(|p| p.job.clone()).collect()
    }

    /// Detach and return every job due at `now`, leaving the rest queued.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<PendingSchedule> {
        let mut pending = self.pending.lock();
        let (due, remaining): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|entry| entry.is_due(now));
        *pending = remaining;
        record_pending(pending.len());
        due
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_pending(len: usize) {
    gauge!(SCHEDULED_PENDING).set(len as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use wahub_core::protocol::RecurringConfig;

    fn request(message: &str, at: &str) -> ScheduleRequest {
        ScheduleRequest {
            message: message.into(),
            contacts: vec!["6281234@s.whatsapp.net".into()],
            date_time: at.into(),
            ..ScheduleRequest::default()
        }
    }

    fn entry(message: &str, at: DateTime<Utc>) -> PendingSchedule {
        PendingSchedule::from_request(request(message, &at.to_rfc3339())).unwrap()
    }

    #[test]
    fn valid_request_gets_an_id() {
        let entry = PendingSchedule::from_request(request("hi", "2024-01-01T00:00:00Z")).unwrap();
        assert!(entry.job.id.starts_with("sched_"));
        assert_eq!(entry.trigger_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(entry.job.date_time, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn offset_is_normalised_to_utc() {
        let entry =
            PendingSchedule::from_request(request("hi", "2024-01-01T07:00:00+07:00")).unwrap();
        assert_eq!(entry.trigger_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn missing_fields_are_rejected() {
        let mut req = request("", "2024-01-01T00:00:00Z");
        assert_eq!(
            PendingSchedule::from_request(req.clone()),
            Err(ScheduleRejection::MissingFields)
        );
        req.message = "hi".into();
        req.contacts.clear();
        assert_eq!(
            PendingSchedule::from_request(req),
            Err(ScheduleRejection::MissingFields)
        );
        assert_eq!(
            PendingSchedule::from_request(request("hi", "")),
            Err(ScheduleRejection::MissingFields)
        );
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let err = PendingSchedule::from_request(request("hi", "tomorrow")).unwrap_err();
        assert_matches!(err, ScheduleRejection::InvalidDateTime(_));
        assert!(err.to_string().starts_with("invalid dateTime: "));
    }

    #[test]
    fn recurrence_is_kept_on_the_job() {
        let mut req = request("hi", "2024-01-01T00:00:00Z");
        req.is_recurring = true;
        req.recurring_config = Some(RecurringConfig {
            interval: "daily".into(),
            end_date: None,
        });
        let entry = PendingSchedule::from_request(req).unwrap();
        assert!(entry.job.is_recurring);
        assert_eq!(entry.job.recurring_config.unwrap().interval, "daily");
    }

    #[test]
    fn take_due_splits_by_trigger_time() {
        let queue = ScheduleQueue::new();
        let now = Utc::now();
        let _ = queue.enqueue(entry("past", now - Duration::minutes(1)));
        let _ = queue.enqueue(entry("exact", now));
        let _ = queue.enqueue(entry("future", now + Duration::minutes(1)));

        let due = queue.take_due(now);
        let names: Vec<_> = due.iter().map(|e| e.job.message.as_str()).collect();
        assert_eq!(names, ["past", "exact"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.list()[0].message, "future");
    }

    #[test]
    fn due_entries_are_taken_once() {
        let queue = ScheduleQueue::new();
        let now = Utc::now();
        let _ = queue.enqueue(entry("past", now - Duration::seconds(5)));
        assert_eq!(queue.take_due(now).len(), 1);
        assert!(queue.take_due(now).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn future_entry_survives_until_due() {
        let queue = ScheduleQueue::new();
        let now = Utc::now();
        let _ = queue.enqueue(entry("later", now + Duration::seconds(90)));
        for tick in 0..3 {
            assert!(queue.take_due(now + Duration::seconds(30 * tick)).is_empty());
        }
        assert_eq!(queue.take_due(now + Duration::seconds(90)).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn list_preserves_submission_order() {
        let queue = ScheduleQueue::new();
        let now = Utc::now();
        for name in ["a", "b", "c"] {
            let _ = queue.enqueue(entry(name, now + Duration::hours(1)));
        }
        let names: Vec<_> = queue.list().into_iter().map(|m| m.message).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
