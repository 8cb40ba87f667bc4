//! Timer-driven execution of due schedule entries.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use wahub_core::Jid;
use wahub_core::protocol::ServerMessage;
use wahub_core::transport::MessagingTransport;

use super::queue::{PendingSchedule, ScheduleQueue};
use crate::metrics::{
    SCHEDULED_DISPATCHED_TOTAL, SCHEDULED_DISPATCH_PANICS_TOTAL, SCHEDULED_SEND_FAILURES_TOTAL,
};
use crate::websocket::session::panic_message;
use crate::websocket::broadcast::Broadcaster;

/// Result of executing one due entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Id of the executed entry.
    pub id: String,
    /// Text body.
    pub message: String,
    /// Recipients that accepted the send.
    pub successful: usize,
    /// Recipients that did not.
    pub failed: usize,
}

impl DispatchOutcome {
    fn notification(&self) -> ServerMessage {
        ServerMessage::ScheduledSent {
            message: self.message.clone(),
            successful: self.successful,
            failed: self.failed,
        }
    }
}

/// Scans the schedule queue on a fixed period and fires due entries.
pub struct ScheduleDispatcher {
    queue: Arc<ScheduleQueue>,
    transport: Arc<dyn MessagingTransport>,
    broadcaster: Broadcaster,
    interval: Duration,
}

impl ScheduleDispatcher {
    /// Create a dispatcher. A zero `interval` is raised to one second.
    pub fn new(
        queue: Arc<ScheduleQueue>,
        transport: Arc<dyn MessagingTransport>,
        broadcaster: Broadcaster,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            transport,
            broadcaster,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Tick until `shutdown` fires. The first scan happens one period after start.
    #[instrument(skip_all, name = "schedule_dispatcher")]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "scheduled dispatch enabled");
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("scheduled dispatch stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let _ = self.tick(Utc::now()).await;
                }
            }
        }
    }

    /// Execute every entry due at `now`, then notify clients once per entry.
    ///
    /// A panic while executing an entry counts all of its targets as failed;
    /// the remaining entries still run.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<DispatchOutcome> {
        let due = self.queue.take_due(now);
        if due.is_empty() {
            return Vec::new();
        }
        debug!(due = due.len(), remaining = self.queue.len(), "firing scheduled entries");

        let mut outcomes = Vec::with_capacity(due.len());
        for entry in due {
            let id = entry.job.id.clone();
            let message = entry.job.message.clone();
            let total = entry.job.contacts.len();
            match AssertUnwindSafe(self.execute(entry)).catch_unwind().await {
                Ok(outcome) => outcomes.push(outcome),
                Err(payload) => {
                    counter!(SCHEDULED_DISPATCH_PANICS_TOTAL).increment(1);
                    error!(
                        %id,
                        panic = panic_message(payload.as_ref()),
                        "panic while sending scheduled entry"
                    );
                    outcomes.push(DispatchOutcome {
                        id,
                        message,
                        successful: 0,
                        failed: total,
                    });
                }
            }
        }
        for outcome in &outcomes {
            let _ = self.broadcaster.broadcast(&outcome.notification()).await;
        }
        outcomes
    }

    async fn execute(&self, entry: PendingSchedule) -> DispatchOutcome {
        let job = entry.job;
        let total = job.contacts.len();
        counter!(SCHEDULED_DISPATCHED_TOTAL).increment(1);

        let (successful, failed) = if self.transport.is_authenticated() {
            let mut successful = 0;
            for contact in &job.contacts {
                if self.send_one(contact, &job.message).await {
                    successful += 1;
                }
            }
            (successful, total - successful)
        } else {
            warn!(id = %job.id, "transport not connected, scheduled entry dropped");
            (0, total)
        };

        counter!(SCHEDULED_SEND_FAILURES_TOTAL).increment(failed as u64);
        info!(id = %job.id, successful, failed, "scheduled entry sent");
        DispatchOutcome {
            id: job.id,
            message: job.message,
            successful,
            failed,
        }
    }

    async fn send_one(&self, contact: &str, body: &str) -> bool {
        let jid = match Jid::parse_contact(contact) {
            Ok(jid) => jid,
            Err(e) => {
                debug!(contact, error = %e, "unusable scheduled recipient");
                return false;
            }
        };
        match self.transport.send_text(&jid, body).await {
            Ok(_) => true,
            Err(e) => {
                warn!(contact, error = %e, "scheduled send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain_json, open_connection};
    use crate::websocket::registry::ConnectionRegistry;
    use chrono::Duration as ChronoDuration;
    use wahub_core::protocol::ScheduleRequest;
    use wahub_core::transport::mock::MockTransport;

    struct Fixture {
        queue: Arc<ScheduleQueue>,
        transport: Arc<MockTransport>,
        registry: Arc<ConnectionRegistry>,
        dispatcher: ScheduleDispatcher,
    }

    fn fixture(transport: MockTransport) -> Fixture {
        let queue = Arc::new(ScheduleQueue::new());
        let transport = Arc::new(transport);
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry), Duration::from_secs(1));
        let dispatcher = ScheduleDispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&transport) as Arc<dyn MessagingTransport>,
            broadcaster,
            Duration::from_secs(30),
        );
        Fixture {
            queue,
            transport,
            registry,
            dispatcher,
        }
    }

    fn enqueue(queue: &ScheduleQueue, message: &str, contacts: &[&str], at: DateTime<Utc>) {
        let req = ScheduleRequest {
            message: message.into(),
            contacts: contacts.iter().map(|c| (*c).to_string()).collect(),
            date_time: at.to_rfc3339(),
            ..ScheduleRequest::default()
        };
        let _ = queue.enqueue(PendingSchedule::from_request(req).unwrap());
    }

    #[tokio::test]
    async fn past_entry_fires_and_notifies() {
        let fx = fixture(MockTransport::authenticated());
        let (conn, mut rx) = open_connection("c1");
        let _ = fx.registry.register(conn);
        let at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        enqueue(&fx.queue, "hi", &["6281234@s.whatsapp.net"], at);

        let outcomes = fx.dispatcher.tick(Utc::now()).await;
        assert_eq!(outcomes.len(), 1);
        assert!(fx.queue.is_empty());

        let frames = drain_json(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0],
            serde_json::json!({"type": "scheduled_sent", "message": "hi", "successful": 1, "failed": 0})
        );
        assert_eq!(fx.transport.sent()[0].0.to_string(), "6281234@s.whatsapp.net");
    }

    #[tokio::test]
    async fn future_entry_waits() {
        let fx = fixture(MockTransport::authenticated());
        let now = Utc::now();
        enqueue(&fx.queue, "later", &["628111"], now + ChronoDuration::minutes(5));

        assert!(fx.dispatcher.tick(now).await.is_empty());
        assert_eq!(fx.queue.len(), 1);
        assert!(fx.transport.sent().is_empty());

        let outcomes = fx.dispatcher.tick(now + ChronoDuration::minutes(5)).await;
        assert_eq!(outcomes.len(), 1);
        assert!(fx.dispatcher.tick(now + ChronoDuration::minutes(10)).await.is_empty());
        assert_eq!(fx.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn per_recipient_failures_are_counted() {
        let transport = MockTransport::authenticated();
        transport.fail_recipient(Jid::user("628222"), "not on whatsapp");
        let fx = fixture(transport);
        enqueue(&fx.queue, "x", &["628111", "628222", "   "], Utc::now());

        let outcomes = fx.dispatcher.tick(Utc::now()).await;
        assert_eq!(outcomes[0].successful, 1);
        assert_eq!(outcomes[0].failed, 2);
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn unauthenticated_transport_fails_every_target() {
        let fx = fixture(MockTransport::new());
        let (conn, mut rx) = open_connection("c1");
        let _ = fx.registry.register(conn);
        enqueue(&fx.queue, "x", &["628111", "628222"], Utc::now());

        let outcomes = fx.dispatcher.tick(Utc::now()).await;
        assert_eq!((outcomes[0].successful, outcomes[0].failed), (0, 2));
        assert!(fx.transport.sent().is_empty());
        assert!(fx.queue.is_empty());
        assert_eq!(drain_json(&mut rx)[0]["failed"], 2);
    }

    #[tokio::test]
    async fn one_notification_per_entry() {
        let fx = fixture(MockTransport::authenticated());
        let (conn, mut rx) = open_connection("c1");
        let _ = fx.registry.register(conn);
        let now = Utc::now();
        enqueue(&fx.queue, "a", &["628111"], now);
        enqueue(&fx.queue, "b", &["628111"], now);
        enqueue(&fx.queue, "c", &["628111"], now + ChronoDuration::hours(1));

        let _ = fx.dispatcher.tick(now).await;
        let frames = drain_json(&mut rx);
        let messages: Vec<_> = frames.iter().map(|f| f["message"].as_str().unwrap()).collect();
        assert_eq!(messages, ["a", "b"]);
        assert_eq!(fx.queue.len(), 1);
    }

    #[tokio::test]
    async fn panicking_send_fails_entry_and_keeps_dispatching() {
        let fx = fixture(MockTransport::authenticated());
        let (conn, mut rx) = open_connection("c1");
        let _ = fx.registry.register(conn);
        let now = Utc::now();
        enqueue(&fx.queue, "boom", &["628111", "628222"], now);
        enqueue(&fx.queue, "later", &["628111"], now + ChronoDuration::minutes(1));

        fx.transport.panic_on_send(true);
        let outcomes = fx.dispatcher.tick(now).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!((outcomes[0].successful, outcomes[0].failed), (0, 2));
        assert_eq!(fx.queue.len(), 1);
        assert_eq!(
            drain_json(&mut rx),
            [serde_json::json!({"type": "scheduled_sent", "message": "boom", "successful": 0, "failed": 2})]
        );

        fx.transport.panic_on_send(false);
        let outcomes = fx.dispatcher.tick(now + ChronoDuration::minutes(1)).await;
        assert_eq!((outcomes[0].successful, outcomes[0].failed), (1, 0));
        assert!(fx.queue.is_empty());
        assert_eq!(drain_json(&mut rx)[0]["message"], "later");
    }

    #[tokio::test(start_paused = true)]
    async fn run_fires_on_interval_and_stops_on_shutdown() {
        let fx = fixture(MockTransport::authenticated());
        enqueue(&fx.queue, "hi", &["628111"], Utc::now() - ChronoDuration::seconds(1));
        let queue = Arc::clone(&fx.queue);
        let transport = Arc::clone(&fx.transport);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(fx.dispatcher.run(shutdown.clone()));

        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(queue.len(), 1);
        time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
        assert_eq!(transport.sent().len(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn zero_interval_is_raised() {
        let fx = fixture(MockTransport::new());
        let d = ScheduleDispatcher::new(
            fx.queue,
            fx.transport as Arc<dyn MessagingTransport>,
            Broadcaster::new(fx.registry, Duration::from_secs(1)),
            Duration::ZERO,
        );
        assert_eq!(d.interval, Duration::from_secs(1));
    }
}
