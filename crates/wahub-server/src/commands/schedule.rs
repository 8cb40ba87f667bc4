//! `schedule_message`, `get_scheduled`

use tracing::info;
use wahub_core::protocol::{ScheduleRequest, ServerMessage};

use super::reply;
use crate::hub::Hub;
use crate::schedule::PendingSchedule;
use crate::websocket::connection::ConnectionId;

pub(super) async fn schedule_message(hub: &Hub, sender: &ConnectionId, req: ScheduleRequest) {
    let entry = match PendingSchedule::from_request(req) {
        Ok(entry) => entry,
        Err(rejection) => {
            reply(hub, sender, ServerMessage::error(rejection.to_string())).await;
            return;
        }
    };

    let id = entry.job.id.clone();
    let trigger_at = entry.trigger_at;
    let pending = hub.schedule().enqueue(entry);
    info!(%id, %trigger_at, pending, "message scheduled");

    reply(
        hub,
        sender,
        ServerMessage::ScheduleSuccess {
            message: "Message scheduled successfully".into(),
        },
    )
    .await;
}

pub(super) async fn get_scheduled(hub: &Hub) {
    let messages = hub.schedule().list();
    let _ = hub
        .broadcaster()
        .broadcast(&ServerMessage::ScheduledMessages { messages })
        .await;
}
