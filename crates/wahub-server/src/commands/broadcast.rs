//! `send_broadcast`

use tracing::{debug, info};
use wahub_core::Jid;
use wahub_core::protocol::{BroadcastRequest, ContactPayload, ServerMessage};

use super::{NOT_CONNECTED, reply};
use crate::hub::Hub;
use crate::websocket::connection::ConnectionId;

pub(super) async fn send_broadcast(hub: &Hub, sender: &ConnectionId, req: BroadcastRequest) {
    if !hub.transport().is_authenticated() {
        reply(hub, sender, ServerMessage::error(NOT_CONNECTED)).await;
        return;
    }
    if req.message.is_empty() || req.contacts.is_empty() {
        reply(hub, sender, ServerMessage::error("Message and contact list are required.")).await;
        return;
    }
    if req.media.is_some() {
        reply(hub, sender, ServerMessage::error("Media sending is not supported.")).await;
        return;
    }

    let out = hub.broadcaster();
    let total = req.contacts.len();
    info!(total, "starting broadcast");
    let _ = out
        .broadcast(&ServerMessage::BroadcastStarted {
            message: req.message.clone(),
            total,
        })
        .await;

    let mut successful = 0;
    for (index, raw) in req.contacts.iter().enumerate() {
        let current = index + 1;
        let contact = ContactPayload::recipient(raw);
        let progress = match deliver(hub, raw, &req.message).await {
            Ok(()) => {
                successful += 1;
                ServerMessage::progress_ok(current, total, contact)
            }
            Err(error) => ServerMessage::progress_failed(current, total, contact, error),
        };
        let _ = out.broadcast(&progress).await;
        debug!(current, total, "broadcast progress");
    }

    let failed = total - successful;
    let _ = out
        .broadcast(&ServerMessage::BroadcastComplete {
            successful,
            failed,
            total,
        })
        .await;
    info!(successful, failed, "broadcast completed");
}

async fn deliver(hub: &Hub, raw: &str, body: &str) -> Result<(), String> {
    let jid = Jid::parse_contact(raw).map_err(|e| format!("invalid number format: {e}"))?;
    hub.transport()
        .send_text(&jid, body)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}
