//! `send_chat`

use chrono::Utc;
use tracing::warn;
use wahub_core::Jid;
use wahub_core::protocol::{ChatEntry, ChatRequest, ServerMessage};

use super::reply;
use crate::hub::Hub;
use crate::websocket::connection::ConnectionId;

pub(super) async fn send_chat(hub: &Hub, sender: &ConnectionId, req: ChatRequest) {
    if req.contact_id.is_empty() || req.message.is_empty() {
        reply(hub, sender, ServerMessage::error("contactId and message are required.")).await;
        return;
    }

    let transport = hub.transport();
    if transport.is_authenticated() {
        let sent = match Jid::parse_contact(&req.contact_id) {
            Ok(jid) => transport.send_text(&jid, &req.message).await.map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(format!("invalid number format: {e}")),
        };
        if let Err(error) = sent {
            warn!(contact = %req.contact_id, %error, "chat send failed");
            reply(hub, sender, ServerMessage::error(error)).await;
        }
    }

    let entry = ChatEntry {
        contact_id: req.contact_id.clone(),
        message: req.message,
        timestamp: Utc::now().to_rfc3339(),
    };
    let _ = hub
        .broadcaster()
        .broadcast(&ServerMessage::ChatMessage {
            contact_id: req.contact_id,
            message: entry,
        })
        .await;
}
