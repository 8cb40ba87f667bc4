//! Routing of decoded client commands to hub operations.
//!
//! Replies meant for the issuing client are unicast; progress and state
//! changes are broadcast to everyone.

mod account;
mod broadcast;
mod chat;
mod contacts;
mod schedule;

use metrics::counter;
use tracing::debug;
use wahub_core::protocol::{ClientCommand, ServerMessage};

use crate::hub::Hub;
use crate::metrics::COMMANDS_TOTAL;
use crate::websocket::connection::ConnectionId;

/// Reply used when a command needs an authenticated transport.
pub const NOT_CONNECTED: &str = "WhatsApp is not connected.";

/// Decode one text frame and run the command it names.
///
/// Decode failures are reported to the sender only.
pub async fn dispatch(hub: &Hub, sender: &ConnectionId, text: &str) {
    let command = match ClientCommand::decode(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(conn_id = %sender, error = %e, "rejected client frame");
            counter!(COMMANDS_TOTAL, "command" => "invalid").increment(1);
            reply(hub, sender, ServerMessage::error(e.to_string())).await;
            return;
        }
    };

    let name = command.name();
    counter!(COMMANDS_TOTAL, "command" => name).increment(1);
    debug!(conn_id = %sender, command = name, "handling command");

    match command {
        ClientCommand::GetContacts => contacts::get_contacts(hub, sender).await,
        ClientCommand::SendBroadcast(req) => broadcast::send_broadcast(hub, sender, req).await,
        ClientCommand::SendChat(req) => chat::send_chat(hub, sender, req).await,
        ClientCommand::ScheduleMessage(req) => schedule::schedule_message(hub, sender, req).await,
        ClientCommand::GetScheduled => schedule::get_scheduled(hub).await,
        ClientCommand::Logout => account::logout(hub, sender).await,
    }
}

async fn reply(hub: &Hub, sender: &ConnectionId, msg: ServerMessage) {
    let _ = hub.broadcaster().unicast(sender, &msg).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain_json, hub_with, open_connection};
    use std::sync::Arc;
    use wahub_core::transport::mock::MockTransport;

    #[tokio::test]
    async fn malformed_json_is_reported_to_sender_only() {
        let hub = hub_with(Arc::new(MockTransport::new()));
        let (a, mut ra) = open_connection("a");
        let (b, mut rb) = open_connection("b");
        let _ = hub.registry().register(a);
        let _ = hub.registry().register(b);

        dispatch(&hub, &"a".into(), "{not json").await;
        let frames = drain_json(&mut ra);
        assert_eq!(frames[0]["type"], "error");
        assert!(frames[0]["message"].as_str().unwrap().starts_with("invalid payload: "));
        assert!(drain_json(&mut rb).is_empty());
    }

    #[tokio::test]
    async fn unknown_command_names_the_type() {
        let hub = hub_with(Arc::new(MockTransport::new()));
        let (a, mut ra) = open_connection("a");
        let _ = hub.registry().register(a);

        dispatch(&hub, &"a".into(), r#"{"type":"dance"}"#).await;
        assert_eq!(drain_json(&mut ra)[0]["message"], "unknown command: dance");
    }

    #[tokio::test]
    async fn type_is_case_insensitive() {
        let hub = hub_with(Arc::new(MockTransport::new()));
        let (a, mut ra) = open_connection("a");
        let _ = hub.registry().register(a);

        dispatch(&hub, &"a".into(), r#"{"type":"GET_SCHEDULED"}"#).await;
        assert_eq!(drain_json(&mut ra)[0]["type"], "scheduled_messages");
    }

    #[tokio::test]
    async fn reply_to_departed_sender_is_dropped() {
        let hub = hub_with(Arc::new(MockTransport::new()));
        dispatch(&hub, &"gone".into(), "nope").await;
        assert!(hub.registry().is_empty());
    }
}
