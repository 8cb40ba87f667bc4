//! `get_contacts`

use std::time::Duration;

use tracing::warn;
use wahub_core::jid::format_number;
use wahub_core::protocol::{ContactPayload, ServerMessage};
use wahub_core::transport::Contact;

use super::{NOT_CONNECTED, reply};
use crate::hub::Hub;
use crate::websocket::connection::ConnectionId;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

pub(super) async fn get_contacts(hub: &Hub, sender: &ConnectionId) {
    let transport = hub.transport();
    if !transport.is_authenticated() {
        reply(hub, sender, ServerMessage::error(NOT_CONNECTED)).await;
        return;
    }

    let fetched = match tokio::time::timeout(FETCH_TIMEOUT, transport.contacts()).await {
        Ok(Ok(contacts)) => contacts,
        Ok(Err(e)) => {
            warn!(error = %e, "contact fetch failed");
            reply(hub, sender, ServerMessage::error(format!("failed to fetch contacts: {e}"))).await;
            return;
        }
        Err(_) => {
            warn!("contact fetch timed out");
            reply(
                hub,
                sender,
                ServerMessage::error(format!("failed to fetch contacts: timed out after {FETCH_TIMEOUT:?}")),
            )
            .await;
            return;
        }
    };

    let contacts = fetched.iter().filter(|c| c.jid.is_user()).map(to_payload).collect();
    reply(hub, sender, ServerMessage::Contacts { contacts }).await;
}

fn to_payload(contact: &Contact) -> ContactPayload {
    ContactPayload {
        id: contact.jid.to_string(),
        name: contact.display_name().map(str::to_string),
        number: format_number(&contact.jid.user),
        is_my_contact: true,
        is_from_csv: false,
    }
}
