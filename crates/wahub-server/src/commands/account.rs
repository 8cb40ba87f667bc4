//! `logout`

use tracing::{info, warn};
use wahub_core::protocol::ServerMessage;

use super::reply;
use crate::hub::Hub;
use crate::websocket::connection::ConnectionId;

pub(super) async fn logout(hub: &Hub, sender: &ConnectionId) {
    let transport = hub.transport();
    if !transport.is_authenticated() {
        return;
    }
    match transport.logout().await {
        Ok(()) => info!(conn_id = %sender, "transport logged out by client"),
        Err(e) => {
            warn!(error = %e, "logout failed");
            reply(hub, sender, ServerMessage::error(format!("logout failed: {e}"))).await;
        }
    }
}
