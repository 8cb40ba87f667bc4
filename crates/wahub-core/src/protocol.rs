//! Client envelope protocol.
//!
//! Every frame exchanged with a hub client is a JSON object discriminated by
//! a `type` field. Inbound frames decode into [`ClientCommand`]; outbound
//! frames are built from [`ServerMessage`]. Unknown fields are ignored in
//! both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Media attachment on a broadcast request (rejected by the hub).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaAttachment {
    /// Base64 payload.
    pub data: String,
    /// MIME type.
    pub mimetype: String,
    /// Original file name.
    pub filename: String,
}

/// `send_broadcast` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BroadcastRequest {
    /// Text body.
    pub message: String,
    /// Recipients, in delivery order.
    pub contacts: Vec<String>,
    /// Optional media, which is not supported.
    pub media: Option<MediaAttachment>,
}

/// `send_chat` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatRequest {
    /// Recipient.
    pub contact_id: String,
    /// Text body.
    pub message: String,
}

/// Recurrence descriptor attached to a schedule request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecurringConfig {
    /// Repeat interval label (`daily`, `weekly`, ...).
    pub interval: String,
    /// Last occurrence, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// `schedule_message` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleRequest {
    /// Text body.
    pub message: String,
    /// Recipients, in delivery order.
    pub contacts: Vec<String>,
    /// RFC 3339 trigger time.
    pub date_time: String,
    /// Whether the client asked for a repeating job.
    pub is_recurring: bool,
    /// Repeat settings.
    pub recurring_config: Option<RecurringConfig>,
}

/// A decoded inbound command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// List the transport's contact directory.
    GetContacts,
    /// Fan one text out to many recipients.
    SendBroadcast(BroadcastRequest),
    /// Send one text to one recipient.
    SendChat(ChatRequest),
    /// Queue a deferred send.
    ScheduleMessage(ScheduleRequest),
    /// List pending deferred sends.
    GetScheduled,
    /// End the transport session.
    Logout,
}

/// Why an inbound frame could not become a [`ClientCommand`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or a known command with the wrong field shapes.
    #[error("invalid payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Structurally fine, but the discriminator names no command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

fn malformed(reason: &str) -> DecodeError {
    DecodeError::Malformed(serde::de::Error::custom(reason))
}

impl ClientCommand {
    /// Decode a text frame. The `type` discriminator is matched case-insensitively.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(fields) = value.as_object() else {
            return Err(malformed("expected a JSON object"));
        };
        let kind = match fields.get("type") {
            None => String::new(),
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(malformed("`type` must be a string")),
        };

        match kind.to_ascii_lowercase().as_str() {
            "get_contacts" => Ok(Self::GetContacts),
            "send_broadcast" => Ok(Self::SendBroadcast(serde_json::from_value(value)?)),
            "send_chat" => Ok(Self::SendChat(serde_json::from_value(value)?)),
            "schedule_message" => Ok(Self::ScheduleMessage(serde_json::from_value(value)?)),
            "get_scheduled" => Ok(Self::GetScheduled),
            "logout" => Ok(Self::Logout),
            _ => Err(DecodeError::UnknownCommand(kind)),
        }
    }

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetContacts => "get_contacts",
            Self::SendBroadcast(_) => "send_broadcast",
            Self::SendChat(_) => "send_chat",
            Self::ScheduleMessage(_) => "schedule_message",
            Self::GetScheduled => "get_scheduled",
            Self::Logout => "logout",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// A contact as presented to clients.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    /// Identifier as the client knows it.
    pub id: String,
    /// Display name, when the directory has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-readable number.
    pub number: String,
    /// Whether the contact is in the account's address book.
    pub is_my_contact: bool,
    /// Whether the contact came from a client-side import.
    #[serde(rename = "isFromCSV")]
    pub is_from_csv: bool,
}

impl ContactPayload {
    /// Payload echoing a raw recipient string back to clients.
    pub fn recipient(raw: &str) -> Self {
        Self {
            id: raw.to_string(),
            name: None,
            number: raw.to_string(),
            is_my_contact: true,
            is_from_csv: false,
        }
    }
}

/// One chat line relayed to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    /// Other side of the conversation.
    pub contact_id: String,
    /// Text body.
    pub message: String,
    /// RFC 3339 time the hub saw the message.
    pub timestamp: String,
}

/// A pending deferred send as listed to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    /// Hub-assigned identifier.
    pub id: String,
    /// Text body.
    pub message: String,
    /// Recipients, in delivery order.
    pub contacts: Vec<String>,
    /// Trigger time as submitted.
    pub date_time: String,
    /// Whether the client asked for a repeating job.
    pub is_recurring: bool,
    /// Repeat settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_config: Option<RecurringConfig>,
}

/// Outbound notification, serialized with a `type` discriminator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The transport finished pairing.
    Authenticated,
    /// The transport session is usable.
    Ready,
    /// A pairing artifact to render as a QR code.
    QrCode {
        /// Artifact contents.
        qr: String,
    },
    /// The transport session ended.
    Disconnected {
        /// Reason shown to the user.
        message: String,
    },
    /// A failure report.
    Error {
        /// Reason shown to the user.
        message: String,
    },
    /// Contact directory listing.
    Contacts {
        /// Directory entries.
        contacts: Vec<ContactPayload>,
    },
    /// A broadcast batch began.
    BroadcastStarted {
        /// Text body.
        message: String,
        /// Number of recipients.
        total: usize,
    },
    /// One broadcast recipient finished.
    BroadcastProgress {
        /// 1-based position in the batch.
        current: usize,
        /// Number of recipients.
        total: usize,
        /// The recipient.
        contact: ContactPayload,
        /// Present and `true` on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        /// Present on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A broadcast batch ended.
    BroadcastComplete {
        /// Recipients that accepted the send.
        successful: usize,
        /// Recipients that did not.
        failed: usize,
        /// Number of recipients.
        total: usize,
    },
    /// A chat line was sent or received.
    ChatMessage {
        /// Other side of the conversation.
        #[serde(rename = "contactId")]
        contact_id: String,
        /// The line itself.
        message: ChatEntry,
    },
    /// A deferred send was queued.
    ScheduleSuccess {
        /// Confirmation text.
        message: String,
    },
    /// Pending deferred sends.
    ScheduledMessages {
        /// Queue contents.
        messages: Vec<ScheduledMessage>,
    },
    /// A deferred send fired.
    ScheduledSent {
        /// Text body.
        message: String,
        /// Recipients that accepted the send.
        successful: usize,
        /// Recipients that did not.
        failed: usize,
    },
}

impl ServerMessage {
    /// Build an `error` envelope.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Build a `disconnected` envelope.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    /// Successful `broadcast_progress` entry.
    pub fn progress_ok(current: usize, total: usize, contact: ContactPayload) -> Self {
        Self::BroadcastProgress {
            current,
            total,
            contact,
            success: Some(true),
            error: None,
        }
    }

    /// Failed `broadcast_progress` entry.
    pub fn progress_failed(
        current: usize,
        total: usize,
        contact: ContactPayload,
        error: impl Into<String>,
    ) -> Self {
        Self::BroadcastProgress {
            current,
            total,
            contact,
            success: None,
            error: Some(error.into()),
        }
    }

    /// Wire name of the notification.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::QrCode { .. } => "qr_code",
            Self::Disconnected { .. } => "disconnected",
            Self::Error { .. } => "error",
            Self::Contacts { .. } => "contacts",
            Self::BroadcastStarted { .. } => "broadcast_started",
            Self::BroadcastProgress { .. } => "broadcast_progress",
            Self::BroadcastComplete { .. } => "broadcast_complete",
            Self::ChatMessage { .. } => "chat_message",
            Self::ScheduleSuccess { .. } => "schedule_success",
            Self::ScheduledMessages { .. } => "scheduled_messages",
            Self::ScheduledSent { .. } => "scheduled_sent",
        }
    }
}
