//! Contact identifiers in the transport's `user@server` form.
//!
//! Clients send recipients either as full identifiers
//! (`6281234@s.whatsapp.net`, `6281234@c.us`) or as bare phone numbers
//! (`+62 812 34`). [`Jid::parse_contact`] normalises both into a [`Jid`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ContactIdError;

/// Server for individual user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Legacy user server used by WhatsApp Web clients.
pub const LEGACY_USER_SERVER: &str = "c.us";

/// Server for group chats.
pub const GROUP_SERVER: &str = "g.us";

/// A transport-level contact identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    /// Account part (usually the phone number in international form).
    pub user: String,
    /// Server part.
    pub server: String,
}

impl Jid {
    /// Build an identifier on an explicit server.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Build an identifier on [`DEFAULT_USER_SERVER`].
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    /// Whether this identifier points at an individual account.
    pub fn is_user(&self) -> bool {
        self.server == DEFAULT_USER_SERVER
    }

    /// Parse a client-supplied recipient.
    ///
    /// `user@server` inputs keep their server, except `c.us` which maps to
    /// [`DEFAULT_USER_SERVER`]. Anything else is treated as a phone number:
    /// trimmed, leading `+` removed, spaces dropped.
    pub fn parse_contact(raw: &str) -> Result<Self, ContactIdError> {
        if raw.is_empty() {
            return Err(ContactIdError::Empty);
        }

        if let Some((user, server)) = raw.split_once('@') {
            let user = user.trim();
            let server = server.trim();
            if user.is_empty() || server.is_empty() {
                return Err(ContactIdError::Malformed(raw.to_string()));
            }
            let server = if server == LEGACY_USER_SERVER {
                DEFAULT_USER_SERVER
            } else {
                server
            };
            return Ok(Self::new(user, server));
        }

        let normalized: String = raw
            .trim()
            .trim_start_matches('+')
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if normalized.is_empty() {
            return Err(ContactIdError::EmptyNumber);
        }
        Ok(Self::user(normalized))
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for Jid {
    type Err = ContactIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_contact(s)
    }
}

/// Render an account number the way local users read it (`62…` → `0…`).
pub fn format_number(user: &str) -> String {
    match user.strip_prefix("62") {
        Some(rest) => format!("0{rest}"),
        None => user.to_string(),
    }
}
