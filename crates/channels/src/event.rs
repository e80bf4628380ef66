//! Inbound event model shared by every adapter.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Conversation category an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One-to-one conversation with a user.
    Private,
    /// Group chat.
    Group,
    /// Channel inside a guild/server.
    Guild,
    /// Direct message inside a guild platform.
    Direct,
}

impl Scope {
    pub const ALL: &'static [Scope] = &[Self::Private, Self::Group, Self::Guild, Self::Direct];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Guild => "guild",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            "guild" => Ok(Self::Guild),
            "direct" => Ok(Self::Direct),
            other => Err(Error::invalid_input(format!("unknown scope '{other}'"))),
        }
    }
}

/// Who sent an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Where a reply to an inbound message should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub scope: Scope,
    /// Conversation id: user id for private/direct, group or channel id otherwise.
    pub conversation_id: String,
    /// Guild the conversation belongs to, for guild/direct scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    /// Message to quote in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

/// A normalized inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: String,
    pub scope: Scope,
    pub sender: Sender,
    pub target: ReplyTarget,
    /// Message text as received, before any command parsing.
    pub raw_message: String,
}

impl MessageEvent {
    /// Build a private-chat event; mostly useful for adapters without
    /// conversation ids and for tests.
    pub fn private(user_id: impl Into<String>, raw_message: impl Into<String>) -> Self {
        Self::new(Scope::Private, user_id, raw_message)
    }

    /// Build an event in `scope`, using the sender id as conversation id.
    pub fn new(
        scope: Scope,
        user_id: impl Into<String>,
        raw_message: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            scope,
            sender: Sender {
                user_id: user_id.clone(),
                nickname: None,
            },
            target: ReplyTarget {
                scope,
                conversation_id: user_id,
                guild_id: None,
                reply_to_id: None,
            },
            raw_message: raw_message.into(),
        }
    }

    /// Re-target the event at a group/guild conversation.
    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.target.conversation_id = conversation_id.into();
        self
    }
}
