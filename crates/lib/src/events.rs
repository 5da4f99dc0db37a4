//! Inbound event payload model: typed decode of the loosely-structured
//! callback mappings the platform pushes.
//!
//! Every event arrives as `{ "type": <kind>, "event": { ... } }` where the
//! nested object's required fields depend on the kind. Decoding validates the
//! required fields up front and returns a typed error on mismatch; it never
//! panics on arbitrary JSON.

use serde_json::Value;

/// The four event kinds the bot handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    AddBot,
    P2pChatCreate,
    AddUserToChat,
}

impl EventKind {
    /// All recognized kinds, in registration order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Message,
        EventKind::AddBot,
        EventKind::P2pChatCreate,
        EventKind::AddUserToChat,
    ];

    pub fn from_type(s: &str) -> Option<Self> {
        match s {
            "message" => Some(EventKind::Message),
            "add_bot" => Some(EventKind::AddBot),
            "p2p_chat_create" => Some(EventKind::P2pChatCreate),
            "add_user_to_chat" => Some(EventKind::AddUserToChat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::AddBot => "add_bot",
            EventKind::P2pChatCreate => "p2p_chat_create",
            EventKind::AddUserToChat => "add_user_to_chat",
        }
    }
}

/// Decode failure for an inbound callback mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// A required field is missing or has the wrong shape. The event is
    /// dropped; no reply is attempted.
    #[error("malformed {event_type} event: missing or invalid field {field}")]
    Malformed {
        event_type: &'static str,
        field: &'static str,
    },

    /// Event kind not in the registered set. Discarded silently.
    #[error("unrecognized event type: {0}")]
    Unrecognized(String),
}

/// Where a reply to a message should be addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationTarget {
    /// Group chat, addressed by open_chat_id.
    Group(String),
    /// Direct conversation, addressed by the sender's open_id.
    Direct(String),
}

/// A user's command message with its reply target resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Command text with the at-bot mention already stripped by the platform.
    pub text: String,
    pub target: ConversationTarget,
}

/// A user mentioned in a welcome-class event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeUser {
    pub open_id: String,
    pub user_id: String,
}

/// A welcome-class event (bot added, p2p chat created, user added to chat).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeEvent {
    /// Group conversation the greeting is sent to.
    pub chat_id: String,
    /// Users to greet, in the order the platform listed them. May be empty.
    pub users: Vec<WelcomeUser>,
}

/// A decoded inbound event, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(MessageEvent),
    Welcome(WelcomeEvent),
}

/// Look up a required string field on the nested event object.
fn required_str<'a>(
    event_type: &'static str,
    event: &'a Value,
    field: &'static str,
) -> Result<&'a str, EventError> {
    event
        .get(field)
        .and_then(Value::as_str)
        .ok_or(EventError::Malformed { event_type, field })
}

/// The nested `event` object of a callback mapping.
fn event_object<'a>(event_type: &'static str, raw: &'a Value) -> Result<&'a Value, EventError> {
    let event = raw.get("event").ok_or(EventError::Malformed {
        event_type,
        field: "event",
    })?;
    if !event.is_object() {
        return Err(EventError::Malformed {
            event_type,
            field: "event",
        });
    }
    Ok(event)
}

impl InboundEvent {
    /// Decode a raw callback mapping into a typed event. The kind is read
    /// from the top-level `type` field; required fields of the nested
    /// `event` object are validated per kind.
    pub fn decode(raw: &Value) -> Result<InboundEvent, EventError> {
        let typ = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EventError::Malformed {
                event_type: "unknown",
                field: "type",
            })?;
        let kind = EventKind::from_type(typ)
            .ok_or_else(|| EventError::Unrecognized(typ.to_string()))?;
        Self::decode_kind(kind, raw)
    }

    /// Decode a raw callback mapping whose kind is already known.
    pub fn decode_kind(kind: EventKind, raw: &Value) -> Result<InboundEvent, EventError> {
        let event_type = kind.as_str();
        let event = event_object(event_type, raw)?;
        match kind {
            EventKind::Message => {
                let chat_type = required_str(event_type, event, "chat_type")?;
                let text = required_str(event_type, event, "text_without_at_bot")?;
                let target = if chat_type == "group" {
                    ConversationTarget::Group(
                        required_str(event_type, event, "open_chat_id")?.to_string(),
                    )
                } else {
                    ConversationTarget::Direct(
                        required_str(event_type, event, "open_id")?.to_string(),
                    )
                };
                Ok(InboundEvent::Message(MessageEvent {
                    text: text.to_string(),
                    target,
                }))
            }
            EventKind::AddBot | EventKind::P2pChatCreate | EventKind::AddUserToChat => {
                let chat_id = required_str(event_type, event, "chat_id")?.to_string();
                // users is optional: absent or null means nobody to at-mention.
                let mut users = Vec::new();
                match event.get("users") {
                    None | Some(Value::Null) => {}
                    Some(Value::Array(list)) => {
                        for user in list {
                            users.push(WelcomeUser {
                                open_id: required_str(event_type, user, "open_id")?.to_string(),
                                user_id: required_str(event_type, user, "user_id")?.to_string(),
                            });
                        }
                    }
                    Some(_) => {
                        return Err(EventError::Malformed {
                            event_type,
                            field: "users",
                        })
                    }
                }
                Ok(InboundEvent::Welcome(WelcomeEvent { chat_id, users }))
            }
        }
    }
}
