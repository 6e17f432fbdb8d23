//! Wire frames. A closed set of tagged variants, decoded once at the gateway
//! boundary and matched exhaustively.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::User;
use crate::rooms::membership::DenyReason;
use crate::rooms::msg::{Message, MessageKind};

/// Frames a client may send over an established connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    SendChat { payload: ChatPayload },
    // Reserved for ephemeral presence signaling.
    Typing,
}

#[derive(Debug, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(default)]
    pub message_type: MessageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Joined,
    Left,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReceivedPayload {
    pub message: Message,
    pub sender: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub message: String,
    pub sender: &'static str,
    pub sender_id: Uuid,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    ChatReceived {
        payload: ChatReceivedPayload,
    },
    GroupNotification {
        sub_type: NotificationKind,
        room_id: Uuid,
        payload: NotificationPayload,
    },
    JoinDenied {
        reason: String,
    },
    LeaveDenied {
        reason: String,
    },
    ChatDenied {
        reason: String,
    },
}

impl Outbound {
    pub fn chat_received(message: Message) -> Self {
        let sender = message.sender;
        Outbound::ChatReceived {
            payload: ChatReceivedPayload { message, sender },
        }
    }

    pub fn joined(room_id: Uuid, user: &User, newly_added: bool) -> Self {
        let text = if newly_added {
            format!("{} joined the room", user.username)
        } else {
            format!("{} is back online", user.username)
        };
        Self::notification(NotificationKind::Joined, room_id, text, user.id)
    }

    pub fn left(room_id: Uuid, user: &User) -> Self {
        let text = format!("{} left the room", user.username);
        Self::notification(NotificationKind::Left, room_id, text, user.id)
    }

    pub fn join_denied(reason: DenyReason) -> Self {
        Outbound::JoinDenied {
            reason: reason.as_str().to_owned(),
        }
    }

    pub fn leave_denied(reason: DenyReason) -> Self {
        Outbound::LeaveDenied {
            reason: reason.as_str().to_owned(),
        }
    }

    pub fn chat_denied(reason: DenyReason) -> Self {
        Outbound::ChatDenied {
            reason: reason.as_str().to_owned(),
        }
    }

    fn notification(
        sub_type: NotificationKind,
        room_id: Uuid,
        message: String,
        sender_id: Uuid,
    ) -> Self {
        Outbound::GroupNotification {
            sub_type,
            room_id,
            payload: NotificationPayload {
                message,
                sender: "system",
                sender_id,
            },
        }
    }
}
