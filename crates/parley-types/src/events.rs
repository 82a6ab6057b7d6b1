use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
///
/// Message pushes are content-free: clients that care about a conversation
/// refetch it over HTTP. The push is a doorbell, not a delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A new message was posted to a conversation
    MessageNew { conversation_id: Uuid },

    /// The receiving user was added to a conversation
    ConversationJoined { conversation_id: Uuid },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },
}

impl GatewayEvent {
    /// Returns the conversation_id if this event is scoped to a specific
    /// conversation. Events that return `None` are global and should be
    /// delivered to all clients.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageNew { conversation_id } => Some(*conversation_id),
            // Ready, ConversationJoined, PresenceUpdate are global or targeted
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to events for specific conversations.
    /// The server will only forward conversation-scoped events for
    /// conversations the client has subscribed to.
    Subscribe { conversation_ids: Vec<Uuid> },
}
