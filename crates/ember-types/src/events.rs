use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;

/// Events sent over the WebSocket gateway. Everything except PresenceUpdate
/// is targeted at a single user; delivery is best-effort, the REST API
/// remains the source of truth and clients re-sync from it on reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    #[serde(rename_all = "camelCase")]
    Ready { user_id: Uuid },

    /// A new message arrived for the receiver.
    MessageCreate { message: MessageResponse },

    /// The counterpart read the conversation.
    #[serde(rename_all = "camelCase")]
    ConversationRead { reader_id: Uuid },

    /// A mutual like just completed; sent to both parties.
    #[serde(rename_all = "camelCase")]
    MatchCreate {
        user_id: Uuid,
        first_name: String,
        photo_url: Option<String>,
    },

    /// The other party severed the match.
    #[serde(rename_all = "camelCase")]
    Unmatched { user_id: Uuid },

    /// A matched user started typing.
    #[serde(rename_all = "camelCase")]
    TypingStart { user_id: Uuid },

    /// A user came online or went offline.
    #[serde(rename_all = "camelCase")]
    PresenceUpdate { user_id: Uuid, online: bool },
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection.
    Identify { token: String },

    /// Indicate typing to a matched peer.
    #[serde(rename_all = "camelCase")]
    StartTyping { peer_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_format() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"identify","data":{"token":"abc"}}"#).unwrap();
        match cmd {
            GatewayCommand::Identify { token } => assert_eq!(token, "abc"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn event_tags_are_camel_case() {
        let event = GatewayEvent::PresenceUpdate {
            user_id: Uuid::nil(),
            online: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"presenceUpdate""#), "{json}");
        assert!(json.contains(r#""userId""#), "{json}");
    }
}
