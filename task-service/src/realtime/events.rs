//! Event envelope shared between the task mutation layer and connected
//! clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Task;

/// Server-to-client frames.
///
/// Task events carry the full post-mutation record rather than a diff, so a
/// client that missed one event is consistent again after the next delivered
/// one. `task_deleted` carries the record's last state. There is no
/// replay/resync: a dropped event is unrecoverable short of a full reload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        org_id: Uuid,
        user_id: Uuid,
    },
    /// Liveness probe; the socket task sends this as a protocol Ping frame,
    /// never as JSON.
    Ping,
    /// Reply to a client-initiated ping.
    Pong,
    TaskCreated {
        org_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        task: Task,
    },
    TaskUpdated {
        org_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        task: Task,
    },
    TaskDeleted {
        org_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        task: Task,
    },
}

/// Client-to-server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;

    #[test]
    fn event_envelope_shape() {
        let org_id = Uuid::new_v4();
        let task = Task::new(org_id, "t".to_string(), None, TaskStatus::Todo, None, None);
        let event = ServerEvent::TaskCreated {
            org_id,
            user_id: None,
            task,
        };

        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&event).unwrap())
            .unwrap();
        assert_eq!(json["type"], "task_created");
        assert_eq!(json["org_id"], org_id.to_string());
        assert!(json["task"]["task_id"].is_string());
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn client_ping_parses() {
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        ));
    }
}
