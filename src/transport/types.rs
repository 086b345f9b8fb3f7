use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Lifecycle of the underlying hub connection as shown to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// An authenticated account as persisted by the REST layer. Timestamps
/// deserialize straight into the local representation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub organization: String,
    pub role: Role,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

/// Static room metadata. `channel_id` is empty until the room is opened on
/// the hub; `whiteboard_canvas` is the snapshot handed out on join.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: i64,
    pub category: i64,
    pub name: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub whiteboard_canvas: String,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

/// Room-wide moderation state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub global_mute: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub content: String,
}

/// The moderator of a room. Backed by a registered account; there is at most
/// one per room.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub video: bool,
    pub audio: bool,
    pub user: Account,
}

/// An anonymous participant. `name` stays a placeholder until the student
/// renames themselves; `permission` gates interactive actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub video: bool,
    pub audio: bool,
    pub name: String,
    #[serde(default)]
    pub hand_signal: bool,
    #[serde(default)]
    pub permission: bool,
}
