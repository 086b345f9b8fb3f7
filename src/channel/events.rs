use crate::transport::types::{ConnState, RoomSettings};

/// Change notifications drained by the host UI. Snapshots are read from the
/// channel state; the queue only signals that something moved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    ConnectionState(ConnState),
    RosterChanged,
    SettingsChanged(RoomSettings),
    Error(String),
}
