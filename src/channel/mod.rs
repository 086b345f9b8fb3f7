pub mod config;
pub mod events;
pub mod notes;
pub mod services;
pub mod session;
pub mod state;
pub mod webcam;
pub mod whiteboard;
pub mod wire;

pub use config::{HubConfig, DEFAULT_PORT, PLACEHOLDER_NAME};
pub use events::ChannelEvent;
pub use notes::Notes;
pub use services::{
    Alerts, AuthSession, LocalMedia, MediaCapture, MediaTrack, NotesApi, PeerConnector, PeerLink,
    RemoteStream, RoomDirectory, Route, Router, Services,
};
pub use session::ChannelSession;
pub use state::{ChannelState, RosterUser};
pub use webcam::Webcam;
pub use whiteboard::Whiteboard;
#[cfg(not(feature = "coverage"))]
pub use wire::tls_connect;
pub use wire::{
    BlockingHubTransport, ClientEvent, ClientFrame, EventCodec, HubConnector, HubFrame,
    HubSession, ServerEvent, SharedHub, SocketHubConnector,
};
