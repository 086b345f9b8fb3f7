use crate::transport::errors::ChannelError;
use crate::transport::types::{Account, Note};

/// Navigation targets the channel core can request from the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Home,
    Dashboard,
    Room(String),
}

/// External router collaborator; the core never renders views itself.
pub trait Router {
    fn navigate(&mut self, route: Route);
    fn current_route(&self) -> Route;
}

/// User-visible notification sink. The display mechanism is the host's
/// concern.
pub trait Alerts {
    fn info(&mut self, title: &str, message: Option<&str>);
    fn success(&mut self, title: &str, message: Option<&str>);
    fn danger(&mut self, title: &str, message: Option<&str>);
    fn error(&mut self, title: &str, detail: &str);
}

/// The authentication/session collaborator the core queries to decide
/// between moderator and anonymous flows.
pub trait AuthSession {
    fn is_logged_in(&self) -> bool;
    fn current_account(&self) -> Option<Account>;
}

/// Room-registry collaborator; keeps cached channel ids in sync with the
/// hub (assigned on open, cleared on room-closed).
pub trait RoomDirectory {
    fn set_channel_id(&mut self, room_id: i64, channel_id: &str);
}

/// REST collaborator for persisted notes.
pub trait NotesApi {
    fn fetch_notes(&self, room_id: i64, category_id: i64) -> Result<Vec<Note>, ChannelError>;
}

/// One local capture track. `enabled` mirrors the owner's video/audio
/// preference; `stopped` is terminal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaTrack {
    pub enabled: bool,
    pub stopped: bool,
}

impl MediaTrack {
    pub fn stop(&mut self) {
        self.stopped = true;
    }
}

/// The local capture: one video and one audio track.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalMedia {
    pub video: MediaTrack,
    pub audio: MediaTrack,
}

/// Handle to a remote participant's media, labeled with the signaling peer
/// it arrived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteStream {
    pub peer_id: String,
}

/// Local media acquisition (camera/microphone). Failure surfaces as
/// [`ChannelError::Media`]; timeout policy belongs to the implementation.
pub trait MediaCapture {
    fn acquire(&mut self) -> Result<LocalMedia, ChannelError>;
}

/// One signaling identity in the peer mesh.
pub trait PeerLink {
    fn peer_id(&self) -> &str;
    /// Calls the advertised remote peer with the local stream and returns
    /// the remote one.
    fn call(&mut self, remote_peer_id: &str, local: &LocalMedia)
        -> Result<RemoteStream, ChannelError>;
    /// Answers a pending inbound call with the local stream, if one arrived.
    fn try_accept(&mut self, local: &LocalMedia) -> Result<Option<RemoteStream>, ChannelError>;
}

/// Opens fresh signaling identities; one per directed mesh edge.
pub trait PeerConnector {
    fn open(&mut self) -> Result<Box<dyn PeerLink>, ChannelError>;
}

/// The collaborators injected into the session manager. Explicit
/// construction instead of process-wide singletons.
pub struct Services {
    pub router: Box<dyn Router>,
    pub alerts: Box<dyn Alerts>,
    pub auth: Box<dyn AuthSession>,
    pub rooms: Box<dyn RoomDirectory>,
    pub notes_api: Box<dyn NotesApi>,
    pub media: Box<dyn MediaCapture>,
    pub peers: Box<dyn PeerConnector>,
}
