pub mod errors;
pub mod types;

pub use errors::{ChannelError, JoinError};
pub use types::{Account, ConnState, Note, Role, Room, RoomSettings, Student, Teacher};
