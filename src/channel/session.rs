use std::cell::RefCell;
use std::rc::Rc;

use serde::Deserialize;

use crate::channel::config::{HubConfig, PLACEHOLDER_NAME};
use crate::channel::events::ChannelEvent;
use crate::channel::notes::Notes;
use crate::channel::services::{Route, Services};
use crate::channel::state::ChannelState;
use crate::channel::webcam::Webcam;
use crate::channel::whiteboard::Whiteboard;
use crate::channel::wire::{ack_error, ClientEvent, HubConnector, ServerEvent, SharedHub};
use crate::transport::errors::{ChannelError, JoinError};
use crate::transport::types::{Account, ConnState, Room, RoomSettings, Student, Teacher};

/// Acknowledgement payload for an open-room request. The hub returns the
/// opened room with its freshly assigned channel id.
#[derive(Debug, Deserialize)]
struct OpenRoomAck {
    room: Room,
}

/// Acknowledgement payload for a join request: the room plus the roster and
/// settings as of the join, the joining participant included. Fields the hub
/// adds beyond these are ignored.
#[derive(Debug, Deserialize)]
struct JoinRoomAck {
    room: Room,
    #[serde(default)]
    teacher: Option<Teacher>,
    #[serde(default)]
    students: Vec<Student>,
    #[serde(default)]
    settings: RoomSettings,
}

/// The channel session manager. Owns the hub connection, the channel state
/// and the sub-sessions (notes, whiteboard, webcam mesh), and translates
/// between user intents and hub traffic.
///
/// Single-threaded by construction. The host drives it: call an operation,
/// then `pump` regularly to apply hub pushes, then drain `take_events` and
/// re-render from `state`.
pub struct ChannelSession {
    config: HubConfig,
    connector: Box<dyn HubConnector>,
    services: Services,
    hub: Option<SharedHub>,
    state: ChannelState,
    conn_state: ConnState,
    events: Vec<ChannelEvent>,
    notes: Option<Notes>,
    whiteboard: Option<Whiteboard>,
    webcam: Option<Webcam>,
}

impl ChannelSession {
    pub fn new(config: HubConfig, connector: Box<dyn HubConnector>, services: Services) -> Self {
        Self {
            config,
            connector,
            services,
            hub: None,
            state: ChannelState::new(),
            conn_state: ConnState::Disconnected,
            events: Vec::new(),
            notes: None,
            whiteboard: None,
            webcam: None,
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn conn_state(&self) -> ConnState {
        self.conn_state
    }

    /// Drains the queued change notifications.
    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn notes(&self) -> Option<&Notes> {
        self.notes.as_ref()
    }

    pub fn notes_mut(&mut self) -> Option<&mut Notes> {
        self.notes.as_mut()
    }

    pub fn whiteboard(&self) -> Option<&Whiteboard> {
        self.whiteboard.as_ref()
    }

    pub fn whiteboard_mut(&mut self) -> Option<&mut Whiteboard> {
        self.whiteboard.as_mut()
    }

    pub fn webcam(&self) -> Option<&Webcam> {
        self.webcam.as_ref()
    }

    /// Establishes the hub connection. A no-op while one is live; a failed
    /// attempt leaves the session in the error state and may be retried.
    pub fn connect(&mut self) -> Result<(), ChannelError> {
        if self.hub.is_some() {
            return Ok(());
        }
        if self.config.server.is_empty() {
            return Err(ChannelError::InvalidConfig(
                "hub server is not set".to_string(),
            ));
        }
        self.set_conn_state(ConnState::Connecting);
        match self.connector.connect(&self.config) {
            Ok(session) => {
                log::info!(
                    "connected to hub {}:{} as {}",
                    self.config.server,
                    self.config.port,
                    session.client_id()
                );
                self.hub = Some(Rc::new(RefCell::new(session)));
                self.set_conn_state(ConnState::Connected);
                Ok(())
            }
            Err(err) => {
                log::warn!("hub connection failed: {}", err);
                self.set_conn_state(ConnState::Error);
                self.events.push(ChannelEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Opens a room on the hub as its moderator and enters it. The caller is
    /// the only teacher; the roster starts empty.
    pub fn open(&mut self, user: &Account, room: &Room) -> Result<(), ChannelError> {
        self.connect()?;
        let hub = self.hub()?;
        let data = hub.borrow_mut().request(ClientEvent::OpenRoom {
            user_id: user.id,
            room_id: room.id,
        })?;
        if let Some(reason) = ack_error(&data) {
            self.leave();
            return Err(ChannelError::JoinRejected(reason));
        }
        let ack: OpenRoomAck = serde_json::from_value(data)?;
        let client_id = hub.borrow().client_id().to_string();
        log::info!("opened room {} on channel {}", ack.room.id, ack.room.channel_id);

        self.state.connected = true;
        self.state.channel_id = ack.room.channel_id.clone();
        self.state.client_id = client_id.clone();
        self.state.teacher = Some(Teacher {
            id: client_id,
            video: true,
            audio: true,
            user: user.clone(),
        });
        self.state.students = Vec::new();
        self.state.has_name = true;
        self.state.settings = RoomSettings::default();
        self.whiteboard = Some(Whiteboard::new(
            Rc::clone(&hub),
            ack.room.whiteboard_canvas.clone(),
        ));
        self.services
            .rooms
            .set_channel_id(ack.room.id, &ack.room.channel_id);
        let channel_id = ack.room.channel_id.clone();
        self.state.room = Some(ack.room);
        self.events.push(ChannelEvent::RosterChanged);
        self.services.router.navigate(Route::Room(channel_id));
        Ok(())
    }

    /// Rejoins an open room as its moderator. Requires a logged-in account.
    pub fn join_as_teacher(&mut self, channel_id: &str) -> Result<(), ChannelError> {
        let account = self
            .services
            .auth
            .current_account()
            .ok_or(ChannelError::JoinRejected(JoinError::NotAuthorized))?;
        self.join(
            channel_id,
            ClientEvent::JoinRoomAsTeacher {
                channel_id: channel_id.to_string(),
                user_id: account.id,
            },
            true,
        )
    }

    /// Joins a room anonymously. The hub sees a placeholder name until the
    /// student renames themselves with [`ChannelSession::change_name`].
    pub fn join_as_student(
        &mut self,
        channel_id: &str,
        password: Option<String>,
    ) -> Result<(), ChannelError> {
        self.join(
            channel_id,
            ClientEvent::JoinRoomAsStudent {
                channel_id: channel_id.to_string(),
                name: PLACEHOLDER_NAME.to_string(),
                password,
            },
            false,
        )
    }

    fn join(
        &mut self,
        channel_id: &str,
        event: ClientEvent,
        has_name: bool,
    ) -> Result<(), ChannelError> {
        self.connect()?;
        let hub = self.hub()?;
        let data = hub.borrow_mut().request(event)?;
        if let Some(reason) = ack_error(&data) {
            self.leave();
            return Err(ChannelError::JoinRejected(reason));
        }
        let ack: JoinRoomAck = serde_json::from_value(data)?;
        log::info!("joined channel {}", channel_id);

        self.state.connected = true;
        self.state.channel_id = channel_id.to_string();
        self.state.client_id = hub.borrow().client_id().to_string();
        self.state.teacher = ack.teacher;
        self.state.students = ack.students;
        self.state.has_name = has_name;
        self.state.settings = ack.settings;
        self.whiteboard = Some(Whiteboard::new(
            Rc::clone(&hub),
            ack.room.whiteboard_canvas.clone(),
        ));
        self.state.room = Some(ack.room);
        self.events.push(ChannelEvent::RosterChanged);
        self.services
            .router
            .navigate(Route::Room(channel_id.to_string()));
        Ok(())
    }

    /// Replaces the placeholder name. Applied optimistically; the hub echoes
    /// the rename to everyone else.
    pub fn change_name(&mut self, name: &str) -> Result<(), ChannelError> {
        self.hub()?.borrow_mut().request(ClientEvent::ChangeName {
            name: name.to_string(),
        })?;
        let client_id = self.state.client_id.clone();
        if let Ok(student) = self.state.student_by_id_mut(&client_id) {
            student.name = name.to_string();
        }
        self.state.has_name = true;
        self.events.push(ChannelEvent::RosterChanged);
        Ok(())
    }

    /// Leaves the channel and releases everything: connection, roster, media
    /// and sub-sessions. Safe to call at any time, in any order.
    pub fn leave(&mut self) {
        if let Some(hub) = self.hub.take() {
            hub.borrow_mut().close();
        }
        if let Some(mut webcam) = self.webcam.take() {
            webcam.stop();
        }
        self.notes = None;
        self.whiteboard = None;
        self.state.reset();
        self.set_conn_state(ConnState::Disconnected);
    }

    /// Full shutdown, for hosts tearing the application down. Behaves like
    /// a leave; the hub observes the transport closing.
    pub fn close(&mut self) {
        self.leave();
    }

    /// Closes the room for everyone, then leaves. Moderator-only: the hub
    /// broadcasts the closure to the remaining participants.
    pub fn leave_as_teacher(&mut self) -> Result<(), ChannelError> {
        self.hub()?.borrow_mut().send(ClientEvent::LeaveRoom)?;
        self.leave();
        Ok(())
    }

    /// Raises or lowers the caller's hand. Students only; the moderator has
    /// no hand-signal slot in the roster.
    pub fn toggle_hand_signal(&mut self) -> Result<(), ChannelError> {
        let client_id = self.state.client_id.clone();
        let hand_signal = {
            let student = self.state.student_by_id_mut(&client_id)?;
            student.hand_signal = !student.hand_signal;
            student.hand_signal
        };
        self.hub()?
            .borrow_mut()
            .send(ClientEvent::UpdateHandSignal { hand_signal })?;
        self.events.push(ChannelEvent::RosterChanged);
        Ok(())
    }

    /// Flips a student's interaction permission. Applied optimistically; the
    /// hub notifies the student.
    pub fn update_permission(&mut self, student_id: &str) -> Result<(), ChannelError> {
        let permission = {
            let student = self.state.student_by_id_mut(student_id)?;
            student.permission = !student.permission;
            student.permission
        };
        self.hub()?.borrow_mut().send(ClientEvent::UpdatePermission {
            student_id: student_id.to_string(),
            permission,
        })?;
        self.events.push(ChannelEvent::RosterChanged);
        Ok(())
    }

    /// Flips the room-wide mute. Turning it on silences every student in the
    /// local roster immediately; the hub fans the change out.
    pub fn toggle_global_mute(&mut self) -> Result<(), ChannelError> {
        self.state.settings.global_mute = !self.state.settings.global_mute;
        let settings = self.state.settings.clone();
        self.hub()?
            .borrow_mut()
            .send(ClientEvent::UpdateSettings(settings.clone()))?;
        if settings.global_mute {
            self.state.mute_all_students();
            self.events.push(ChannelEvent::RosterChanged);
        }
        self.events.push(ChannelEvent::SettingsChanged(settings));
        Ok(())
    }

    /// Flips the caller's own camera flag and broadcasts both flags.
    pub fn toggle_video(&mut self) -> Result<(), ChannelError> {
        let (video, audio) = {
            let user = self.state.current_user()?;
            (!user.video(), user.audio())
        };
        self.update_own_media(video, audio)
    }

    /// Flips the caller's own microphone flag and broadcasts both flags.
    pub fn toggle_audio(&mut self) -> Result<(), ChannelError> {
        let (video, audio) = {
            let user = self.state.current_user()?;
            (user.video(), !user.audio())
        };
        self.update_own_media(video, audio)
    }

    fn update_own_media(&mut self, video: bool, audio: bool) -> Result<(), ChannelError> {
        let client_id = self.state.client_id.clone();
        self.state.set_media_flags(&client_id, video, audio);
        match &mut self.webcam {
            Some(webcam) => webcam.set_enabled(video, audio)?,
            None => self
                .hub()?
                .borrow_mut()
                .send(ClientEvent::UpdateWebcam { video, audio })?,
        }
        self.events.push(ChannelEvent::RosterChanged);
        Ok(())
    }

    /// Fetches the persisted notes and opens the shared notes session. A
    /// no-op once loaded.
    pub fn load_notes(&mut self) -> Result<(), ChannelError> {
        if self.notes.is_some() {
            return Ok(());
        }
        let (room_id, category_id) = {
            let room = self
                .state
                .room
                .as_ref()
                .ok_or_else(|| ChannelError::Protocol("no room joined".to_string()))?;
            (room.id, room.category)
        };
        let hub = self.hub()?;
        let notes = Notes::load(self.services.notes_api.as_ref(), hub, room_id, category_id)?;
        self.notes = Some(notes);
        Ok(())
    }

    /// Acquires local capture and advertises a mesh link to every other
    /// participant. A no-op once loaded; a capture failure leaves the mesh
    /// unloaded and the channel otherwise usable.
    pub fn load_webcams(&mut self) -> Result<(), ChannelError> {
        if self.webcam.is_some() {
            return Ok(());
        }
        let (video, audio) = {
            let user = self.state.current_user()?;
            (user.video(), user.audio())
        };
        let others: Vec<String> = self
            .state
            .other_users()
            .iter()
            .map(|user| user.id().to_string())
            .collect();
        let hub = self.hub()?;
        let webcam = Webcam::load(
            hub,
            self.services.media.as_mut(),
            self.services.peers.as_mut(),
            video,
            audio,
            &others,
        )?;
        self.webcam = Some(webcam);
        Ok(())
    }

    /// Applies everything the hub pushed since the last call, then answers
    /// pending mesh calls. An unsolicited transport loss tears the session
    /// down and redirects silently; it is not an error to the caller.
    pub fn pump(&mut self) -> Result<(), ChannelError> {
        let hub = match &self.hub {
            Some(hub) => Rc::clone(hub),
            None => return Ok(()),
        };
        loop {
            let polled = hub.borrow_mut().poll();
            match polled {
                Ok(Some(event)) => self.dispatch(event)?,
                Ok(None) => break,
                Err(ChannelError::Disconnected) => {
                    self.handle_transport_disconnect();
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        if let Some(webcam) = &mut self.webcam {
            webcam.poll_calls()?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: ServerEvent) -> Result<(), ChannelError> {
        match event {
            ServerEvent::Exception { message } => {
                log::warn!("hub exception: {}", message);
                self.services.alerts.error("Server error", &message);
                self.events.push(ChannelEvent::Error(message));
            }
            ServerEvent::RoomClosed { id } => self.handle_room_closed(id),
            ServerEvent::WebcamConnect { user_id, peer_id } => {
                if let Some(webcam) = &mut self.webcam {
                    webcam.handle_connect(self.services.peers.as_mut(), &user_id, &peer_id)?;
                }
            }
            ServerEvent::PermissionUpdated { ref id, permission } => {
                // A permission push for an unknown student means the roster
                // diverged; surface it instead of guessing.
                self.state.student_by_id(id)?;
                self.state.apply(&event);
                if self.state.is_self(id) {
                    if permission {
                        self.services
                            .alerts
                            .info("Permission granted", Some("You now have access."));
                    } else {
                        self.services
                            .alerts
                            .info("Permission revoked", Some("You no longer have access."));
                    }
                }
                self.events.push(ChannelEvent::RosterChanged);
            }
            ServerEvent::SettingsUpdated(settings) => self.handle_settings_updated(settings),
            ServerEvent::NoteAdded(_)
            | ServerEvent::NoteUpdated { .. }
            | ServerEvent::NoteDeleted { .. } => {
                if let Some(notes) = &mut self.notes {
                    notes.apply(&event);
                }
            }
            ServerEvent::WhiteboardChanged { canvas } => {
                if let Some(whiteboard) = &mut self.whiteboard {
                    whiteboard.apply(canvas);
                }
            }
            other => {
                if self.state.apply(&other) {
                    self.events.push(ChannelEvent::RosterChanged);
                }
            }
        }
        Ok(())
    }

    fn handle_settings_updated(&mut self, settings: RoomSettings) {
        let was_muted = self.state.settings.global_mute;
        self.state.settings = settings.clone();
        if settings.global_mute && !was_muted {
            let muted = self.state.mute_all_students();
            let muted_self = muted.iter().any(|id| self.state.is_self(id));
            if muted_self {
                if let Some(webcam) = &mut self.webcam {
                    webcam.disable_audio();
                }
                self.services
                    .alerts
                    .info("Muted", Some("The teacher muted all students."));
            } else {
                self.services
                    .alerts
                    .info("Global mute enabled", Some("All students are muted."));
            }
            self.events.push(ChannelEvent::RosterChanged);
        } else if !settings.global_mute && was_muted {
            self.services.alerts.info("Global mute disabled", None);
        }
        self.events.push(ChannelEvent::SettingsChanged(settings));
    }

    fn handle_room_closed(&mut self, room_id: i64) {
        // The cached channel id is stale whether or not we are in the room.
        self.services.rooms.set_channel_id(room_id, "");
        let in_room =
            self.state.connected && self.state.room.as_ref().map(|room| room.id) == Some(room_id);
        if !in_room {
            return;
        }
        let owner = self
            .state
            .teacher
            .as_ref()
            .map(|teacher| teacher.id == self.state.client_id)
            .unwrap_or(false);
        self.leave();
        if owner {
            self.services.router.navigate(Route::Dashboard);
        } else {
            self.services
                .alerts
                .info("Room closed", Some("The teacher closed the room."));
            self.services.router.navigate(Route::Home);
        }
    }

    /// An unsolicited transport loss. Everything resets; a participant still
    /// looking at the room view is redirected without an alert.
    fn handle_transport_disconnect(&mut self) {
        log::warn!("hub connection lost");
        let in_room = matches!(self.services.router.current_route(), Route::Room(_));
        self.leave();
        if in_room {
            if self.services.auth.is_logged_in() {
                self.services.router.navigate(Route::Dashboard);
            } else {
                self.services.router.navigate(Route::Home);
            }
        }
    }

    fn hub(&self) -> Result<SharedHub, ChannelError> {
        self.hub.clone().ok_or(ChannelError::Disconnected)
    }

    fn set_conn_state(&mut self, next: ConnState) {
        if self.conn_state == next {
            return;
        }
        self.conn_state = next;
        self.events.push(ChannelEvent::ConnectionState(next));
    }
}
