use crate::channel::wire::ServerEvent;
use crate::transport::errors::ChannelError;
use crate::transport::types::{Room, RoomSettings, Student, Teacher};

/// Borrowed view over a roster entry. The role is derived from which slot of
/// the roster matched; it is never stored on the participant itself.
#[derive(Clone, Copy, Debug)]
pub enum RosterUser<'a> {
    Teacher(&'a Teacher),
    Student(&'a Student),
}

impl RosterUser<'_> {
    pub fn id(&self) -> &str {
        match self {
            RosterUser::Teacher(teacher) => &teacher.id,
            RosterUser::Student(student) => &student.id,
        }
    }

    pub fn video(&self) -> bool {
        match self {
            RosterUser::Teacher(teacher) => teacher.video,
            RosterUser::Student(student) => student.video,
        }
    }

    pub fn audio(&self) -> bool {
        match self {
            RosterUser::Teacher(teacher) => teacher.audio,
            RosterUser::Student(student) => student.audio,
        }
    }
}

/// The one mutable aggregate of the channel. Owned by the session manager;
/// everything else reads it. Either fully joined or fully empty, never in
/// between.
#[derive(Debug, Default)]
pub struct ChannelState {
    pub connected: bool,
    pub channel_id: String,
    pub client_id: String,
    pub room: Option<Room>,
    pub teacher: Option<Teacher>,
    pub students: Vec<Student>,
    pub has_name: bool,
    pub settings: RoomSettings,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores the empty value. Used on leave and on an unsolicited
    /// disconnect.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn user_by_id(&self, id: &str) -> Option<RosterUser<'_>> {
        if let Some(teacher) = &self.teacher {
            if teacher.id == id {
                return Some(RosterUser::Teacher(teacher));
            }
        }

        self.students
            .iter()
            .find(|student| student.id == id)
            .map(RosterUser::Student)
    }

    /// Fails loudly: callers only ask for a student in response to a
    /// server-asserted event referencing that id, so a miss is a
    /// desynchronization.
    pub fn student_by_id(&self, id: &str) -> Result<&Student, ChannelError> {
        self.students
            .iter()
            .find(|student| student.id == id)
            .ok_or_else(|| ChannelError::Protocol(format!("unknown student {id}")))
    }

    pub fn student_by_id_mut(&mut self, id: &str) -> Result<&mut Student, ChannelError> {
        self.students
            .iter_mut()
            .find(|student| student.id == id)
            .ok_or_else(|| ChannelError::Protocol(format!("unknown student {id}")))
    }

    pub fn is_self(&self, id: &str) -> bool {
        !self.client_id.is_empty() && id == self.client_id
    }

    pub fn is_teacher(&self, id: &str) -> bool {
        self.teacher.as_ref().is_some_and(|teacher| teacher.id == id)
    }

    pub fn is_student(&self, id: &str) -> bool {
        !self.is_teacher(id) && self.user_by_id(id).is_some()
    }

    /// Resolves the local client in the roster. Fails loudly: an event
    /// arriving before the join completed is a protocol violation.
    pub fn current_user(&self) -> Result<RosterUser<'_>, ChannelError> {
        self.user_by_id(&self.client_id)
            .ok_or_else(|| ChannelError::Protocol("current user not in roster".to_string()))
    }

    /// A teacher always has permission; a student only when granted one.
    pub fn has_current_user_permission(&self) -> Result<bool, ChannelError> {
        match self.current_user()? {
            RosterUser::Teacher(_) => Ok(true),
            RosterUser::Student(student) => Ok(student.permission),
        }
    }

    /// The roster minus self: the set the webcam mesh connects to.
    pub fn other_users(&self) -> Vec<RosterUser<'_>> {
        let mut users: Vec<RosterUser<'_>> = self
            .students
            .iter()
            .filter(|student| !self.is_self(&student.id))
            .map(RosterUser::Student)
            .collect();

        if let Some(teacher) = &self.teacher {
            if !self.is_self(&teacher.id) {
                users.push(RosterUser::Teacher(teacher));
            }
        }

        users
    }

    /// Rewrites the media flags of a roster entry, teacher or student.
    pub fn set_media_flags(&mut self, id: &str, video: bool, audio: bool) {
        if let Some(teacher) = &mut self.teacher {
            if teacher.id == id {
                teacher.video = video;
                teacher.audio = audio;
                return;
            }
        }

        if let Some(student) = self.students.iter_mut().find(|student| student.id == id) {
            student.video = video;
            student.audio = audio;
        }
    }

    /// Forces the audio flag off for every student that currently has it on
    /// and returns the affected ids. The global-mute cascade.
    pub fn mute_all_students(&mut self) -> Vec<String> {
        let mut muted = Vec::new();
        for student in &mut self.students {
            if student.audio {
                student.audio = false;
                muted.push(student.id.clone());
            }
        }
        muted
    }

    /// Applies one roster/settings delta. Pure state mutation; side effects
    /// (alerts, navigation, track silencing) live in the session dispatch.
    /// Returns whether the event was consumed here.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::StudentJoined(student) => {
                if self.students.iter().any(|known| known.id == student.id) {
                    log::warn!("duplicate student-joined for {}", student.id);
                    return true;
                }
                self.students.push(student.clone());
                true
            }
            ServerEvent::StudentLeft { id } => {
                self.students.retain(|student| student.id != *id);
                true
            }
            ServerEvent::TeacherJoined(teacher) => {
                self.teacher = Some(teacher.clone());
                true
            }
            ServerEvent::TeacherLeft => {
                self.teacher = None;
                true
            }
            ServerEvent::NameChanged { id, name } => {
                if let Ok(student) = self.student_by_id_mut(id) {
                    student.name = name.clone();
                } else {
                    log::debug!("change-name for unknown student {id}");
                }
                true
            }
            ServerEvent::HandSignalUpdated { id, hand_signal } => {
                if let Ok(student) = self.student_by_id_mut(id) {
                    student.hand_signal = *hand_signal;
                }
                true
            }
            ServerEvent::PermissionUpdated { id, permission } => {
                if let Ok(student) = self.student_by_id_mut(id) {
                    student.permission = *permission;
                }
                true
            }
            ServerEvent::WebcamUpdated { id, video, audio } => {
                self.set_media_flags(id, *video, *audio);
                true
            }
            ServerEvent::SettingsUpdated(settings) => {
                self.settings = settings.clone();
                true
            }
            _ => false,
        }
    }
}
