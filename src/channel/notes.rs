use crate::channel::services::NotesApi;
use crate::channel::wire::{ClientEvent, ServerEvent, SharedHub};
use crate::transport::errors::ChannelError;
use crate::transport::types::Note;

/// Shared notes session. The persisted list is fetched once over REST; all
/// further mutation flows over the live channel. Local changes apply
/// optimistically and converge through the echoed note events.
pub struct Notes {
    hub: SharedHub,
    notes: Vec<Note>,
}

impl Notes {
    pub fn load(
        api: &dyn NotesApi,
        hub: SharedHub,
        room_id: i64,
        category_id: i64,
    ) -> Result<Self, ChannelError> {
        let notes = api.fetch_notes(room_id, category_id)?;
        Ok(Self { hub, notes })
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn note_by_id(&self, id: i64) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == id)
    }

    /// Acknowledged request; the hub assigns the id, which is appended
    /// locally on success.
    pub fn add(&mut self, name: &str) -> Result<i64, ChannelError> {
        let ack = self.hub.borrow_mut().request(ClientEvent::AddNote {
            name: name.to_string(),
        })?;

        if let Some(code) = ack.get("error").and_then(serde_json::Value::as_str) {
            return Err(ChannelError::Protocol(format!("add-note rejected: {code}")));
        }

        let id = ack
            .get("id")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| ChannelError::Protocol("add-note ack without id".to_string()))?;

        self.notes.push(Note {
            id,
            name: name.to_string(),
            content: String::new(),
        });
        Ok(id)
    }

    /// Fire-and-forget; the echoed note-updated event reconciles the other
    /// participants.
    pub fn update(&mut self, id: i64, content: &str) -> Result<(), ChannelError> {
        if let Some(note) = self.notes.iter_mut().find(|note| note.id == id) {
            note.content = content.to_string();
        }
        self.hub.borrow_mut().send(ClientEvent::UpdateNote {
            id,
            content: content.to_string(),
        })
    }

    pub fn delete(&mut self, id: i64) -> Result<(), ChannelError> {
        self.notes.retain(|note| note.id != id);
        self.hub.borrow_mut().send(ClientEvent::DeleteNote { id })
    }

    /// Applies an inbound note event. Adding an id that is already present
    /// is the echo of a local add and is ignored.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::NoteAdded(note) => {
                if self.note_by_id(note.id).is_none() {
                    self.notes.push(note.clone());
                }
            }
            ServerEvent::NoteUpdated { id, content } => {
                if let Some(note) = self.notes.iter_mut().find(|note| note.id == *id) {
                    note.content = content.clone();
                }
            }
            ServerEvent::NoteDeleted { id } => {
                self.notes.retain(|note| note.id != *id);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Notes;
    use crate::channel::services::NotesApi;
    use crate::channel::wire::tests_support::RecordingHub;
    use crate::channel::wire::{ClientEvent, ServerEvent};
    use crate::transport::errors::ChannelError;
    use crate::transport::types::Note;
    use serde_json::json;
    use std::rc::Rc;

    struct FixedNotesApi {
        notes: Vec<Note>,
    }

    impl NotesApi for FixedNotesApi {
        fn fetch_notes(&self, _room_id: i64, _category_id: i64) -> Result<Vec<Note>, ChannelError> {
            Ok(self.notes.clone())
        }
    }

    fn note(id: i64, name: &str, content: &str) -> Note {
        Note {
            id,
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    fn loaded(hub: crate::channel::wire::SharedHub) -> Notes {
        let api = FixedNotesApi {
            notes: vec![note(1, "Agenda", "Welcome")],
        };
        Notes::load(&api, hub, 7, 3).expect("load failed")
    }

    /// Load pulls the persisted list from the REST collaborator.
    #[test]
    fn load_fetches_persisted_notes() {
        // Arrange
        let (hub, _sent) = RecordingHub::shared();

        // Act
        let notes = loaded(hub);

        // Assert
        assert_eq!(notes.notes().len(), 1);
        assert_eq!(notes.note_by_id(1).map(|n| n.name.as_str()), Some("Agenda"));
    }

    /// Add is acknowledged and appends with the hub-assigned id.
    #[test]
    fn add_appends_with_hub_assigned_id() {
        // Arrange
        let hub = RecordingHub::new("c1");
        hub.acks.borrow_mut().push_back(json!({"id": 9}));
        let sent = Rc::clone(&hub.sent);
        let mut notes = loaded(hub.into_shared());

        // Act
        let id = notes.add("Homework").expect("add failed");

        // Assert
        assert_eq!(id, 9);
        assert_eq!(notes.note_by_id(9).map(|n| n.name.as_str()), Some("Homework"));
        assert_eq!(
            sent.borrow().last(),
            Some(&ClientEvent::AddNote {
                name: "Homework".to_string(),
            })
        );
    }

    /// A rejected add surfaces the discriminator and leaves the list alone.
    #[test]
    fn add_propagates_rejection() {
        // Arrange
        let hub = RecordingHub::new("c1");
        hub.acks
            .borrow_mut()
            .push_back(json!({"error": "not-authorized"}));
        let mut notes = loaded(hub.into_shared());

        // Act
        let err = notes.add("Homework").expect_err("expected rejection");

        // Assert
        assert!(matches!(err, ChannelError::Protocol(_)));
        assert_eq!(notes.notes().len(), 1);
    }

    /// Update and delete mutate optimistically and broadcast.
    #[test]
    fn update_and_delete_are_optimistic() {
        // Arrange
        let (hub, sent) = RecordingHub::shared();
        let mut notes = loaded(hub);

        // Act
        notes.update(1, "Revised").expect("update failed");
        notes.delete(1).expect("delete failed");

        // Assert
        assert!(notes.notes().is_empty());
        assert_eq!(
            *sent.borrow(),
            vec![
                ClientEvent::UpdateNote {
                    id: 1,
                    content: "Revised".to_string(),
                },
                ClientEvent::DeleteNote { id: 1 },
            ]
        );
    }

    /// Remote note events converge the local copy.
    #[test]
    fn apply_converges_remote_changes() {
        // Arrange
        let (hub, _sent) = RecordingHub::shared();
        let mut notes = loaded(hub);

        // Act
        notes.apply(&ServerEvent::NoteAdded(note(2, "Links", "")));
        notes.apply(&ServerEvent::NoteUpdated {
            id: 2,
            content: "https://example.org".to_string(),
        });
        notes.apply(&ServerEvent::NoteDeleted { id: 1 });

        // Assert
        assert_eq!(notes.notes().len(), 1);
        let remaining = notes.note_by_id(2).expect("note missing");
        assert_eq!(remaining.content, "https://example.org");
    }

    /// The echo of a local add does not duplicate the note.
    #[test]
    fn apply_ignores_echo_of_local_add() {
        // Arrange
        let (hub, _sent) = RecordingHub::shared();
        let mut notes = loaded(hub);

        // Act
        notes.apply(&ServerEvent::NoteAdded(note(1, "Agenda", "Welcome")));

        // Assert
        assert_eq!(notes.notes().len(), 1);
    }
}
