use crate::channel::wire::{ClientEvent, SharedHub};
use crate::transport::errors::ChannelError;

/// Shared whiteboard session. Holds the current canvas, seeded from the join
/// snapshot; every local edit broadcasts the full canvas, no diffing.
pub struct Whiteboard {
    hub: SharedHub,
    canvas: String,
    subscribers: Vec<Box<dyn FnMut(&str)>>,
}

impl Whiteboard {
    pub fn new(hub: SharedHub, initial_canvas: String) -> Self {
        Self {
            hub,
            canvas: initial_canvas,
            subscribers: Vec::new(),
        }
    }

    pub fn canvas(&self) -> &str {
        &self.canvas
    }

    /// Broadcasts a local edit and records it as the current canvas.
    pub fn change(&mut self, canvas: &str) -> Result<(), ChannelError> {
        self.canvas = canvas.to_string();
        self.hub.borrow_mut().send(ClientEvent::WhiteboardChange {
            canvas: self.canvas.clone(),
        })
    }

    /// Registers a subscriber. The current canvas is replayed immediately so
    /// a late subscriber never misses state, then live updates follow.
    pub fn on_changes(&mut self, mut callback: Box<dyn FnMut(&str)>) {
        callback(&self.canvas);
        self.subscribers.push(callback);
    }

    /// Applies a remote canvas update and notifies every subscriber.
    pub fn apply(&mut self, canvas: String) {
        self.canvas = canvas;
        for subscriber in &mut self.subscribers {
            subscriber(&self.canvas);
        }
    }
}
