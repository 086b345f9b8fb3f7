use std::collections::HashMap;

use crate::channel::services::{LocalMedia, MediaCapture, PeerConnector, PeerLink, RemoteStream};
use crate::channel::wire::{ClientEvent, SharedHub};
use crate::transport::errors::ChannelError;

/// The full-mesh webcam component. Every participant opens one outbound
/// signaling identity per other roster member and advertises it over the
/// hub; the counterpart calls that identity and both directions of a pair
/// end up with each other's stream.
pub struct Webcam {
    hub: SharedHub,
    local: LocalMedia,
    streams: HashMap<String, RemoteStream>,
    /// Links opened at load time, keyed by the user they were advertised
    /// to; they answer that user's inbound call.
    links: Vec<(String, Box<dyn PeerLink>)>,
}

impl std::fmt::Debug for Webcam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webcam")
            .field("local", &self.local)
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}

impl Webcam {
    /// Acquires the local capture, seeds the track-enabled flags from the
    /// owner's preferences and advertises one signaling identity to every
    /// other participant.
    pub fn load(
        hub: SharedHub,
        media: &mut dyn MediaCapture,
        peers: &mut dyn PeerConnector,
        video: bool,
        audio: bool,
        others: &[String],
    ) -> Result<Self, ChannelError> {
        let mut local = media.acquire()?;
        local.video.enabled = video;
        local.audio.enabled = audio;

        let mut links = Vec::with_capacity(others.len());
        for user_id in others {
            let link = peers.open()?;
            hub.borrow_mut().send(ClientEvent::ConnectWebcam {
                user_id: user_id.clone(),
                peer_id: link.peer_id().to_string(),
            })?;
            links.push((user_id.clone(), link));
        }

        log::debug!("webcam mesh advertised to {} peers", links.len());
        Ok(Self {
            hub,
            local,
            streams: HashMap::new(),
            links,
        })
    }

    pub fn local(&self) -> &LocalMedia {
        &self.local
    }

    pub fn stream(&self, user_id: &str) -> Option<&RemoteStream> {
        self.streams.get(user_id)
    }

    /// Answers a peer advertisement: opens a fresh identity, calls the
    /// advertised peer with the local stream and stores the remote one.
    pub fn handle_connect(
        &mut self,
        peers: &mut dyn PeerConnector,
        user_id: &str,
        peer_id: &str,
    ) -> Result<(), ChannelError> {
        let mut link = peers.open()?;
        let remote = link.call(peer_id, &self.local)?;
        self.streams.insert(user_id.to_string(), remote);
        Ok(())
    }

    /// Answers pending inbound calls on the advertised links. Each directed
    /// mesh edge completes independently; concurrent completions land in
    /// separate registry entries.
    pub fn poll_calls(&mut self) -> Result<(), ChannelError> {
        for (user_id, link) in &mut self.links {
            if let Some(remote) = link.try_accept(&self.local)? {
                self.streams.insert(user_id.clone(), remote);
            }
        }
        Ok(())
    }

    /// Applies the owner's track preferences and broadcasts them once.
    pub fn set_enabled(&mut self, video: bool, audio: bool) -> Result<(), ChannelError> {
        self.local.video.enabled = video;
        self.local.audio.enabled = audio;
        self.hub
            .borrow_mut()
            .send(ClientEvent::UpdateWebcam { video, audio })
    }

    /// Silences the local microphone without consent; the global-mute
    /// cascade. No broadcast: the hub initiated the change.
    pub fn disable_audio(&mut self) {
        self.local.audio.enabled = false;
    }

    /// Stops every local track and clears the registry. Peers observe the
    /// transport disconnect on their own; there is no teardown signaling.
    pub fn stop(&mut self) {
        self.local.video.stop();
        self.local.audio.stop();
        self.streams.clear();
        self.links.clear();
    }
}
