#[derive(Clone, Debug)]
pub struct HubConfig {
    pub server: String,
    pub port: u16,
}

pub const DEFAULT_PORT: u16 = 8443;

/// Display name transmitted for an anonymous student until they pick a real
/// one.
pub const PLACEHOLDER_NAME: &str = "Connecting...";

impl HubConfig {
    pub fn new(server: String, port: u16) -> Self {
        Self { server, port }
    }
}
