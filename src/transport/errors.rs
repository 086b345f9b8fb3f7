use std::fmt;

/// Discriminator carried by a rejected join acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinError {
    WrongPassword,
    NotAuthorized,
    Other(String),
}

impl JoinError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "wrong-password" => JoinError::WrongPassword,
            "not-authorized" => JoinError::NotAuthorized,
            other => JoinError::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::WrongPassword => write!(f, "wrong password"),
            JoinError::NotAuthorized => write!(f, "not authorized"),
            JoinError::Other(code) => write!(f, "{code}"),
        }
    }
}

#[derive(Debug)]
pub enum ChannelError {
    Disconnected,
    InvalidConfig(String),
    Io(String),
    JoinRejected(JoinError),
    Media(String),
    Protocol(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Disconnected => write!(f, "channel disconnected"),
            ChannelError::InvalidConfig(message) => write!(f, "invalid config: {message}"),
            ChannelError::Io(message) => write!(f, "io error: {message}"),
            ChannelError::JoinRejected(reason) => write!(f, "join rejected: {reason}"),
            ChannelError::Media(message) => write!(f, "media error: {message}"),
            ChannelError::Protocol(message) => write!(f, "protocol error: {message}"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<std::io::Error> for ChannelError {
    fn from(error: std::io::Error) -> Self {
        ChannelError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(error: serde_json::Error) -> Self {
        ChannelError::Protocol(format!("malformed frame: {error}"))
    }
}
