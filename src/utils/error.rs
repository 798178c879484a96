use thiserror::Error;

#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum SshToolError {
    #[error("SSH connection failed: {0}")]
    SshConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("transport closed")]
    TransportDown,

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("Invalid port number: {0}")]
    InvalidPort(u16),

    #[error("Invalid host address: {0}")]
    InvalidHost(String),

    #[error("Private key file not found: {0}")]
    KeyFileNotFound(String),

    #[error("Upstream channel open failed: {0}")]
    ChannelOpenFailed(String),

    #[error("Relay failed: {0}")]
    RelayFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SshToolError>;

impl SshToolError {
    /// Human-readable message surfaced on the supervisor's "last error" slot.
    pub fn user_message(&self) -> String {
        match self {
            Self::PortInUse(port) => format!("Port {} is already in use", port),
            Self::InvalidPort(port) => format!("Invalid port number: {}", port),
            Self::InvalidHost(host) => format!("Invalid host address: {}", host),
            Self::KeyFileNotFound(path) => format!("Private key file not found: {}", path),
            Self::AuthenticationFailed(reason) => format!("Authentication failed: {}", reason),
            Self::SshConnectionFailed(reason) => format!("SSH connection failed: {}", reason),
            Self::ChannelOpenFailed(reason) => format!("Upstream channel open failed: {}", reason),
            Self::ConfigError(reason) => format!("Configuration error: {}", reason),
            _ => self.to_string(),
        }
    }

    /// Whether this error is fatal to the whole session (transport-level) as
    /// opposed to scoped to a single client connection.
    pub fn is_fatal_to_transport(&self) -> bool {
        matches!(
            self,
            Self::SshConnectionFailed(_) | Self::AuthenticationFailed(_) | Self::TransportDown
        )
    }
}
