//! Error types for GrihaIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// GrihaIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse error
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Unknown driver name in configuration
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    /// Semantically invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Driver operation attempted while stopped
    #[error("Driver not running")]
    NotRunning,

    /// Second start call while the driver loop is active
    #[error("Driver already running")]
    AlreadyRunning,

    /// Driver could not accept a set request
    #[error("Driver rejected request: {0}")]
    DriverRejected(String),

    /// Attempt to read past the end of a packet
    #[error("Packet truncated: need {needed} bytes at offset {offset}, have {available}")]
    PacketTruncated {
        /// Bytes required by the read
        needed: usize,
        /// Cursor position of the read
        offset: usize,
        /// Bytes remaining in the packet
        available: usize,
    },

    /// Malformed packet contents
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Profile does not exist
    #[error("Unknown profile {0}")]
    UnknownProfile(u32),

    /// Profile is currently being applied
    #[error("Profile {0} is currently loading")]
    ProfileBusy(u32),

    /// Profile step failed validation before execution
    #[error("Invalid profile step: {0}")]
    InvalidProfileStep(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
