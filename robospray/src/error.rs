use thiserror::Error;

/// Crate wide result type.
pub type Result<T> = std::result::Result<T, RoboSprayError>;

/// Errors raised across the spray control system. Only startup errors
/// (config, catalog, empty index) are expected to stop the process; the
/// rest are local to one decode, one stream or one position read.
#[derive(Error, Debug)]
pub enum RoboSprayError {
    /// Payload length does not match any known spray frame layout.
    #[error("Malformed packet: expected {expected} bytes, got {actual}")]
    MalformedPacket {
        expected: &'static str,
        actual: usize,
    },

    /// Control state byte is outside the vehicle control unit table.
    #[error("Malformed packet: unknown control state {0}")]
    UnknownControlState(u8),

    #[error("Geofence index is empty")]
    EmptyIndex,

    #[error("Transport fault: {0}")]
    TransportFault(String),

    #[error("Position hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Position out of range: latitude {latitude}, longitude {longitude}")]
    InvalidPosition { latitude: f64, longitude: f64 },

    /// A controller task ended, they are all meant to run forever.
    #[error("Controller task stopped: {0}")]
    TaskStopped(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RoboSprayError {
    /// True for the decode failures that only invalidate a single frame.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            RoboSprayError::MalformedPacket { .. } | RoboSprayError::UnknownControlState(_)
        )
    }
}
