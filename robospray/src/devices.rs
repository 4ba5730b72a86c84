/// Contract of the service that puts messages on the vehicle bus.
pub mod gateway;

pub mod hardware {
    /// Bus gateway backed by a SocketCAN interface.
    pub mod canbus;
    /// Position samples and the threaded feed that delivers them.
    pub mod gps;
}

/// Devices with no hardware behind them, used on the bench.
pub mod software {
    /// Receiver replaying the catalog points.
    pub mod simulated_gps;
}
