/// Messages that command the machine, either onto the bus (spray
/// command) or into the control system (operator).
pub mod control {
    /// Operator messages come from the control surface over TCP.
    pub mod operator;
    /// Spray command codec shared with the actuator firmware.
    pub mod spray;
}

/// Messages the vehicle reports back over the bus.
pub mod telemetry {
    /// Vehicle control unit status frame.
    pub mod vehicle;
}
