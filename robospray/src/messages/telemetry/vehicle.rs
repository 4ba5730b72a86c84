use crate::{
    error::Result,
    messages::control::spray::{ControlState, LegacyCommand},
};
use std::fmt::Display;

/// Id of the vehicle control unit status frame (TPDO1) as addressed to
/// the dashboard node.
pub const VEHICLE_STATUS_CAN_ID: u32 = 0x180 + 0x0E;

/// Measured state of the vehicle, decoded from the status frame that the
/// control unit broadcasts. Shares the legacy spray record layout.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VehicleStatus {
    pub state: ControlState,
    /// Measured speed in meters per second.
    pub measured_speed: f64,
    /// Measured angular rate in radians per second.
    pub measured_angular_rate: f64,
}

impl VehicleStatus {
    /// Decode a status payload.
    ///
    /// * `data`: CAN payload of the status frame.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let record = LegacyCommand::decode(data)?;
        Ok(Self {
            state: record.state,
            measured_speed: record.speed,
            measured_angular_rate: record.angular_rate,
        })
    }
}

impl Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state {} speed {:.3} rate {:.3}",
            self.state, self.measured_speed, self.measured_angular_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoboSprayError;

    #[test]
    fn test_decode_status_string() {
        let data = LegacyCommand::new(ControlState::AutoActive, 0.25, -0.1).encode();
        let status = VehicleStatus::decode(&data).unwrap();
        assert_eq!(status.state, ControlState::AutoActive);
        assert_eq!(status.to_string(), "state AUTO_ACTIVE speed 0.250 rate -0.100");
    }

    #[test]
    fn test_decode_status_rejects_current_layout() {
        let err = VehicleStatus::decode(&[5, 1, 0, 0]).unwrap_err();
        assert!(matches!(err, RoboSprayError::MalformedPacket { actual: 4, .. }));
    }
}
