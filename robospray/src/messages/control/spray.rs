use crate::error::{Result, RoboSprayError};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt::Display;
use strum_macros::{EnumIter, FromRepr, IntoStaticStr};

/// CAN id the spray command is sent on. The actuator side firmware
/// registers its handler on this id.
pub const SPRAY_CAN_ID: u32 = 0x777;

/// Operating mode of the vehicle control unit. The ordinals are the wire
/// values shared with every other node on the bus, so they must not be
/// reordered.
#[derive(
    FromRepr,
    IntoStaticStr,
    EnumIter,
    Deserialize,
    Serialize,
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
)]
#[repr(u8)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlState {
    /// Control unit still booting, never commanded.
    Boot = 0,
    ManualReady = 1,
    ManualActive = 2,
    /// Cruise control, never commanded.
    CruiseActive = 3,
    AutoReady = 4,
    AutoActive = 5,
    Estopped = 6,
}

impl ControlState {
    /// Wire ordinal of the state.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Look up a state from its wire ordinal.
    ///
    /// * `ordinal`: byte read off the bus.
    pub fn from_ordinal(ordinal: u8) -> Result<Self> {
        Self::from_repr(ordinal).ok_or(RoboSprayError::UnknownControlState(ordinal))
    }
}

impl Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name: &'static str = self.into();
        write!(f, "{name}")
    }
}

/// Spray request sent to the actuator. Re-derived on every send tick,
/// nothing about it is accumulated between ticks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub state: ControlState,
    /// Spray solenoid requested on.
    pub activate: bool,
}

impl ActuatorCommand {
    /// Current layout: `<Bhx`, state byte, activate i16, one pad byte.
    pub const WIRE_LEN: usize = 4;

    pub fn new(state: ControlState, activate: bool) -> Self {
        Self { state, activate }
    }

    /// Encode into the current 4 byte little-endian layout.
    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut data = [0u8; Self::WIRE_LEN];
        data[0] = self.state.ordinal();
        LittleEndian::write_i16(&mut data[1..3], i16::from(self.activate));
        data
    }

    fn decode_current(data: &[u8]) -> Result<Self> {
        let state = ControlState::from_ordinal(data[0])?;
        // The receiving firmware switches on any positive value.
        let activate = LittleEndian::read_i16(&data[1..3]) > 0;
        Ok(Self { state, activate })
    }
}

impl Display for ActuatorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "spray request state {} activate {}",
            self.state,
            u8::from(self.activate)
        )
    }
}

/// Older senders put a speed and angular rate on the same id using the
/// `<Bhh` layout. The vehicle status frame still uses this record.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LegacyCommand {
    pub state: ControlState,
    /// Meters per second.
    pub speed: f64,
    /// Radians per second.
    pub angular_rate: f64,
}

impl LegacyCommand {
    pub const WIRE_LEN: usize = 5;
    /// Fixed point scale of the speed and rate fields.
    const SCALE: f64 = 1000.0;

    pub fn new(state: ControlState, speed: f64, angular_rate: f64) -> Self {
        Self {
            state,
            speed,
            angular_rate,
        }
    }

    /// Encode into the legacy layout, truncating to millimeter resolution.
    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut data = [0u8; Self::WIRE_LEN];
        data[0] = self.state.ordinal();
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_i16(&mut data[1..3], (self.speed * Self::SCALE) as i16);
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_i16(&mut data[3..5], (self.angular_rate * Self::SCALE) as i16);
        data
    }

    /// Decode the legacy layout. Fails on any other length.
    ///
    /// * `data`: CAN payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::WIRE_LEN {
            return Err(RoboSprayError::MalformedPacket {
                expected: "5",
                actual: data.len(),
            });
        }
        Ok(Self {
            state: ControlState::from_ordinal(data[0])?,
            speed: f64::from(LittleEndian::read_i16(&data[1..3])) / Self::SCALE,
            angular_rate: f64::from(LittleEndian::read_i16(&data[3..5])) / Self::SCALE,
        })
    }
}

const_assert_eq!(ActuatorCommand::WIRE_LEN, 4);
const_assert_eq!(LegacyCommand::WIRE_LEN, 5);

/// Result of decoding a spray frame. The layout is picked from the
/// payload length, there is no version tag on the wire.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DecodedCommand {
    Current(ActuatorCommand),
    Legacy(LegacyCommand),
}

impl DecodedCommand {
    /// Whether the frame asks for the solenoid to be open. Legacy frames
    /// carry no spray field and always read as off.
    pub fn activate(&self) -> bool {
        match self {
            DecodedCommand::Current(command) => command.activate,
            DecodedCommand::Legacy(_) => false,
        }
    }

    pub fn state(&self) -> ControlState {
        match self {
            DecodedCommand::Current(command) => command.state,
            DecodedCommand::Legacy(command) => command.state,
        }
    }
}

/// Encode a command in the current layout. Never fails, the state and
/// activate domain is closed by the type.
pub fn encode(command: &ActuatorCommand) -> Vec<u8> {
    command.encode().to_vec()
}

/// Decode a spray frame in either the current (4 byte) or legacy
/// (5 byte) layout.
///
/// * `data`: CAN payload.
pub fn decode(data: &[u8]) -> Result<DecodedCommand> {
    match data.len() {
        ActuatorCommand::WIRE_LEN => ActuatorCommand::decode_current(data).map(DecodedCommand::Current),
        LegacyCommand::WIRE_LEN => LegacyCommand::decode(data).map(DecodedCommand::Legacy),
        actual => Err(RoboSprayError::MalformedPacket {
            expected: "4 or 5",
            actual,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    #[test]
    fn test_round_trip_all_commands() {
        for state in ControlState::iter() {
            for activate in [false, true] {
                let command = ActuatorCommand::new(state, activate);
                let decoded = decode(&encode(&command)).unwrap();
                assert_eq!(decoded, DecodedCommand::Current(command));
            }
        }
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let command = ActuatorCommand::new(ControlState::AutoActive, true);
        assert_eq!(command.encode(), [5, 1, 0, 0]);

        let command = ActuatorCommand::new(ControlState::Estopped, false);
        assert_eq!(command.encode(), [6, 0, 0, 0]);
    }

    #[test]
    fn test_decode_legacy_scaled_fields() {
        // state AUTO_READY, speed 1500 (1.5 m/s), rate -250 (-0.25 rad/s)
        let data = [4, 0xDC, 0x05, 0x06, 0xFF];
        let decoded = decode(&data).unwrap();
        assert_eq!(
            decoded,
            DecodedCommand::Legacy(LegacyCommand::new(ControlState::AutoReady, 1.5, -0.25))
        );
        assert!(!decoded.activate());
    }

    #[test]
    fn test_legacy_encode_truncates_to_millis() {
        let command = LegacyCommand::new(ControlState::ManualActive, 0.2509, 0.0);
        let decoded = LegacyCommand::decode(&command.encode()).unwrap();
        assert_eq!(decoded.speed, 0.25);
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![5, 1, 0])]
    #[case(vec![5, 1, 0, 0, 0, 0])]
    #[case(vec![5, 1, 0, 0, 0, 0, 0, 0])]
    fn test_decode_rejects_other_lengths(#[case] data: Vec<u8>) {
        let err = decode(&data).unwrap_err();
        assert!(
            matches!(err, RoboSprayError::MalformedPacket { actual, .. } if actual == data.len()),
            "unexpected error {err:?}"
        );
    }

    #[rstest]
    #[case(vec![7, 1, 0, 0])]
    #[case(vec![0xFF, 0, 0, 0, 0])]
    fn test_decode_rejects_unknown_state(#[case] data: Vec<u8>) {
        let err = decode(&data).unwrap_err();
        assert!(err.is_malformed());
    }

    #[rstest]
    #[case([5, 1, 0, 0], true)]
    #[case([5, 7, 0, 0], true)]
    #[case([5, 0, 0, 0], false)]
    #[case([5, 0xFF, 0xFF, 0], false)]
    fn test_decode_activate_is_positive(#[case] data: [u8; 4], #[case] expected: bool) {
        assert_eq!(decode(&data).unwrap().activate(), expected);
    }

    #[test]
    fn test_state_names_render_screaming_snake() {
        assert_eq!(ControlState::AutoActive.to_string(), "AUTO_ACTIVE");
        assert_eq!(ControlState::Estopped.to_string(), "ESTOPPED");
        assert_eq!(
            ActuatorCommand::new(ControlState::AutoActive, true).to_string(),
            "spray request state AUTO_ACTIVE activate 1"
        );
    }
}
