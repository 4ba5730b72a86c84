use serde::{Deserialize, Serialize};

/// Operator message generated from the control surface (dashboard buttons,
/// a bench script etc.). Sent as newline delimited JSON.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone, Copy)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorMessage {
    /// Manual spray button. Only acted on while auto spray is disabled.
    Manual {
        /// If true, request the solenoid open.
        is_on: bool,
    },
    /// Enable or disable geofence triggered spraying.
    AutoSpray {
        enabled: bool,
        /// New trigger radius in meters, keeps the current one if absent.
        #[serde(default)]
        trigger_radius_m: Option<f64>,
    },
}
