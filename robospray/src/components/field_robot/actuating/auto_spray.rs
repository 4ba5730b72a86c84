use crate::{
    devices::hardware::gps::PositionSample,
    geofence::index::GeofenceIndex,
    messages::control::operator::OperatorMessage,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, sync::Arc};

/// Geofence triggered spraying settings, changed from the operator surface.
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq)]
pub struct AutoSprayConfig {
    pub enabled: bool,
    /// Spray while the nearest target is strictly closer than this, meters.
    pub trigger_radius_m: f64,
}

impl Default for AutoSprayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_radius_m: 5.0,
        }
    }
}

/// Binary spray decision.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SprayDecision {
    Active,
    #[default]
    Inactive,
}

impl SprayDecision {
    pub fn is_active(self) -> bool {
        self == SprayDecision::Active
    }
}

impl From<bool> for SprayDecision {
    fn from(active: bool) -> Self {
        if active {
            SprayDecision::Active
        } else {
            SprayDecision::Inactive
        }
    }
}

impl Display for SprayDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SprayDecision::Active => write!(f, "ACTIVE"),
            SprayDecision::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// Turns the latest position, the geofence and the operator settings into
/// a spray decision. Owned and mutated by a single task.
#[derive(Debug)]
pub struct ActuationDecision {
    index: Arc<GeofenceIndex>,
    auto_spray: AutoSprayConfig,
    manual_override: bool,
    latest: Option<PositionSample>,
}

impl ActuationDecision {
    /// Create a decision with no position and the manual override off.
    ///
    /// * `index`: geofence index built at startup.
    /// * `auto_spray`: initial auto spray settings.
    pub fn new(index: Arc<GeofenceIndex>, auto_spray: AutoSprayConfig) -> Self {
        Self {
            index,
            auto_spray,
            manual_override: false,
            latest: None,
        }
    }

    pub fn auto_spray(&self) -> AutoSprayConfig {
        self.auto_spray
    }

    pub fn manual_override(&self) -> bool {
        self.manual_override
    }

    pub fn latest(&self) -> Option<&PositionSample> {
        self.latest.as_ref()
    }

    /// Set the manual spray flag. Ignored by [`Self::evaluate`] while auto
    /// spray is enabled.
    pub fn set_manual(&mut self, is_on: bool) {
        self.manual_override = is_on;
    }

    /// Replace the auto spray settings. Leaving auto mode also clears the
    /// manual flag, so nothing stays on after auto spray is switched off.
    ///
    /// * `auto_spray`: new settings.
    pub fn set_auto_spray(&mut self, auto_spray: AutoSprayConfig) {
        if self.auto_spray.enabled && !auto_spray.enabled {
            self.manual_override = false;
        }
        self.auto_spray = auto_spray;
    }

    /// Apply an operator message.
    ///
    /// * `message`: message from the control surface.
    pub fn apply(&mut self, message: OperatorMessage) {
        match message {
            OperatorMessage::Manual { is_on } => self.set_manual(is_on),
            OperatorMessage::AutoSpray {
                enabled,
                trigger_radius_m,
            } => self.set_auto_spray(AutoSprayConfig {
                enabled,
                trigger_radius_m: trigger_radius_m.unwrap_or(self.auto_spray.trigger_radius_m),
            }),
        }
    }

    /// Record the most recent fix. `None` keeps the previous fix, the feed
    /// only returns `None` before its first sample.
    ///
    /// * `sample`: latest sample from the position feed.
    pub fn observe(&mut self, sample: Option<PositionSample>) {
        if sample.is_some() {
            self.latest = sample;
        }
    }

    /// Compute the decision for this tick.
    pub fn evaluate(&self) -> SprayDecision {
        if !self.auto_spray.enabled {
            return self.manual_override.into();
        }
        // Never spray without a fix.
        let Some(sample) = &self.latest else {
            return SprayDecision::Inactive;
        };
        match self.index.nearest(sample) {
            Ok(nearest) => (nearest.distance_m < self.auto_spray.trigger_radius_m).into(),
            Err(e) => {
                tracing::error!("Geofence query failed: {e}");
                SprayDecision::Inactive
            }
        }
    }
}
