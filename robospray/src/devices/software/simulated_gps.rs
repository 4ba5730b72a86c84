use crate::{
    devices::hardware::gps::{PositionSample, PositionSource},
    error::{Result, RoboSprayError},
    geofence::catalog::{GeofenceCatalog, GeofenceTarget},
    utils::geodesy::initial_bearing,
};
use chrono::Utc;
use std::{thread, time::Duration};

/// Simulated receiver that replays the catalog points at a fixed period,
/// in label order, wrapping around at the end. Used for bench testing the
/// spray loop without a receiver or a field.
pub struct SimulatedGps {
    track: Vec<GeofenceTarget>,
    cursor: usize,
    period: Duration,
}

impl SimulatedGps {
    /// Create a simulated receiver from a catalog.
    ///
    /// * `catalog`: points to replay.
    /// * `period`: time between fixes.
    pub fn new(catalog: &GeofenceCatalog, period: Duration) -> Self {
        Self {
            track: catalog.sorted_by_label(),
            cursor: 0,
            period,
        }
    }

    /// Next fix without waiting for the period. The heading points at the
    /// following waypoint.
    fn next_fix(&mut self) -> Result<PositionSample> {
        if self.track.is_empty() {
            return Err(RoboSprayError::HardwareUnavailable(String::from(
                "simulated track is empty",
            )));
        }
        let current_idx = self.cursor;
        // Move on before validating, a bad point is skipped, not repeated.
        self.cursor = (self.cursor + 1) % self.track.len();
        let current = &self.track[current_idx];
        let next = &self.track[self.cursor];
        let heading = initial_bearing(
            current.latitude,
            current.longitude,
            next.latitude,
            next.longitude,
        );
        PositionSample::new(current.latitude, current.longitude, heading, Utc::now())
    }
}

impl PositionSource for SimulatedGps {
    fn read_fix(&mut self) -> Result<PositionSample> {
        thread::sleep(self.period);
        self.next_fix()
    }
}
