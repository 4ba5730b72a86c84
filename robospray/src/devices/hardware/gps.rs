use crate::error::{Result, RoboSprayError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, SyncSender, TrySendError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use uuid::Uuid;

/// A single position fix. Fields are private so a sample can only be
/// created through [`PositionSample::new`], which enforces the WGS84
/// coordinate ranges.
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq)]
pub struct PositionSample {
    latitude: f64,
    longitude: f64,
    /// Heading of motion in degrees.
    heading: f64,
    timestamp: DateTime<Utc>,
}

impl PositionSample {
    /// Create a new sample.
    ///
    /// * `latitude`: degrees in [-90, 90].
    /// * `longitude`: degrees in [-180, 180].
    /// * `heading`: heading of motion in degrees.
    /// * `timestamp`: time of the fix.
    pub fn new(latitude: f64, longitude: f64, heading: f64, timestamp: DateTime<Utc>) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(RoboSprayError::InvalidPosition {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
            heading,
            timestamp,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Something that produces position fixes. Reads are allowed to block
/// (serial receivers do), which is why sources are driven from their own
/// thread by [`GpsFeed`].
pub trait PositionSource: Send + 'static {
    /// Block until the next fix is available.
    fn read_fix(&mut self) -> Result<PositionSample>;
}

/// Interface the control loop consumes positions through.
pub trait PositionFeed: Send {
    /// Start producing samples.
    fn start(&mut self) -> Result<()>;
    /// Stop producing samples. Samples still queued are discarded.
    fn stop(&mut self);
    /// Most recent sample, if one was ever produced.
    fn latest(&mut self) -> Option<PositionSample>;
}

/// Handle to the sampling thread, allows it to be stopped in a consistent
/// manner.
struct SamplerHandle {
    /// The spawned thread handle. Never joined, a blocked read would hang
    /// the shutdown.
    _join_handle: JoinHandle<()>,
    /// Thread safe signal to shut the sampling thread down.
    stop_signal: Arc<AtomicBool>,
}

/// Position feed that drives a [`PositionSource`] on a dedicated thread and
/// hands samples to the consumer through a bounded queue. When the queue is
/// full the new sample is dropped, only the latest fix is worth anything.
pub struct GpsFeed<S: PositionSource> {
    uuid: Uuid,
    /// Source is moved into the sampling thread on start.
    source: Option<S>,
    capacity: usize,
    /// Back off between reads while the hardware is unavailable.
    retry_period: Duration,
    receiver: Option<Receiver<PositionSample>>,
    handle: Option<SamplerHandle>,
    dropped: Arc<AtomicU64>,
    last: Option<PositionSample>,
}

impl<S: PositionSource> GpsFeed<S> {
    /// Create a feed around a source.
    ///
    /// * `source`: the position source.
    /// * `capacity`: bound of the sample queue, at least one.
    /// * `retry_period`: wait between reads while the source is unavailable.
    pub fn new(source: S, capacity: usize, retry_period: Duration) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source: Some(source),
            capacity: capacity.max(1),
            retry_period,
            receiver: None,
            handle: None,
            dropped: Arc::new(AtomicU64::new(0)),
            last: None,
        }
    }

    /// Return the unique identifier of the feed.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Samples discarded because the queue was full.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<S: PositionSource> PositionFeed for GpsFeed<S> {
    fn start(&mut self) -> Result<()> {
        let Some(mut source) = self.source.take() else {
            return Err(RoboSprayError::HardwareUnavailable(String::from(
                "position source already started",
            )));
        };
        let (tx, rx): (SyncSender<PositionSample>, Receiver<PositionSample>) =
            mpsc::sync_channel(self.capacity);
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_signal.clone();
        let dropped = self.dropped.clone();
        let retry_period = self.retry_period;
        let uuid = self.uuid;

        let join_handle = thread::Builder::new()
            .name(format!("gps-{uuid}"))
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    match source.read_fix() {
                        Ok(sample) => match tx.try_send(sample) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                dropped.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(%uuid, "Position queue full, dropping sample");
                            }
                            Err(TrySendError::Disconnected(_)) => break,
                        },
                        Err(e) => {
                            tracing::warn!(%uuid, "No position sample: {e}");
                            thread::sleep(retry_period);
                        }
                    }
                }
                tracing::debug!(%uuid, "Sampling thread stopped");
            })?;

        self.receiver = Some(rx);
        self.handle = Some(SamplerHandle {
            _join_handle: join_handle,
            stop_signal,
        });
        tracing::info!(uuid = %self.uuid, capacity = self.capacity, "Position feed started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop_signal.store(true, Ordering::Relaxed);
        }
        // Dropping the receiver disconnects a thread blocked on a full queue.
        self.receiver = None;
    }

    fn latest(&mut self) -> Option<PositionSample> {
        if let Some(rx) = &self.receiver {
            // Drain everything, older samples are never processed as a backlog.
            while let Ok(sample) = rx.try_recv() {
                self.last = Some(sample);
            }
        }
        self.last
    }
}

impl<S: PositionSource> Drop for GpsFeed<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Instant;

    /// Yields a fixed number of samples without blocking, then reports the
    /// hardware missing forever.
    struct ScriptedSource {
        remaining: Vec<PositionSample>,
    }

    impl ScriptedSource {
        fn new(count: usize) -> Self {
            let remaining = (0..count)
                .rev()
                .map(|i| PositionSample::new(38.0, -121.0, i as f64, Utc::now()).unwrap())
                .collect();
            Self { remaining }
        }
    }

    impl PositionSource for ScriptedSource {
        fn read_fix(&mut self) -> Result<PositionSample> {
            self.remaining
                .pop()
                .ok_or_else(|| RoboSprayError::HardwareUnavailable(String::from("unplugged")))
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[rstest]
    #[case(91.0, 0.0)]
    #[case(-90.5, 0.0)]
    #[case(0.0, 180.1)]
    #[case(0.0, -181.0)]
    fn test_reject_out_of_range(#[case] latitude: f64, #[case] longitude: f64) {
        assert!(matches!(
            PositionSample::new(latitude, longitude, 0.0, Utc::now()),
            Err(RoboSprayError::InvalidPosition { .. })
        ));
    }

    #[rstest]
    #[case(90.0, 180.0)]
    #[case(-90.0, -180.0)]
    #[case(38.5, -121.75)]
    fn test_accept_in_range(#[case] latitude: f64, #[case] longitude: f64) {
        assert!(PositionSample::new(latitude, longitude, 0.0, Utc::now()).is_ok());
    }

    #[test]
    fn test_no_sample_before_start() {
        let mut feed = GpsFeed::new(ScriptedSource::new(3), 4, Duration::from_millis(1));
        assert_eq!(feed.latest(), None);
    }

    #[test]
    fn test_full_queue_drops_newest_and_latest_drains() {
        let mut feed = GpsFeed::new(ScriptedSource::new(5), 2, Duration::from_millis(1));
        feed.start().unwrap();

        wait_until(|| feed.dropped_samples() == 3);

        // Samples 0 and 1 were queued, 2..5 arrived on a full queue.
        let latest = feed.latest().unwrap();
        assert_eq!(latest.heading(), 1.0);
        // Drained, but the last sample is retained.
        assert_eq!(feed.latest(), Some(latest));
        feed.stop();
    }

    #[test]
    fn test_unavailable_hardware_means_no_sample() {
        let mut feed = GpsFeed::new(ScriptedSource::new(0), 2, Duration::from_millis(1));
        feed.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(feed.latest(), None);
        assert_eq!(feed.dropped_samples(), 0);
    }

    #[test]
    fn test_start_twice_errors() {
        let mut feed = GpsFeed::new(ScriptedSource::new(1), 2, Duration::from_millis(1));
        feed.start().unwrap();
        assert!(matches!(
            feed.start(),
            Err(RoboSprayError::HardwareUnavailable(_))
        ));
    }
}
