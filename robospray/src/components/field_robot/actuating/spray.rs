use crate::{
    components::field_robot::{
        actuating::auto_spray::{ActuationDecision, AutoSprayConfig, SprayDecision},
        canbus::streaming::{SprayCommandOutbound, StreamSupervisor, VehicleStatusInbound},
        operator,
    },
    devices::{gateway::BusGateway, hardware::gps::PositionFeed},
    error::{Result, RoboSprayError},
    geofence::{catalog::GeofenceCatalog, index::GeofenceIndex},
    messages::{
        control::{operator::OperatorMessage, spray::SPRAY_CAN_ID},
        telemetry::vehicle::{VehicleStatus, VEHICLE_STATUS_CAN_ID},
    },
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::{
    ffi::OsStr,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
    time::{interval, MissedTickBehavior},
};
use uuid::Uuid;

/// Operator messages buffered between the listener and the decision task.
const OPERATOR_QUEUE: usize = 16;

/// Periods of the loops making up the spray controller.
#[serde_as]
#[derive(Deserialize, Serialize, Copy, Clone, PartialEq, Eq, Debug)]
#[serde(default)]
pub struct TimingConfig {
    /// Period between spray commands on the bus.
    #[serde(rename = "send_period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub send_period: Duration,
    /// Period between spray decisions.
    #[serde(rename = "decision_period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub decision_period: Duration,
    /// Gateway readiness poll interval, also the retry back off.
    #[serde(rename = "poll_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// Period between position fixes.
    #[serde(rename = "sample_period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sample_period: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            send_period: Duration::from_millis(20),
            decision_period: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
            sample_period: Duration::from_millis(300),
        }
    }
}

fn default_position_queue_capacity() -> usize {
    8
}

fn default_spray_can_id() -> u32 {
    SPRAY_CAN_ID
}

fn default_status_can_id() -> u32 {
    VEHICLE_STATUS_CAN_ID
}

/// Set the configuration for the field robot spray component.
#[derive(Deserialize, Serialize, PartialEq, Debug, Clone)]
pub struct SprayConfig {
    /// The addressable canbus interface ID.
    pub canbus_id: String,
    /// Port the operator control surface listens on.
    pub port: u16,
    /// GeoJSON catalog of the spray targets.
    pub catalog_path: PathBuf,
    /// Initial auto spray settings.
    #[serde(default)]
    pub auto_spray: AutoSprayConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Bound of the position sample queue.
    #[serde(default = "default_position_queue_capacity")]
    pub position_queue_capacity: usize,
    #[serde(default = "default_spray_can_id")]
    pub spray_can_id: u32,
    /// Id of the vehicle status frame watched on the inbound stream.
    #[serde(default = "default_status_can_id")]
    pub status_can_id: u32,
}

impl SprayConfig {
    /// Spray configuration with default timing and ids.
    ///
    /// * `canbus_id`: String for the bus i.e., can0.
    /// * `port`: operator port.
    /// * `catalog_path`: path to the geofence catalog.
    pub fn new<F: AsRef<OsStr>>(canbus_id: String, port: u16, catalog_path: F) -> Self {
        Self {
            canbus_id,
            port,
            catalog_path: (&catalog_path).into(),
            auto_spray: AutoSprayConfig::default(),
            timing: TimingConfig::default(),
            position_queue_capacity: default_position_queue_capacity(),
            spray_can_id: default_spray_can_id(),
            status_can_id: default_status_can_id(),
        }
    }

    /// Create a new `SprayConfig` by reading parameters stored in a file.
    /// Any field can be overridden from the environment, i.e.
    /// `ROBOSPRAY__CANBUS_ID=vcan0`.
    ///
    /// * `filepath`: filepath to the stored parameters.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        let file = Path::new(&filepath);
        if !file.is_file() {
            return Err(RoboSprayError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("could not locate the config file {file:?}"),
            )));
        }
        let config_file = config::Config::builder()
            .add_source(config::File::new(
                &file.to_string_lossy(),
                config::FileFormat::Yaml,
            ))
            .add_source(
                config::Environment::with_prefix("ROBOSPRAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config_file.try_deserialize::<SprayConfig>()?)
    }
}

/// Component for spraying over the geofenced targets from a field robot.
/// The geofence is loaded once at startup and shared read only.
pub struct SprayComponent {
    /// Unique identifier for the component.
    uuid: Uuid,
    config: SprayConfig,
    catalog: GeofenceCatalog,
    index: Arc<GeofenceIndex>,
}

impl SprayComponent {
    /// Create a new component from a config struct. Fails when the
    /// catalog cannot be read or holds no targets.
    ///
    /// * `config`: Struct containing the parameters for configuration.
    pub fn new(config: SprayConfig) -> Result<Self> {
        let catalog = GeofenceCatalog::from_file(&config.catalog_path)?;
        if catalog.is_empty() {
            return Err(RoboSprayError::EmptyIndex);
        }
        let index = Arc::new(GeofenceIndex::build(&catalog));
        let uuid = Uuid::new_v4();
        tracing::info!(%uuid, targets = index.len(), catalog = ?config.catalog_path, "Geofence loaded");
        Ok(Self {
            uuid,
            config,
            catalog,
            index,
        })
    }

    /// Create a new component by reading the config parameters from a file.
    ///
    /// * `filepath`: path to config file.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        Self::new(SprayConfig::from_file(filepath)?)
    }

    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn config(&self) -> &SprayConfig {
        &self.config
    }

    pub fn catalog(&self) -> &GeofenceCatalog {
        &self.catalog
    }

    pub fn index(&self) -> Arc<GeofenceIndex> {
        self.index.clone()
    }
}

/// Decision task. Drains the position feed every period and publishes the
/// decision. Operator messages are applied as soon as they arrive so that
/// switching auto spray off takes effect without waiting for the tick.
///
/// * `decision`: decision state, owned by this task.
/// * `feed`: position feed, already started.
/// * `operator`: operator messages.
/// * `publish`: where the decision is published for the command stream.
/// * `period`: decision period.
pub async fn run_decision_loop<F: PositionFeed>(
    mut decision: ActuationDecision,
    mut feed: F,
    mut operator: mpsc::Receiver<OperatorMessage>,
    publish: watch::Sender<SprayDecision>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut operator_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                decision.observe(feed.latest());
            }
            message = operator.recv(), if operator_open => match message {
                Some(message) => decision.apply(message),
                None => {
                    tracing::warn!("Operator surface closed, keeping current settings");
                    operator_open = false;
                    continue;
                }
            },
        }

        let next = decision.evaluate();
        let previous = publish.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Spray decision changed");
        }
    }
}

/// Log the vehicle status whenever its rendered form changes.
///
/// * `status`: receiver of the decoded status.
async fn log_vehicle_status(mut status: watch::Receiver<Option<VehicleStatus>>) {
    let mut last: Option<String> = None;
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        if let Some(current) = current {
            let rendered = current.to_string();
            if last.as_deref() != Some(rendered.as_str()) {
                tracing::info!(status = %rendered, "Vehicle status");
                last = Some(rendered);
            }
        }
    }
}

/// Wait for the operator listener or the first controller task to end,
/// whichever comes first. Every task runs forever, so one ending, panicked
/// or not, stops the controller.
///
/// * `tasks`: the controller tasks.
/// * `listener`: the operator listener.
async fn supervise<L>(tasks: &mut JoinSet<()>, listener: L) -> Result<()>
where
    L: Future<Output = Result<()>>,
{
    tokio::pin!(listener);
    tokio::select! {
        result = &mut listener => {
            if let Err(e) = &result {
                tracing::error!("Operator surface stopped: {e}");
            }
            result
        }
        Some(joined) = tasks.join_next() => {
            let reason = match joined {
                Ok(()) => String::from("task returned"),
                Err(e) if e.is_panic() => format!("task panicked: {e}"),
                Err(e) => format!("task cancelled: {e}"),
            };
            tracing::error!("Spray controller stopping, {reason}");
            Err(RoboSprayError::TaskStopped(reason))
        }
    }
}

/// Unit struct for adding controlling behaviour to the spray component.
pub struct SprayController;

impl SprayController {
    /// Start the spray component. Runs until the operator listener fails or
    /// any controller task ends, every other task is stopped when this
    /// returns.
    ///
    /// * `spray`: component.
    /// * `gateway`: bus gateway the commands go through.
    /// * `feed`: position feed, started here.
    pub async fn start<F>(spray: SprayComponent, gateway: Arc<dyn BusGateway>, mut feed: F) -> Result<()>
    where
        F: PositionFeed + 'static,
    {
        let config = spray.config;
        feed.start()?;

        let (decision_tx, decision_rx) = watch::channel(SprayDecision::Inactive);
        let (status_tx, status_rx) = watch::channel(None);
        let (operator_tx, operator_rx) = mpsc::channel(OPERATOR_QUEUE);

        let outbound = StreamSupervisor::new(
            gateway.clone(),
            SprayCommandOutbound::new(decision_rx, config.timing.send_period, config.spray_can_id),
            config.timing.poll_interval,
        );
        let inbound = StreamSupervisor::new(
            gateway,
            VehicleStatusInbound::new(config.status_can_id, status_tx),
            config.timing.poll_interval,
        );

        // Dropping the set aborts every task.
        let mut tasks = JoinSet::new();
        tasks.spawn(run_decision_loop(
            ActuationDecision::new(spray.index, config.auto_spray),
            feed,
            operator_rx,
            decision_tx,
            config.timing.decision_period,
        ));
        tasks.spawn(outbound.run());
        tasks.spawn(inbound.run());
        tasks.spawn(log_vehicle_status(status_rx));

        tracing::info!(uuid = %spray.uuid, canbus_id = %config.canbus_id, "Spray controller started");
        let result = supervise(&mut tasks, operator::listen(config.port, operator_tx)).await;
        tasks.shutdown().await;
        result
    }
}
