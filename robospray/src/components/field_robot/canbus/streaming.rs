use crate::{
    components::field_robot::actuating::auto_spray::SprayDecision,
    devices::gateway::{BusGateway, CanbusBatch, CommandStream, GatewayState, RawCanbusMessage, SendAck},
    error::{Result, RoboSprayError},
    messages::{
        control::spray::{ActuatorCommand, ControlState},
        telemetry::vehicle::VehicleStatus,
    },
};
use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{interval, sleep, timeout_at, Instant, MissedTickBehavior},
};

/// State of one supervised stream direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// No usable backend, or waiting for one after a fault.
    WaitingForService,
    /// A stream is open and being serviced.
    StreamActive,
    /// The stream raised an error and was discarded. Becomes
    /// `WaitingForService` on the next readiness poll.
    Faulted,
}

impl Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::WaitingForService => write!(f, "WAITING_FOR_SERVICE"),
            StreamState::StreamActive => write!(f, "STREAM_ACTIVE"),
            StreamState::Faulted => write!(f, "FAULTED"),
        }
    }
}

/// One direction of traffic with the gateway. The supervisor owns the
/// stream lifecycle, the direction decides when the gateway is usable,
/// how a stream is opened and what to do with each item.
#[async_trait]
pub trait StreamDirection: Send {
    type Item: Send + 'static;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Whether a stream may be open in the given gateway state.
    fn accepts(&self, state: GatewayState) -> bool;

    /// Open a fresh stream.
    async fn open(&mut self, gateway: &dyn BusGateway) -> Result<BoxStream<'static, Result<Self::Item>>>;

    /// Handle one item. An error faults the stream.
    fn on_item(&mut self, item: Self::Item) -> Result<()>;
}

/// Keeps one stream direction alive against a gateway whose availability
/// comes and goes. The readiness poll interval doubles as the retry back
/// off after a fault.
pub struct StreamSupervisor<D: StreamDirection> {
    gateway: Arc<dyn BusGateway>,
    direction: D,
    poll_interval: Duration,
    state: StreamState,
    stream: Option<BoxStream<'static, Result<D::Item>>>,
    streams_opened: u64,
}

impl<D: StreamDirection> StreamSupervisor<D> {
    /// Create a supervisor, nothing is opened until the first step.
    ///
    /// * `gateway`: the bus gateway.
    /// * `direction`: direction being supervised.
    /// * `poll_interval`: readiness poll interval.
    pub fn new(gateway: Arc<dyn BusGateway>, direction: D, poll_interval: Duration) -> Self {
        Self {
            gateway,
            direction,
            poll_interval,
            state: StreamState::WaitingForService,
            stream: None,
            streams_opened: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Number of streams opened so far.
    pub fn streams_opened(&self) -> u64 {
        self.streams_opened
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn direction(&self) -> &D {
        &self.direction
    }

    /// Run forever. Stops only when the owning task is cancelled.
    pub async fn run(mut self) {
        loop {
            self.step().await;
        }
    }

    /// One readiness poll followed by at most one poll interval of stream
    /// servicing. Returns the state after the step.
    pub async fn step(&mut self) -> StreamState {
        let name = self.direction.name();
        if self.state == StreamState::Faulted {
            // The poll interval is the retry back off, a stream that fails
            // on open must not spin.
            sleep(self.poll_interval).await;
            self.transition(StreamState::WaitingForService);
        }

        let readiness = self.gateway.get_state().await;
        if !self.direction.accepts(readiness) {
            if self.stream.take().is_some() {
                tracing::warn!(direction = name, %readiness, "Gateway not ready, stream discarded");
            } else {
                tracing::debug!(direction = name, %readiness, "Waiting for gateway");
            }
            self.transition(StreamState::WaitingForService);
            sleep(self.poll_interval).await;
            return self.state;
        }

        if self.stream.is_none() {
            match self.direction.open(self.gateway.as_ref()).await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.streams_opened += 1;
                    tracing::info!(direction = name, count = self.streams_opened, "Stream opened");
                    self.transition(StreamState::StreamActive);
                }
                Err(e) => {
                    tracing::warn!(direction = name, "Failed to open stream: {e}");
                    self.transition(StreamState::WaitingForService);
                    sleep(self.poll_interval).await;
                    return self.state;
                }
            }
        }

        self.service(Instant::now() + self.poll_interval).await;
        self.state
    }

    /// Read the open stream until the deadline or a fault.
    async fn service(&mut self, deadline: Instant) {
        while let Some(stream) = self.stream.as_mut() {
            match timeout_at(deadline, stream.next()).await {
                // Time to poll readiness again, keep the stream.
                Err(_) => break,
                Ok(Some(Ok(item))) => {
                    if let Err(e) = self.direction.on_item(item) {
                        self.fault(e);
                    }
                }
                Ok(Some(Err(e))) => self.fault(e),
                Ok(None) => self.fault(RoboSprayError::TransportFault(String::from(
                    "unexpected end of stream",
                ))),
            }
        }
    }

    fn fault(&mut self, error: RoboSprayError) {
        tracing::warn!(direction = self.direction.name(), "Stream faulted: {error}");
        self.stream = None;
        self.transition(StreamState::Faulted);
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            tracing::debug!(direction = self.direction.name(), from = %self.state, to = %next, "Stream state");
            self.state = next;
        }
    }
}

/// Build the command stream sent to the gateway: one spray command per
/// tick, always in `AUTO_ACTIVE`, carrying the decision current at that
/// tick. Late ticks are skipped and logged, the actuator has no timeout
/// of its own.
///
/// * `decision`: receiver of the actuation decision.
/// * `period`: send period.
/// * `can_id`: id of the spray command.
pub fn spray_command_stream(
    decision: watch::Receiver<SprayDecision>,
    period: Duration,
    can_id: u32,
) -> CommandStream {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    stream::unfold((ticker, decision), move |(mut ticker, decision)| async move {
        let scheduled = ticker.tick().await;
        let lateness = Instant::now().saturating_duration_since(scheduled);
        if lateness > period {
            tracing::warn!(?lateness, "Spray send tick late");
        }
        let activate = decision.borrow().is_active();
        let command = ActuatorCommand::new(ControlState::AutoActive, activate);
        let message = RawCanbusMessage::new(can_id, command.encode());
        Some((message, (ticker, decision)))
    })
    .boxed()
}

/// Outbound direction: streams spray commands, requires `RUNNING`.
pub struct SprayCommandOutbound {
    decision: watch::Receiver<SprayDecision>,
    send_period: Duration,
    can_id: u32,
    acks: u64,
}

impl SprayCommandOutbound {
    /// * `decision`: receiver of the actuation decision.
    /// * `send_period`: period between commands.
    /// * `can_id`: id of the spray command.
    pub fn new(decision: watch::Receiver<SprayDecision>, send_period: Duration, can_id: u32) -> Self {
        Self {
            decision,
            send_period,
            can_id,
            acks: 0,
        }
    }

    /// Successful acknowledgements received.
    pub fn acks(&self) -> u64 {
        self.acks
    }
}

#[async_trait]
impl StreamDirection for SprayCommandOutbound {
    type Item = SendAck;

    fn name(&self) -> &'static str {
        "outbound"
    }

    fn accepts(&self, state: GatewayState) -> bool {
        state == GatewayState::Running
    }

    async fn open(&mut self, gateway: &dyn BusGateway) -> Result<BoxStream<'static, Result<SendAck>>> {
        let commands = spray_command_stream(self.decision.clone(), self.send_period, self.can_id);
        gateway.open_outbound_stream(commands).await
    }

    fn on_item(&mut self, ack: SendAck) -> Result<()> {
        if !ack.success {
            return Err(RoboSprayError::TransportFault(String::from(
                "gateway rejected spray command",
            )));
        }
        self.acks += 1;
        Ok(())
    }
}

/// Inbound direction: watches the bus for vehicle status frames, accepts
/// `IDLE` or `RUNNING`. A malformed status frame is logged and skipped,
/// it does not fault the stream.
pub struct VehicleStatusInbound {
    status_can_id: u32,
    status: watch::Sender<Option<VehicleStatus>>,
}

impl VehicleStatusInbound {
    /// * `status_can_id`: id of the status frame.
    /// * `status`: where decoded status is published.
    pub fn new(status_can_id: u32, status: watch::Sender<Option<VehicleStatus>>) -> Self {
        Self {
            status_can_id,
            status,
        }
    }
}

#[async_trait]
impl StreamDirection for VehicleStatusInbound {
    type Item = CanbusBatch;

    fn name(&self) -> &'static str {
        "inbound"
    }

    fn accepts(&self, state: GatewayState) -> bool {
        matches!(state, GatewayState::Idle | GatewayState::Running)
    }

    async fn open(&mut self, gateway: &dyn BusGateway) -> Result<BoxStream<'static, Result<CanbusBatch>>> {
        gateway.open_inbound_stream().await
    }

    fn on_item(&mut self, batch: CanbusBatch) -> Result<()> {
        for message in batch
            .messages
            .iter()
            .filter(|message| message.id == self.status_can_id)
        {
            match VehicleStatus::decode(&message.data) {
                Ok(status) => {
                    self.status.send_replace(Some(status));
                }
                Err(e) => tracing::warn!("Malformed vehicle status {:?}: {e}", message.data),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        devices::gateway::{AckStream, BatchStream},
        messages::control::spray::{decode, DecodedCommand, LegacyCommand},
    };
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    /// Counts live streams, decremented when the stream owning it drops.
    struct LiveGuard(Arc<AtomicUsize>);

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Gateway replaying a scripted readiness sequence. The last state
    /// repeats. Outbound streams fault immediately while `faults` remain,
    /// then stay silent.
    struct ScriptedGateway {
        states: Mutex<VecDeque<GatewayState>>,
        outbound_faults: Mutex<usize>,
        inbound_batches: Mutex<Vec<CanbusBatch>>,
        opened: AtomicUsize,
        live: Arc<AtomicUsize>,
        max_live: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(states: Vec<GatewayState>, outbound_faults: usize) -> Self {
            Self {
                states: Mutex::new(states.into()),
                outbound_faults: Mutex::new(outbound_faults),
                inbound_batches: Mutex::new(Vec::new()),
                opened: AtomicUsize::new(0),
                live: Arc::new(AtomicUsize::new(0)),
                max_live: AtomicUsize::new(0),
            }
        }

        fn track_open(&self) -> LiveGuard {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(live, Ordering::SeqCst);
            LiveGuard(self.live.clone())
        }
    }

    #[async_trait]
    impl BusGateway for ScriptedGateway {
        async fn get_state(&self) -> GatewayState {
            let mut states = self.states.lock().unwrap();
            if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                states[0]
            }
        }

        async fn open_outbound_stream(&self, commands: CommandStream) -> Result<AckStream> {
            let guard = self.track_open();
            let mut faults = self.outbound_faults.lock().unwrap();
            let acks: AckStream = if *faults > 0 {
                *faults -= 1;
                stream::iter(vec![Err(RoboSprayError::TransportFault(String::from("bus off")))])
                    .chain(stream::pending())
                    .boxed()
            } else {
                // Acknowledge every command that the loop generates.
                commands.map(|_| Ok(SendAck { success: true })).boxed()
            };
            Ok(acks
                .map(move |ack| {
                    let _ = &guard;
                    ack
                })
                .boxed())
        }

        async fn open_inbound_stream(&self) -> Result<BatchStream> {
            let guard = self.track_open();
            let batches: Vec<Result<CanbusBatch>> = self
                .inbound_batches
                .lock()
                .unwrap()
                .drain(..)
                .map(Ok)
                .collect();
            Ok(stream::iter(batches)
                .chain(stream::pending())
                .map(move |batch| {
                    let _ = &guard;
                    batch
                })
                .boxed())
        }
    }

    fn outbound(
        gateway: Arc<ScriptedGateway>,
        decision: watch::Receiver<SprayDecision>,
    ) -> StreamSupervisor<SprayCommandOutbound> {
        StreamSupervisor::new(
            gateway,
            SprayCommandOutbound::new(decision, Duration::from_millis(20), 0x777),
            Duration::from_millis(100),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_recovery_opens_one_stream_per_running_entry() {
        let gateway = Arc::new(ScriptedGateway::new(
            vec![
                GatewayState::Unavailable,
                GatewayState::Running,
                GatewayState::Running,
            ],
            1,
        ));
        let (_tx, rx) = watch::channel(SprayDecision::Inactive);
        let mut supervisor = outbound(gateway.clone(), rx);

        assert_eq!(supervisor.step().await, StreamState::WaitingForService);
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 0);

        // RUNNING, the first stream faults straight away.
        assert_eq!(supervisor.step().await, StreamState::Faulted);
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 1);
        assert!(!supervisor.has_stream());
        assert_eq!(gateway.live.load(Ordering::SeqCst), 0);

        // RUNNING again after the discard, exactly one new stream.
        assert_eq!(supervisor.step().await, StreamState::StreamActive);
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 2);

        // Still RUNNING, the open stream is kept.
        for _ in 0..3 {
            assert_eq!(supervisor.step().await, StreamState::StreamActive);
        }
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.streams_opened(), 2);
        assert_eq!(gateway.live.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.max_live.load(Ordering::SeqCst), 1);
        assert!(supervisor.direction().acks() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_after_fault_waits_one_poll_interval() {
        let gateway = Arc::new(ScriptedGateway::new(vec![GatewayState::Running], 5));
        let (_tx, rx) = watch::channel(SprayDecision::Inactive);
        let mut supervisor = outbound(gateway.clone(), rx);

        let start = Instant::now();
        for expected in 1..=5 {
            assert_eq!(supervisor.step().await, StreamState::Faulted);
            assert_eq!(gateway.opened.load(Ordering::SeqCst), expected);
        }
        // Four reopens, each after a full poll interval.
        assert!(
            start.elapsed() >= Duration::from_millis(400),
            "reopened 5 streams in {:?}",
            start.elapsed()
        );
        assert!(start.elapsed() < Duration::from_millis(500));

        // Faults exhausted, the next stream stays up.
        assert_eq!(supervisor.step().await, StreamState::StreamActive);
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_discards_stream_when_gateway_leaves_running() {
        let gateway = Arc::new(ScriptedGateway::new(
            vec![
                GatewayState::Running,
                GatewayState::Idle,
                GatewayState::Running,
            ],
            0,
        ));
        let (_tx, rx) = watch::channel(SprayDecision::Inactive);
        let mut supervisor = outbound(gateway.clone(), rx);

        assert_eq!(supervisor.step().await, StreamState::StreamActive);
        // Outbound needs RUNNING specifically.
        assert_eq!(supervisor.step().await, StreamState::WaitingForService);
        assert_eq!(gateway.live.load(Ordering::SeqCst), 0);
        assert_eq!(supervisor.step().await, StreamState::StreamActive);
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_accepts_idle_and_publishes_status() {
        let gateway = Arc::new(ScriptedGateway::new(vec![GatewayState::Idle], 0));
        let status = LegacyCommand::new(ControlState::AutoActive, 0.5, 0.0).encode();
        *gateway.inbound_batches.lock().unwrap() = vec![CanbusBatch {
            messages: vec![
                RawCanbusMessage::new(0x777, vec![5, 1, 0, 0]),
                // Malformed status frame, skipped without faulting.
                RawCanbusMessage::new(0x18E, vec![5, 0]),
                RawCanbusMessage::new(0x18E, status.to_vec()),
            ],
        }];
        let (status_tx, status_rx) = watch::channel(None);
        let mut supervisor = StreamSupervisor::new(
            gateway.clone(),
            VehicleStatusInbound::new(0x18E, status_tx),
            Duration::from_millis(100),
        );

        assert_eq!(supervisor.step().await, StreamState::StreamActive);
        let status = *status_rx.borrow();
        assert_eq!(
            status.map(|status| status.to_string()),
            Some(String::from("state AUTO_ACTIVE speed 0.500 rate 0.000"))
        );
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_stream_follows_decision() {
        let (tx, rx) = watch::channel(SprayDecision::Inactive);
        let mut commands = spray_command_stream(rx, Duration::from_millis(20), 0x777);

        let message = commands.next().await.unwrap();
        assert_eq!(message.id, 0x777);
        assert_eq!(
            decode(&message.data).unwrap(),
            DecodedCommand::Current(ActuatorCommand::new(ControlState::AutoActive, false))
        );

        tx.send_replace(SprayDecision::Active);
        let message = commands.next().await.unwrap();
        assert_eq!(message.data, vec![5, 1, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_stream_keeps_cadence() {
        let (_tx, rx) = watch::channel(SprayDecision::Inactive);
        let mut commands = spray_command_stream(rx, Duration::from_millis(20), 0x777);
        let start = Instant::now();
        for _ in 0..51 {
            commands.next().await.unwrap();
        }
        // First tick fires immediately, 50 more at 20 ms.
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
    }

    #[test]
    fn test_negative_ack_faults() {
        let (_tx, rx) = watch::channel(SprayDecision::Inactive);
        let mut direction = SprayCommandOutbound::new(rx, Duration::from_millis(20), 0x777);
        assert!(direction.on_item(SendAck { success: true }).is_ok());
        assert!(matches!(
            direction.on_item(SendAck { success: false }),
            Err(RoboSprayError::TransportFault(_))
        ));
    }
}
