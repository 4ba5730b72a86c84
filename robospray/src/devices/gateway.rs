use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use strum_macros::IntoStaticStr;

/// Readiness reported by the bus gateway.
#[derive(IntoStaticStr, Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayState {
    /// No usable backend.
    Unavailable,
    /// Backend is up but not moving traffic.
    Idle,
    /// Backend is moving traffic.
    Running,
}

impl Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name: &'static str = self.into();
        write!(f, "{name}")
    }
}

/// A message as it sits on the bus: an id and up to eight data bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCanbusMessage {
    pub id: u32,
    pub data: Vec<u8>,
}

impl RawCanbusMessage {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

/// Acknowledgement returned by the gateway for every sent message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SendAck {
    pub success: bool,
}

/// Batch of messages read off the bus.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanbusBatch {
    pub messages: Vec<RawCanbusMessage>,
}

/// Commands handed to the gateway for sending.
pub type CommandStream = BoxStream<'static, RawCanbusMessage>;
/// Acknowledgements coming back from an outbound stream.
pub type AckStream = BoxStream<'static, Result<SendAck>>;
/// Batches coming back from an inbound stream.
pub type BatchStream = BoxStream<'static, Result<CanbusBatch>>;

/// Contract of the service that multiplexes messages onto the vehicle bus.
/// Opening a stream may fail with a transport fault; a returned stream
/// reports later faults as `Err` items or by ending.
#[async_trait]
pub trait BusGateway: Send + Sync {
    /// Current readiness, polled.
    async fn get_state(&self) -> GatewayState;

    /// Start sending `commands` on the bus. Yields one acknowledgement per
    /// sent command.
    async fn open_outbound_stream(&self, commands: CommandStream) -> Result<AckStream>;

    /// Start receiving messages from the bus.
    async fn open_inbound_stream(&self) -> Result<BatchStream>;
}
