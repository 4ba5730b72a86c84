use crate::{
    devices::gateway::{
        AckStream, BatchStream, BusGateway, CanbusBatch, CommandStream, GatewayState,
        RawCanbusMessage, SendAck,
    },
    error::{Result, RoboSprayError},
};
use async_trait::async_trait;
use futures::{stream, SinkExt, StreamExt};
use socketcan::{tokio::CanSocket as AsyncCanSocket, CanFrame, EmbeddedFrame, ExtendedId, Id, StandardId};
use uuid::Uuid;

/// Bus gateway backed directly by a Linux SocketCAN interface. Each stream
/// opens its own socket so dropping a stream closes it.
pub struct SocketCanGateway {
    uuid: Uuid,
    /// Canbus interface name, i.e. can0.
    canbus_id: String,
}

impl SocketCanGateway {
    /// Create a gateway for an interface. Nothing is opened until a stream
    /// is requested.
    ///
    /// * `canbus_id`: interface name, i.e. can0.
    pub fn new(canbus_id: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            canbus_id: canbus_id.into(),
        }
    }

    /// Return the unique identifier of the gateway.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    fn open_socket(&self) -> Result<AsyncCanSocket> {
        AsyncCanSocket::open(&self.canbus_id).map_err(|e| {
            RoboSprayError::TransportFault(format!("failed to open {}: {e}", self.canbus_id))
        })
    }
}

/// Map the kernel operational state of the interface onto gateway
/// readiness. Virtual interfaces report `unknown` while usable.
///
/// * `operstate`: content of `/sys/class/net/<iface>/operstate`, if readable.
pub fn state_from_operstate(operstate: Option<&str>) -> GatewayState {
    match operstate.map(str::trim) {
        None => GatewayState::Unavailable,
        Some("up") | Some("unknown") => GatewayState::Running,
        Some(_) => GatewayState::Idle,
    }
}

/// Build a CAN frame, standard ids where they fit.
///
/// * `message`: message to put on the bus.
pub fn to_frame(message: &RawCanbusMessage) -> Result<CanFrame> {
    let id: Id = match u16::try_from(message.id).ok().and_then(StandardId::new) {
        Some(id) => id.into(),
        None => ExtendedId::new(message.id)
            .ok_or_else(|| {
                RoboSprayError::TransportFault(format!("invalid CAN id {:#x}", message.id))
            })?
            .into(),
    };
    CanFrame::new(id, &message.data).ok_or_else(|| {
        RoboSprayError::TransportFault(format!(
            "{} data bytes do not fit a CAN frame",
            message.data.len()
        ))
    })
}

/// Convert a received frame back into a raw message.
///
/// * `frame`: frame read off the socket.
pub fn from_frame(frame: &CanFrame) -> RawCanbusMessage {
    let id = match EmbeddedFrame::id(frame) {
        Id::Standard(id) => u32::from(id.as_raw()),
        Id::Extended(id) => id.as_raw(),
    };
    RawCanbusMessage::new(id, EmbeddedFrame::data(frame))
}

#[async_trait]
impl BusGateway for SocketCanGateway {
    async fn get_state(&self) -> GatewayState {
        let path = format!("/sys/class/net/{}/operstate", self.canbus_id);
        let operstate = tokio::fs::read_to_string(path).await.ok();
        state_from_operstate(operstate.as_deref())
    }

    async fn open_outbound_stream(&self, commands: CommandStream) -> Result<AckStream> {
        let socket = self.open_socket()?;
        tracing::debug!(uuid = %self.uuid, canbus_id = %self.canbus_id, "Outbound socket open");

        let acks = stream::unfold((socket, commands), |(mut socket, mut commands)| async move {
            let message = commands.next().await?;
            let ack = match to_frame(&message) {
                Ok(frame) => socket
                    .send(frame)
                    .await
                    .map(|()| SendAck { success: true })
                    .map_err(|e| RoboSprayError::TransportFault(format!("write failed: {e}"))),
                Err(e) => Err(e),
            };
            Some((ack, (socket, commands)))
        });
        Ok(acks.boxed())
    }

    async fn open_inbound_stream(&self) -> Result<BatchStream> {
        let socket = self.open_socket()?;
        tracing::debug!(uuid = %self.uuid, canbus_id = %self.canbus_id, "Inbound socket open");

        let batches = socket.map(|frame| {
            frame
                .map(|frame| CanbusBatch {
                    messages: vec![from_frame(&frame)],
                })
                .map_err(|e| RoboSprayError::TransportFault(format!("read failed: {e}")))
        });
        Ok(batches.boxed())
    }
}
