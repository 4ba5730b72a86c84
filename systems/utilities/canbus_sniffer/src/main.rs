//! Spray frame sniffer. Decodes the spray commands seen on the bus the way
//! the actuator does and logs every switch change.

use clap::Parser;
use futures::StreamExt;
use robospray::{
    devices::{gateway::BusGateway, hardware::canbus::SocketCanGateway},
    error::Result,
    messages::control::spray::{decode, SPRAY_CAN_ID},
    utils::logging,
};

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// CAN interface to listen on, i.e. can0.
    #[arg(short, long, default_value = "can0")]
    canbus_id: String,
    /// Id of the spray command.
    #[arg(long, default_value_t = SPRAY_CAN_ID)]
    spray_can_id: u32,
}

/// Switch driven by decoded frames.
#[derive(Default, Debug)]
struct Switch {
    on: Option<bool>,
}

impl Switch {
    /// Returns the new position when it changed.
    fn update(&mut self, on: bool) -> Option<bool> {
        if self.on == Some(on) {
            None
        } else {
            self.on = Some(on);
            Some(on)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let gateway = SocketCanGateway::new(args.canbus_id.clone());
    let mut batches = gateway.open_inbound_stream().await?;
    let mut switch = Switch::default();
    tracing::info!(canbus_id = %args.canbus_id, "Sniffing spray frames on {:#x}", args.spray_can_id);

    while let Some(batch) = batches.next().await {
        for message in batch?
            .messages
            .into_iter()
            .filter(|message| message.id == args.spray_can_id)
        {
            match decode(&message.data) {
                Ok(command) => {
                    if let Some(on) = switch.update(command.activate()) {
                        let position = if on { "ON" } else { "OFF" };
                        tracing::info!(state = %command.state(), "Switch {position}");
                    }
                }
                Err(e) => tracing::warn!("Malformed spray frame {:?}: {e}", message.data),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_reports_only_changes() {
        let mut switch = Switch::default();
        assert_eq!(switch.update(false), Some(false));
        assert_eq!(switch.update(false), None);
        assert_eq!(switch.update(true), Some(true));
        assert_eq!(switch.update(true), None);
        assert_eq!(switch.update(false), Some(false));
    }
}
