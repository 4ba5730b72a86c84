//! Field robot spray system binary

use clap::Parser;
use robospray::{
    components::prelude::*,
    devices::{
        hardware::{canbus::SocketCanGateway, gps::GpsFeed},
        software::simulated_gps::SimulatedGps,
    },
    error::Result,
    utils::logging,
};
use std::sync::Arc;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the Spray Component.
    #[arg(short, long)]
    filepath: String,
    /// CAN interface to use instead of the one in the config file.
    #[arg(short, long)]
    canbus_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let component = SprayComponent::from_config_file(args.filepath)?;

    let config = component.config();
    let canbus_id = args.canbus_id.unwrap_or_else(|| config.canbus_id.clone());
    let gateway = Arc::new(SocketCanGateway::new(canbus_id));
    // No receiver on the bench rig yet, replay the catalog instead.
    let source = SimulatedGps::new(component.catalog(), config.timing.sample_period);
    let feed = GpsFeed::new(
        source,
        config.position_queue_capacity,
        config.timing.sample_period,
    );

    SprayController::start(component, gateway, feed).await
}
