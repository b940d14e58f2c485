//! Daemon entry point.
//!
//! Wires the mapped PCI window, the circular buffer, the RDE command handler
//! and the file sink together, then runs the drain loop until it terminates.

use smm_error_logger::config::DEFAULT_CONFIG_PATH;
use smm_error_logger::rde::{
    FileSink, JsonFileWriter, LoggingNotifier, PassthroughDecoder, RdeCommandHandler,
};
use smm_error_logger::region::PciRegion;
use smm_error_logger::{CircularBuffer, Config, PollLoop, Result};
use tracing_subscriber::EnvFilter;

/// Root of the published Redfish file tree.
const SINK_ROOT_PATH: &str = "/run/bmcweb";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::from_file(&config_path)?;
    tracing::info!(
        config = %config_path,
        queue_size = config.queue_size,
        ue_region_size = config.ue_region_size,
        "starting"
    );

    let region = PciRegion::open(config.memory_region_offset, config.memory_region_size)?;
    let buffer = CircularBuffer::new(region, config.buffer_params());

    let sink = FileSink::new(
        SINK_ROOT_PATH,
        Box::new(JsonFileWriter),
        Box::new(LoggingNotifier),
    );
    let handler = RdeCommandHandler::new(Box::new(PassthroughDecoder), Box::new(sink));

    let result = PollLoop::new(buffer, handler, config.poll_interval)
        .run()
        .await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "poll loop terminated");
    }
    result
}
