//! # smm-error-logger
//!
//! BMC-side agent that drains BIOS-produced error records from a shared
//! memory-mapped region, decodes them from their BEJ encoding against
//! dictionary-based schemas, and publishes the resulting JSON records to
//! downstream consumers.
//!
//! ## Architecture
//!
//! - **Mailbox** ([`buffer`], [`protocol`]): circular-buffer protocol between
//!   the BIOS producer and this consumer, with header caching, pointer
//!   updates, flag acknowledgement, and checksummed entries
//! - **RDE** ([`rde`]): command multiplexer that reassembles CRC-validated
//!   BEJ dictionaries and decodes payloads against them
//! - **Loop** ([`poll_loop`]): timer-driven orchestrator tying the two
//!   together, with single-shot recovery via buffer re-initialization
//!
//! ## Example
//!
//! ```ignore
//! use smm_error_logger::rde::{FileSink, JsonFileWriter, LoggingNotifier};
//! use smm_error_logger::rde::{PassthroughDecoder, RdeCommandHandler};
//! use smm_error_logger::region::PciRegion;
//! use smm_error_logger::{CircularBuffer, Config, PollLoop};
//!
//! #[tokio::main]
//! async fn main() -> smm_error_logger::Result<()> {
//!     let config = Config::from_file("/usr/share/smm-error-logger/config.json")?;
//!     let region = PciRegion::open(config.memory_region_offset, config.memory_region_size)?;
//!     let buffer = CircularBuffer::new(region, config.buffer_params());
//!     let sink = FileSink::new(
//!         "/run/bmcweb",
//!         Box::new(JsonFileWriter),
//!         Box::new(LoggingNotifier),
//!     );
//!     let handler = RdeCommandHandler::new(Box::new(PassthroughDecoder), Box::new(sink));
//!     PollLoop::new(buffer, handler, config.poll_interval).run().await
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod poll_loop;
pub mod protocol;
pub mod rde;
pub mod region;

pub use buffer::{BufferParams, CircularBuffer, EntryPair};
pub use config::Config;
pub use error::{Result, SmmLoggerError};
pub use poll_loop::PollLoop;
