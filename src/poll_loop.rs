//! Timer-driven drain loop.
//!
//! Each tick hands the UE reserved region to the decoder (if BIOS handed it
//! over), acknowledges a pending overflow notification, then drains and
//! decodes every queued entry. A tick that fails gets one buffer
//! re-initialization attempt; if that also fails the loop terminates and the
//! process exits.

use std::time::Duration;

use crate::buffer::CircularBuffer;
use crate::error::{Result, SmmLoggerError};
use crate::protocol::flags;
use crate::rde::{RdeCommandHandler, RdeCommandType, RdeDecodeStatus};
use crate::region::DataRegion;

/// Orchestrates the circular buffer and the RDE command handler.
pub struct PollLoop<R: DataRegion> {
    buffer: CircularBuffer<R>,
    handler: RdeCommandHandler,
    read_interval: Duration,
    overflow_acks: u64,
}

impl<R: DataRegion> PollLoop<R> {
    /// Create a loop draining `buffer` into `handler` every `read_interval`.
    pub fn new(
        buffer: CircularBuffer<R>,
        handler: RdeCommandHandler,
        read_interval: Duration,
    ) -> Self {
        Self {
            buffer,
            handler,
            read_interval,
            overflow_acks: 0,
        }
    }

    /// The owned circular buffer.
    pub fn buffer_mut(&mut self) -> &mut CircularBuffer<R> {
        &mut self.buffer
    }

    /// The owned command handler.
    pub fn handler(&self) -> &RdeCommandHandler {
        &self.handler
    }

    /// Overflow notifications acknowledged since start.
    pub fn overflow_acks(&self) -> u64 {
        self.overflow_acks
    }

    /// Initialize the buffer and drain until a tick fails twice in a row.
    pub async fn run(mut self) -> Result<()> {
        self.buffer.initialize()?;
        let mut ticker = tokio::time::interval(self.read_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick() {
                tracing::error!(error = %e, "tick failed, re-initializing the buffer");
                // One recovery attempt; a second failure ends the loop.
                self.buffer.initialize()?;
            }
        }
    }

    /// Run one drain pass.
    pub fn tick(&mut self) -> Result<()> {
        self.drain_ue_region()?;

        if self.buffer.check_for_overflow_and_acknowledge()? {
            self.overflow_acks += 1;
            tracing::warn!(
                total = self.overflow_acks,
                "BIOS signalled a queue overflow; records may have been dropped"
            );
        }

        for (entry_header, payload) in self.buffer.read_error_logs()? {
            tracing::debug!(
                sequence = entry_header.sequence_id,
                bytes = payload.len(),
                "read an entry"
            );
            let status = match RdeCommandType::from_wire(entry_header.rde_command_type) {
                Some(command_type) => self.handler.decode(&payload, command_type),
                None => {
                    tracing::warn!(
                        command_type = entry_header.rde_command_type,
                        "invalid command type"
                    );
                    RdeDecodeStatus::InvalidCommand
                }
            };
            if status == RdeDecodeStatus::StopFlagReceived {
                // Full dictionary set received; tell BIOS we are ready for
                // encoded payloads.
                let ready = self.buffer.cached_header().bmc_flags | flags::BMC_READY;
                self.buffer.update_bmc_flags(ready)?;
            }
        }
        Ok(())
    }

    /// Decode the UE reserved region and hand it back to BIOS.
    fn drain_ue_region(&mut self) -> Result<()> {
        let Some(ue_log) = self.buffer.read_ue_log_from_reserved_region()? else {
            return Ok(());
        };
        let status = self
            .handler
            .decode(&ue_log, RdeCommandType::OperationInitRequest);
        if status != RdeDecodeStatus::Ok && status != RdeDecodeStatus::StopFlagReceived {
            return Err(SmmLoggerError::Buffer(format!(
                "UE log decode failed with status {status:?}"
            )));
        }
        // Toggle our UE_SWITCH bit to acknowledge consumption.
        let acked = self.buffer.cached_header().bmc_flags ^ flags::UE_SWITCH;
        self.buffer.update_bmc_flags(acked)?;
        Ok(())
    }
}
