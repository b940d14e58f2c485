//! Protocol module - wire formats shared with the BIOS producer.
//!
//! This module implements the binary layouts of the mailbox protocol:
//! - 48-byte circular buffer header encoding/decoding
//! - 6-byte queue entry header encoding/decoding
//! - Flag word bit definitions and toggle helpers

mod wire_format;

pub use wire_format::{
    flags, read_u24_le, write_u24_le, BufferHeader, QueueEntryHeader, BMC_FLAGS_OFFSET,
    BMC_READ_PTR_OFFSET, BUFFER_HEADER_SIZE, ENTRY_HEADER_SIZE, UE_REGION_OFFSET,
};
