//! RDE module - command decoding, dictionary management, and output.
//!
//! This module implements the Redfish Device Enablement side of the agent:
//! - Multipart dictionary transfer reassembly with CRC-32 validation
//! - OperationInit payload decoding through a BEJ decoder
//! - Publishing decoded PDRs to a sink

mod decoder;
mod dictionary;
mod handler;
mod storer;

pub use decoder::{BejDecodeError, BejDecoder, BejDictionaries, PassthroughDecoder};
pub use dictionary::{DictionaryManager, ANNOTATION_RESOURCE_ID};
pub use handler::{
    transfer_flag, MultipartReceiveHeader, RdeCommandHandler, RdeCommandType, RdeDecodeStatus,
    RdeOperationInitHeader, MULTIPART_HEADER_SIZE, OP_INIT_HEADER_SIZE, OP_INIT_OPERATION_UPDATE,
};
pub use storer::{
    EntryNotifier, FileHandler, FileSink, JsonFileWriter, LoggingNotifier, Sink,
};
