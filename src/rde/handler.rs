//! RDE command multiplexer.
//!
//! Queue entries carry one of two command kinds: `MultiPartReceiveResponse`
//! frames transfer BEJ dictionaries in chunks, `OperationInitRequest` frames
//! carry BEJ-encoded PDR payloads to decode against those dictionaries.
//!
//! Dictionary transfers run a two-state machine:
//!
//! ```text
//! Idle          --Start-------> StartReceived
//! Idle          --StartAndEnd-> Idle            (single-frame dictionary)
//! StartReceived --Middle------> StartReceived
//! StartReceived --End---------> Idle
//! ```
//!
//! BIOS sends the Start flag only for the first dictionary of a batch;
//! subsequent dictionaries are detected by a change of resource ID in Middle
//! or End frames. A running CRC-32 covers the concatenated data bytes of one
//! batch and is checked against the 4-byte trailer of the End or StartAndEnd
//! frame; a mismatch invalidates every dictionary so the next Start restarts
//! from scratch.

use super::decoder::{BejDecoder, BejDictionaries};
use super::dictionary::DictionaryManager;
use super::storer::Sink;

/// CRC-32 divisor, reflected form, as used by IEEE 802.3.
const CRC_DIVISOR: u32 = 0xedb88320;

/// `operation_type` value for an RDE Update operation.
pub const OP_INIT_OPERATION_UPDATE: u8 = 1;

/// Supported RDE commands. The wire values are the ones BIOS uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdeCommandType {
    /// RDE BEJ dictionary transfer.
    MultiPartReceiveResponse = 1,
    /// RDE BEJ encoded payload.
    OperationInitRequest = 2,
}

impl RdeCommandType {
    /// Map a wire byte to a command type.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::MultiPartReceiveResponse),
            2 => Some(Self::OperationInitRequest),
            _ => None,
        }
    }
}

/// Transfer flag values of a MultipartReceive frame.
pub mod transfer_flag {
    /// First chunk of a dictionary batch.
    pub const START: u8 = 0;
    /// Continuation chunk.
    pub const MIDDLE: u8 = 1;
    /// Final chunk, carries the checksum trailer.
    pub const END: u8 = 2;
    /// Complete dictionary in a single chunk, carries the trailer.
    pub const START_AND_END: u8 = 3;
}

/// Status of RDE command processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdeDecodeStatus {
    /// Command processed.
    Ok,
    /// Malformed or unknown command.
    InvalidCommand,
    /// OperationInit carried an operation other than Update.
    UnsupportedOperation,
    /// Schema or annotation dictionary missing or incomplete.
    NoDictionary,
    /// OperationInit payload did not fit in a single request.
    PayloadOverflow,
    /// BEJ decoder rejected the payload.
    BejDecodingError,
    /// Middle or End frame without a preceding Start.
    InvalidPktOrder,
    /// Dictionary store rejected a data chunk.
    DictionaryError,
    /// Sink could not create an output file.
    FileCreationFailed,
    /// Sink rejected the decoded JSON.
    ExternalStorerError,
    /// Dictionary batch checksum mismatch; the store was invalidated.
    InvalidChecksum,
    /// Stop flag received with a matching checksum.
    StopFlagReceived,
}

/// Tracks reception of the multipart Start flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferFlagState {
    Idle,
    StartReceived,
}

/// RDEOperationInit request header (17 bytes, packed little-endian).
#[derive(Debug, Clone, Copy)]
pub struct RdeOperationInitHeader {
    pub resource_id: u32,
    pub operation_id: u16,
    pub operation_type: u8,
    pub flags: u8,
    pub send_data_transfer_handle: u32,
    pub operation_locator_length: u8,
    pub request_payload_length: u32,
}

/// RDEOperationInit header size in bytes.
pub const OP_INIT_HEADER_SIZE: usize = 17;

impl RdeOperationInitHeader {
    /// Decode a header from wire bytes, `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < OP_INIT_HEADER_SIZE {
            return None;
        }
        Some(Self {
            resource_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            operation_id: u16::from_le_bytes([buf[4], buf[5]]),
            operation_type: buf[6],
            flags: buf[7],
            send_data_transfer_handle: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            operation_locator_length: buf[12],
            request_payload_length: u32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]),
        })
    }

    /// Whether the request carries a BEJ payload (flags bit 1).
    pub fn contains_request_payload(&self) -> bool {
        self.flags & 0b10 != 0
    }
}

/// MultipartReceive response header (10 bytes, packed little-endian).
///
/// `next_data_transfer_handle` is repurposed by BIOS to carry the resource ID
/// of the dictionary being transferred.
#[derive(Debug, Clone, Copy)]
pub struct MultipartReceiveHeader {
    pub completion_code: u8,
    pub transfer_flag: u8,
    pub next_data_transfer_handle: u32,
    pub data_length_bytes: u32,
}

/// MultipartReceive header size in bytes.
pub const MULTIPART_HEADER_SIZE: usize = 10;

impl MultipartReceiveHeader {
    /// Decode a header from wire bytes, `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < MULTIPART_HEADER_SIZE {
            return None;
        }
        Some(Self {
            completion_code: buf[0],
            transfer_flag: buf[1],
            next_data_transfer_handle: u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            data_length_bytes: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }
}

/// Stateful decoder of RDE commands drained from the mailbox.
pub struct RdeCommandHandler {
    flag_state: TransferFlagState,
    /// Resource ID of the last dictionary chunk. A differing ID on a Middle
    /// or End frame means BIOS moved on to the next dictionary of the batch.
    prev_dict_resource_id: u32,
    dictionaries: DictionaryManager,
    decoder: Box<dyn BejDecoder>,
    sink: Box<dyn Sink>,
    crc: u32,
    crc_table: [u32; 256],
    /// Times a Middle/End frame switched resource mid-batch. The running CRC
    /// deliberately survives the switch; BIOS checksums a batch as one unit.
    crossed_resource_transfers: u64,
}

impl RdeCommandHandler {
    /// Create a handler that decodes with `decoder` and publishes to `sink`.
    pub fn new(decoder: Box<dyn BejDecoder>, sink: Box<dyn Sink>) -> Self {
        Self {
            flag_state: TransferFlagState::Idle,
            prev_dict_resource_id: 0,
            dictionaries: DictionaryManager::new(),
            decoder,
            sink,
            crc: 0xFFFF_FFFF,
            crc_table: build_crc_table(),
            crossed_resource_transfers: 0,
        }
    }

    /// Decode one RDE command.
    pub fn decode(&mut self, command: &[u8], command_type: RdeCommandType) -> RdeDecodeStatus {
        match command_type {
            RdeCommandType::MultiPartReceiveResponse => self.multi_part_receive(command),
            RdeCommandType::OperationInitRequest => self.operation_init(command),
        }
    }

    /// Number of complete dictionaries received.
    pub fn dictionary_count(&self) -> u32 {
        self.dictionaries.count()
    }

    /// Times a multipart frame switched resource mid-batch.
    pub fn crossed_resource_transfers(&self) -> u64 {
        self.crossed_resource_transfers
    }

    fn operation_init(&mut self, command: &[u8]) -> RdeDecodeStatus {
        let Some(header) = RdeOperationInitHeader::decode(command) else {
            tracing::warn!(len = command.len(), "OperationInit command too short");
            return RdeDecodeStatus::InvalidCommand;
        };
        if !header.contains_request_payload() {
            return RdeDecodeStatus::Ok;
        }
        if header.operation_type != OP_INIT_OPERATION_UPDATE {
            tracing::warn!(
                operation_type = header.operation_type,
                "operation not supported"
            );
            return RdeDecodeStatus::UnsupportedOperation;
        }
        // Payloads split across multiple requests are not supported.
        if header.send_data_transfer_handle != 0 {
            tracing::warn!("OperationInit payload should fit within the request");
            return RdeDecodeStatus::PayloadOverflow;
        }

        // The BEJ locator sits between the header and the encoded payload.
        let payload_start = OP_INIT_HEADER_SIZE + header.operation_locator_length as usize;
        let payload_end = payload_start + header.request_payload_length as usize;
        if payload_end > command.len() {
            tracing::warn!(
                declared = header.request_payload_length,
                available = command.len(),
                "OperationInit payload exceeds the command"
            );
            return RdeDecodeStatus::InvalidCommand;
        }

        let Some(schema) = self.dictionaries.get(header.resource_id) else {
            tracing::warn!(
                resource_id = header.resource_id,
                "schema dictionary not found"
            );
            return RdeDecodeStatus::NoDictionary;
        };
        let Some(annotation) = self.dictionaries.annotation() else {
            tracing::warn!("annotation dictionary not found");
            return RdeDecodeStatus::NoDictionary;
        };
        let dictionaries = BejDictionaries {
            schema,
            annotation,
            // The error dictionary is not used.
            error: None,
        };

        match self
            .decoder
            .decode(&dictionaries, &command[payload_start..payload_end])
        {
            Ok(json) => {
                if !self.sink.publish_json(&json) {
                    tracing::error!("failed to publish decoded PDR");
                    return RdeDecodeStatus::ExternalStorerError;
                }
                RdeDecodeStatus::Ok
            }
            Err(e) => {
                tracing::warn!(error = %e, "BEJ decoding failed");
                RdeDecodeStatus::BejDecodingError
            }
        }
    }

    fn multi_part_receive(&mut self, command: &[u8]) -> RdeDecodeStatus {
        let Some(header) = MultipartReceiveHeader::decode(command) else {
            tracing::warn!(len = command.len(), "MultipartReceive command too short");
            return RdeDecodeStatus::InvalidCommand;
        };

        let data_len = header.data_length_bytes as usize;
        let trailer_len = match header.transfer_flag {
            transfer_flag::START | transfer_flag::MIDDLE => 0,
            transfer_flag::END | transfer_flag::START_AND_END => 4,
            flag => {
                tracing::warn!(flag, "invalid transfer flag");
                return RdeDecodeStatus::InvalidCommand;
            }
        };
        if command.len() < MULTIPART_HEADER_SIZE + data_len + trailer_len {
            tracing::warn!(
                declared = data_len,
                available = command.len(),
                "MultipartReceive data exceeds the command"
            );
            return RdeDecodeStatus::InvalidCommand;
        }

        let resource_id = header.next_data_transfer_handle;
        let data = &command[MULTIPART_HEADER_SIZE..MULTIPART_HEADER_SIZE + data_len];

        let status = match header.transfer_flag {
            transfer_flag::START => self.handle_flag_start(resource_id, data),
            transfer_flag::MIDDLE => self.handle_flag_middle(resource_id, data),
            transfer_flag::END => self.handle_flag_end(command, resource_id, data),
            transfer_flag::START_AND_END => self.handle_flag_start_and_end(command, resource_id, data),
            _ => unreachable!("unknown flags rejected above"),
        };

        // Updated even on failure: the CRC state has already advanced.
        self.prev_dict_resource_id = resource_id;
        status
    }

    fn handle_flag_start(&mut self, resource_id: u32, data: &[u8]) -> RdeDecodeStatus {
        // Beginning of a dictionary batch.
        self.crc = 0xFFFF_FFFF;
        self.dictionaries.start_entry(resource_id, data);
        self.update_crc(data);
        self.flag_state = TransferFlagState::StartReceived;
        RdeDecodeStatus::Ok
    }

    fn handle_flag_middle(&mut self, resource_id: u32, data: &[u8]) -> RdeDecodeStatus {
        if self.flag_state != TransferFlagState::StartReceived {
            tracing::warn!("need a Start frame before a Middle frame");
            return RdeDecodeStatus::InvalidPktOrder;
        }
        if let Some(status) = self.begin_or_continue_dictionary(resource_id, data) {
            return status;
        }
        self.update_crc(data);
        RdeDecodeStatus::Ok
    }

    fn handle_flag_end(&mut self, command: &[u8], resource_id: u32, data: &[u8]) -> RdeDecodeStatus {
        if self.flag_state != TransferFlagState::StartReceived {
            tracing::warn!("need a Start frame before an End frame");
            return RdeDecodeStatus::InvalidPktOrder;
        }
        self.flag_state = TransferFlagState::Idle;

        if let Some(status) = self.begin_or_continue_dictionary(resource_id, data) {
            return status;
        }
        self.dictionaries.mark_complete(resource_id);
        self.update_crc(data);
        self.verify_trailer(command, data.len())
    }

    fn handle_flag_start_and_end(
        &mut self,
        command: &[u8],
        resource_id: u32,
        data: &[u8],
    ) -> RdeDecodeStatus {
        // A complete dictionary in one frame.
        self.crc = 0xFFFF_FFFF;
        self.dictionaries.start_entry(resource_id, data);
        self.dictionaries.mark_complete(resource_id);
        self.flag_state = TransferFlagState::Idle;
        self.update_crc(data);
        self.verify_trailer(command, data.len())
    }

    /// Shared Middle/End handling of the resource ID heuristic.
    ///
    /// A new resource ID closes out the previous dictionary and starts the
    /// next one; the same ID appends to the current dictionary. Returns a
    /// status only on failure.
    fn begin_or_continue_dictionary(
        &mut self,
        resource_id: u32,
        data: &[u8],
    ) -> Option<RdeDecodeStatus> {
        if self.prev_dict_resource_id != resource_id {
            self.crossed_resource_transfers += 1;
            tracing::warn!(
                previous = self.prev_dict_resource_id,
                current = resource_id,
                "resource switched mid-batch; CRC continues across both dictionaries"
            );
            self.dictionaries.mark_complete(self.prev_dict_resource_id);
            self.dictionaries.start_entry(resource_id, data);
        } else if !self.dictionaries.add_data(resource_id, data) {
            tracing::warn!(resource_id, "failed to append dictionary data");
            return Some(RdeDecodeStatus::DictionaryError);
        }
        None
    }

    /// Check the 4-byte little-endian checksum trailer that follows the data
    /// of an End or StartAndEnd frame.
    fn verify_trailer(&mut self, command: &[u8], data_len: usize) -> RdeDecodeStatus {
        let at = MULTIPART_HEADER_SIZE + data_len;
        let expected =
            u32::from_le_bytes([command[at], command[at + 1], command[at + 2], command[at + 3]]);
        let calculated = self.crc ^ 0xFFFF_FFFF;
        if calculated != expected {
            tracing::warn!(expected, calculated, "dictionary batch checksum failed");
            self.dictionaries.invalidate_all();
            return RdeDecodeStatus::InvalidChecksum;
        }
        RdeDecodeStatus::StopFlagReceived
    }

    fn update_crc(&mut self, stream: &[u8]) {
        for byte in stream {
            self.crc = self.crc_table[((self.crc ^ u32::from(*byte)) & 0xff) as usize]
                ^ (self.crc >> 8);
        }
    }
}

/// Build the 256-entry CRC-32 table for the reflected divisor.
fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut remainder = i as u32;
        for _ in 0..8 {
            remainder = if remainder & 1 != 0 {
                (remainder >> 1) ^ CRC_DIVISOR
            } else {
                remainder >> 1
            };
        }
        *entry = remainder;
    }
    table
}
