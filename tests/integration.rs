//! Integration tests for smm-error-logger.
//!
//! These drive the full pipeline the way the daemon does: a simulated BIOS
//! produces wire bytes into a shared region, the poll loop drains them, and
//! decoded PDRs land in a recording sink.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use smm_error_logger::protocol::{flags, write_u24_le, QueueEntryHeader, UE_REGION_OFFSET};
use smm_error_logger::rde::{
    EntryNotifier, FileHandler, FileSink, PassthroughDecoder, RdeCommandHandler,
    OP_INIT_OPERATION_UPDATE,
};
use smm_error_logger::region::{DataRegion, MemRegion};
use smm_error_logger::{BufferParams, CircularBuffer, PollLoop};

const REGION_SIZE: usize = 0x400;
const QUEUE_SIZE: u32 = 0x400;
const UE_REGION_SIZE: u16 = 0x80;
// queue_size - ue_region_size - header
const MAX_OFFSET: u32 = 0x350;
const QUEUE_OFFSET: u32 = 0xB0;
const MAGIC: [u32; 4] = [0x12345678, 0x22345678, 0x32345678, 0x42345678];

/// Region shared between the simulated BIOS producer and the loop under
/// test, like the real mapping is.
#[derive(Clone)]
struct SharedRegion(Arc<Mutex<MemRegion>>);

impl SharedRegion {
    fn new(size: usize) -> Self {
        Self(Arc::new(Mutex::new(MemRegion::new(size))))
    }

    fn bios_write(&self, offset: u32, bytes: &[u8]) {
        assert_eq!(
            self.0.lock().unwrap().write(offset, bytes) as usize,
            bytes.len()
        );
    }

    /// Producer-side ring write with wraparound.
    fn bios_write_ring(&self, relative_offset: u32, bytes: &[u8]) {
        let first = ((MAX_OFFSET - relative_offset) as usize).min(bytes.len());
        self.bios_write(QUEUE_OFFSET + relative_offset, &bytes[..first]);
        if first < bytes.len() {
            self.bios_write(QUEUE_OFFSET, &bytes[first..]);
        }
    }

    fn set_write_ptr(&self, value: u32) {
        self.bios_write(0x2c, &write_u24_le(value));
    }

    fn set_bios_flags(&self, value: u32) {
        self.bios_write(0x28, &value.to_le_bytes());
    }
}

impl DataRegion for SharedRegion {
    fn region_size(&self) -> usize {
        self.0.lock().unwrap().region_size()
    }

    fn read(&self, offset: u32, length: u32) -> Vec<u8> {
        self.0.lock().unwrap().read(offset, length)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> u32 {
        self.0.lock().unwrap().write(offset, bytes)
    }
}

/// File handler recording every created document instead of touching disk.
#[derive(Clone, Default)]
struct RecordingFileHandler {
    created: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FileHandler for RecordingFileHandler {
    fn create_file(&self, folder_path: &str, content: &Value) -> bool {
        self.created
            .lock()
            .unwrap()
            .push((folder_path.to_string(), content.clone()));
        true
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    paths: Arc<Mutex<Vec<String>>>,
}

impl EntryNotifier for RecordingNotifier {
    fn notify_new_entry(&mut self, path: &str) {
        self.paths.lock().unwrap().push(path.to_string());
    }
}

struct Harness {
    poll_loop: PollLoop<SharedRegion>,
    region: SharedRegion,
    created: Arc<Mutex<Vec<(String, Value)>>>,
    notified: Arc<Mutex<Vec<String>>>,
}

fn harness() -> Harness {
    let region = SharedRegion::new(REGION_SIZE);
    let params = BufferParams {
        bmc_interface_version: 1,
        queue_size: QUEUE_SIZE,
        ue_region_size: UE_REGION_SIZE,
        magic_number: MAGIC,
    };
    let mut buffer = CircularBuffer::new(region.clone(), params);
    buffer.initialize().unwrap();

    let file_handler = RecordingFileHandler::default();
    let notifier = RecordingNotifier::default();
    let created = file_handler.created.clone();
    let notified = notifier.paths.clone();
    let sink = FileSink::new("/run/bmcweb", Box::new(file_handler), Box::new(notifier));
    let handler = RdeCommandHandler::new(Box::new(PassthroughDecoder), Box::new(sink));

    Harness {
        poll_loop: PollLoop::new(buffer, handler, Duration::from_millis(10)),
        region,
        created,
        notified,
    }
}

/// Compose one wire entry with a zero-XOR checksum.
fn make_entry(sequence_id: u16, rde_command_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut header = QueueEntryHeader {
        sequence_id,
        entry_size: payload.len() as u16,
        checksum: 0,
        rde_command_type,
    };
    let mut residue = header.encode().iter().fold(0u8, |acc, b| acc ^ b);
    residue = payload.iter().fold(residue, |acc, b| acc ^ b);
    header.checksum = residue;

    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// StartAndEnd dictionary transfer command.
fn dict_cmd(resource_id: u32, data: &[u8], crc: u32) -> Vec<u8> {
    let mut cmd = vec![0u8, 3];
    cmd.extend_from_slice(&resource_id.to_le_bytes());
    cmd.extend_from_slice(&(data.len() as u32).to_le_bytes());
    cmd.extend_from_slice(data);
    cmd.extend_from_slice(&crc.to_le_bytes());
    cmd
}

/// OperationInit command around a JSON payload.
fn op_init_cmd(resource_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut cmd = Vec::new();
    cmd.extend_from_slice(&resource_id.to_le_bytes());
    cmd.extend_from_slice(&0u16.to_le_bytes());
    cmd.push(OP_INIT_OPERATION_UPDATE);
    cmd.push(0b10);
    cmd.extend_from_slice(&0u32.to_le_bytes());
    cmd.push(0);
    cmd.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    cmd.extend_from_slice(payload);
    cmd
}

/// Produce entries into the ring starting at `start_offset`, advancing the
/// write pointer past them.
fn produce(region: &SharedRegion, start_offset: u32, entries: &[Vec<u8>]) {
    let mut offset = start_offset;
    for entry in entries {
        region.bios_write_ring(offset % MAX_OFFSET, entry);
        offset += entry.len() as u32;
    }
    region.set_write_ptr(offset % MAX_OFFSET);
}

const LOG_SERVICE_PDR: &str = r##"{"@odata.id":"/redfish/v1/Systems/system/LogServices/CperLog","@odata.type":"#LogService.v1_1_0.LogService","Id":"CperLog"}"##;
const LOG_ENTRY_PDR: &str = r##"{"@odata.id":"/x","@odata.type":"#LogEntry.v1_13_0.LogEntry","Severity":"Critical"}"##;

/// Full pipeline: dictionaries and PDR payloads arrive through the queue,
/// decoded documents land in the file tree, and a notification fires for the
/// log entry.
#[test]
fn test_queue_to_sink_pipeline() {
    let mut h = harness();
    // CRC-32 of "schema" and of "anno".
    let entries = vec![
        make_entry(1, 1, &dict_cmd(5, b"schema", 0xB88E4152)),
        make_entry(2, 1, &dict_cmd(0, b"anno", 0xC6E493B0)),
        make_entry(3, 2, &op_init_cmd(5, LOG_SERVICE_PDR.as_bytes())),
        make_entry(4, 2, &op_init_cmd(5, LOG_ENTRY_PDR.as_bytes())),
    ];
    produce(&h.region, 0, &entries);

    h.poll_loop.tick().unwrap();

    assert_eq!(h.poll_loop.handler().dictionary_count(), 2);

    let created = h.created.lock().unwrap();
    // LogService document, its Entries collection, then the log entry.
    assert_eq!(created.len(), 3);
    assert_eq!(
        created[0].0,
        "/run/bmcweb/redfish/v1/Systems/system/LogServices/CperLog"
    );
    assert!(created[2]
        .0
        .starts_with("/run/bmcweb/redfish/v1/Systems/system/LogServices/CperLog/Entries/"));
    assert_eq!(created[2].1["Severity"], "Critical");

    let notified = h.notified.lock().unwrap();
    assert_eq!(notified.len(), 1);
    assert!(notified[0].ends_with("/index.json"));

    // READY promoted after the dictionary set completed; pointers caught up.
    let header = h.poll_loop.buffer_mut().cached_header();
    assert_ne!(header.bmc_flags & flags::BMC_READY, 0);
    assert_eq!(header.bmc_read_ptr, header.bios_write_ptr);
}

/// Entries spanning the ring end decode like contiguous ones.
#[test]
fn test_pipeline_across_ring_wraparound() {
    let mut h = harness();

    // Park both pointers near the ring end, then produce entries across it.
    let start = MAX_OFFSET - 8;
    h.region.bios_write(0x21, &write_u24_le(start));
    h.region.set_write_ptr(start);
    h.poll_loop.tick().unwrap();

    let entries = vec![
        make_entry(1, 1, &dict_cmd(5, b"schema", 0xB88E4152)),
        make_entry(2, 1, &dict_cmd(0, b"anno", 0xC6E493B0)),
        make_entry(3, 2, &op_init_cmd(5, LOG_SERVICE_PDR.as_bytes())),
    ];
    produce(&h.region, start, &entries);

    h.poll_loop.tick().unwrap();

    assert_eq!(h.poll_loop.handler().dictionary_count(), 2);
    assert_eq!(h.created.lock().unwrap().len(), 2);
    let header = h.poll_loop.buffer_mut().cached_header();
    assert_eq!(header.bmc_read_ptr, header.bios_write_ptr);
}

/// A BIOS-side reset (header drift) fails the tick; one re-initialization
/// restores service.
#[test]
fn test_reinitialize_recovers_from_header_drift() {
    let mut h = harness();
    h.region.bios_write(0x18, &write_u24_le(0x100));

    assert!(h.poll_loop.tick().is_err());
    h.poll_loop.buffer_mut().initialize().unwrap();

    let entries = vec![make_entry(1, 1, &dict_cmd(5, b"schema", 0xB88E4152))];
    produce(&h.region, 0, &entries);
    h.poll_loop.tick().unwrap();
    assert_eq!(h.poll_loop.handler().dictionary_count(), 1);
}

/// UE records published through the reserved region are decoded once per
/// hand-off and acknowledged by toggling the BMC switch bit.
#[test]
fn test_ue_region_hand_off() {
    let mut h = harness();
    let entries = vec![
        make_entry(1, 1, &dict_cmd(7, b"schema", 0xB88E4152)),
        make_entry(2, 1, &dict_cmd(0, b"anno", 0xC6E493B0)),
        make_entry(3, 2, &op_init_cmd(7, LOG_SERVICE_PDR.as_bytes())),
    ];
    produce(&h.region, 0, &entries);
    h.poll_loop.tick().unwrap();

    let mut ue_record = op_init_cmd(7, LOG_ENTRY_PDR.as_bytes());
    ue_record.resize(UE_REGION_SIZE as usize, 0);
    h.region.bios_write(UE_REGION_OFFSET, &ue_record);
    h.region.set_bios_flags(flags::UE_SWITCH);

    h.poll_loop.tick().unwrap();
    assert_eq!(h.notified.lock().unwrap().len(), 1);

    // Bits back in sync: the next tick must not decode the region again.
    h.poll_loop.tick().unwrap();
    assert_eq!(h.notified.lock().unwrap().len(), 1);
}

/// An entry with a corrupted byte fails the drain; recovery wipes the queue.
#[test]
fn test_corrupted_entry_fails_the_tick() {
    let mut h = harness();
    let mut entry = make_entry(1, 1, &dict_cmd(5, b"schema", 0xB88E4152));
    entry[7] ^= 0x40;
    produce(&h.region, 0, &[entry]);

    let err = h.poll_loop.tick().unwrap_err();
    assert!(err.to_string().contains("entry checksum failed"));

    h.poll_loop.buffer_mut().initialize().unwrap();
    h.poll_loop.tick().unwrap();
    assert_eq!(h.poll_loop.handler().dictionary_count(), 0);
}

/// Overflow notifications are acknowledged and counted, and do not disturb
/// the drain.
#[test]
fn test_overflow_acknowledged_alongside_drain() {
    let mut h = harness();
    h.region.set_bios_flags(flags::OVERFLOW);
    let entries = vec![make_entry(1, 1, &dict_cmd(5, b"schema", 0xB88E4152))];
    produce(&h.region, 0, &entries);

    h.poll_loop.tick().unwrap();
    assert_eq!(h.poll_loop.overflow_acks(), 1);
    assert_eq!(h.poll_loop.handler().dictionary_count(), 1);

    h.poll_loop.tick().unwrap();
    assert_eq!(h.poll_loop.overflow_acks(), 1);
}
