//! Circular buffer protocol between the BIOS producer and this consumer.
//!
//! The shared region is laid out as header, UE reserved area, then the
//! error-log ring:
//!
//! ```text
//! [0 .. 0x30)            circular buffer header
//! [0x30 .. 0x30 + U)     UE reserved region, U = ue_region_size
//! [0x30 + U .. queue)    error-log ring, ring offsets in [0, max_offset)
//! ```
//!
//! where `max_offset = queue_size - ue_region_size - 0x30`. BIOS owns
//! `bios_flags`, `bios_write_ptr` and the produced bytes; the BMC owns
//! `bmc_flags`, `bmc_read_ptr` and (only during [`initialize`]) the whole
//! region. Every operation that observes a header whose configured sizes
//! drifted from the initialized values fails, signalling that BIOS reset the
//! region and the consumer must re-initialize.
//!
//! [`initialize`]: CircularBuffer::initialize

use bytes::Bytes;

use crate::error::{Result, SmmLoggerError};
use crate::protocol::{
    flags, write_u24_le, BufferHeader, QueueEntryHeader, BMC_FLAGS_OFFSET, BMC_READ_PTR_OFFSET,
    BUFFER_HEADER_SIZE, ENTRY_HEADER_SIZE, UE_REGION_OFFSET,
};
use crate::region::DataRegion;

/// Header and payload of one drained queue entry.
pub type EntryPair = (QueueEntryHeader, Bytes);

/// Fixed parameters the BMC writes into the header at initialization.
#[derive(Debug, Clone, Copy)]
pub struct BufferParams {
    /// BMC-side protocol version.
    pub bmc_interface_version: u32,
    /// Total region size governed by the header protocol.
    pub queue_size: u32,
    /// Bytes reserved for the UE log after the header.
    pub ue_region_size: u16,
    /// Fixed identifier proving the region is initialized.
    pub magic_number: [u32; 4],
}

/// Consumer-side view of the shared circular buffer.
///
/// Owns the backing region and a cached copy of the header. The cache is
/// refreshed explicitly by [`read_buffer_header`] (and by the drain entry
/// points), never implicitly, so within one tick all decisions are made
/// against one observed header.
///
/// [`read_buffer_header`]: CircularBuffer::read_buffer_header
pub struct CircularBuffer<R: DataRegion> {
    region: R,
    params: BufferParams,
    cached_header: BufferHeader,
}

impl<R: DataRegion> CircularBuffer<R> {
    /// Create a buffer view over `region` with the configured parameters.
    ///
    /// The cached header is zeroed until [`initialize`] or
    /// [`read_buffer_header`] runs.
    ///
    /// [`initialize`]: CircularBuffer::initialize
    /// [`read_buffer_header`]: CircularBuffer::read_buffer_header
    pub fn new(region: R, params: BufferParams) -> Self {
        Self {
            region,
            params,
            cached_header: BufferHeader::default(),
        }
    }

    /// Zero the governed region and write a fresh header.
    ///
    /// All BIOS-owned fields start at zero; BIOS re-sends dictionaries after
    /// observing the reset.
    pub fn initialize(&mut self) -> Result<()> {
        let queue_size = self.params.queue_size as usize;
        if queue_size > self.region.region_size() {
            return Err(SmmLoggerError::Buffer(format!(
                "queue size {queue_size:#x} exceeds memory region size {:#x}",
                self.region.region_size()
            )));
        }

        let zeroes = vec![0u8; queue_size];
        let written = self.region.write(0, &zeroes);
        if written as usize != queue_size {
            return Err(SmmLoggerError::Buffer(format!(
                "initialization only erased {written} of {queue_size} bytes"
            )));
        }

        let header = BufferHeader {
            bmc_interface_version: self.params.bmc_interface_version,
            queue_size: self.params.queue_size,
            ue_region_size: self.params.ue_region_size,
            magic_number: self.params.magic_number,
            ..BufferHeader::default()
        };
        let encoded = header.encode();
        let written = self.region.write(0, &encoded);
        if written as usize != encoded.len() {
            return Err(SmmLoggerError::Buffer(format!(
                "initialization header write only wrote {written} of {} bytes",
                encoded.len()
            )));
        }

        self.cached_header = header;
        Ok(())
    }

    /// Re-read the header from the region into the cache.
    pub fn read_buffer_header(&mut self) -> Result<()> {
        let bytes = self.region.read(0, BUFFER_HEADER_SIZE as u32);
        let header = BufferHeader::decode(&bytes).ok_or_else(|| {
            SmmLoggerError::Buffer(format!("header read only read {} bytes", bytes.len()))
        })?;
        self.cached_header = header;
        Ok(())
    }

    /// The last header observed by [`read_buffer_header`] or written by
    /// [`initialize`].
    ///
    /// [`read_buffer_header`]: CircularBuffer::read_buffer_header
    /// [`initialize`]: CircularBuffer::initialize
    pub fn cached_header(&self) -> &BufferHeader {
        &self.cached_header
    }

    /// Write the low 24 bits of `new_ptr` to the header's `bmc_read_ptr`.
    pub fn update_read_ptr(&mut self, new_ptr: u32) -> Result<()> {
        let bytes = write_u24_le(new_ptr);
        let written = self.region.write(BMC_READ_PTR_OFFSET, &bytes);
        if written as usize != bytes.len() {
            return Err(SmmLoggerError::Buffer(format!(
                "read pointer update only wrote {written} bytes"
            )));
        }
        self.cached_header.bmc_read_ptr = new_ptr & 0x00ff_ffff;
        Ok(())
    }

    /// Write `new_flags` to the header's `bmc_flags`.
    pub fn update_bmc_flags(&mut self, new_flags: u32) -> Result<()> {
        let bytes = new_flags.to_le_bytes();
        let written = self.region.write(BMC_FLAGS_OFFSET, &bytes);
        if written as usize != bytes.len() {
            return Err(SmmLoggerError::Buffer(format!(
                "BMC flags update only wrote {written} bytes"
            )));
        }
        self.cached_header.bmc_flags = new_flags;
        Ok(())
    }

    /// Ring capacity: `queue_size - ue_region_size - header`.
    ///
    /// Fails when the cached header's sizes drifted from the configured
    /// values, meaning BIOS reinitialized the region underneath us.
    pub fn max_offset(&self) -> Result<u32> {
        self.check_configured_sizes()?;
        Ok(self.params.queue_size
            - u32::from(self.params.ue_region_size)
            - BUFFER_HEADER_SIZE as u32)
    }

    /// Absolute offset of the ring within the region.
    pub fn queue_offset(&self) -> Result<u32> {
        self.check_configured_sizes()?;
        Ok(UE_REGION_OFFSET + u32::from(self.params.ue_region_size))
    }

    fn check_configured_sizes(&self) -> Result<()> {
        if self.cached_header.queue_size != self.params.queue_size {
            return Err(SmmLoggerError::Buffer(format!(
                "queue size drifted: header has {:#x}, configured {:#x}",
                self.cached_header.queue_size, self.params.queue_size
            )));
        }
        if self.cached_header.ue_region_size != self.params.ue_region_size {
            return Err(SmmLoggerError::Buffer(format!(
                "UE region size drifted: header has {:#x}, configured {:#x}",
                self.cached_header.ue_region_size, self.params.ue_region_size
            )));
        }
        Ok(())
    }

    /// Read `length` ring bytes starting at `relative_offset`, wrapping at
    /// `max_offset`, then advance the read pointer past them.
    ///
    /// A read landing exactly on `max_offset` records the new pointer as 0.
    pub fn wraparound_read(&mut self, relative_offset: u32, length: u32) -> Result<Bytes> {
        let max_offset = self.max_offset()?;
        if relative_offset >= max_offset {
            return Err(SmmLoggerError::Buffer(format!(
                "ring offset {relative_offset:#x} is outside the ring (max {max_offset:#x})"
            )));
        }
        if length > max_offset {
            return Err(SmmLoggerError::Buffer(format!(
                "ring read of {length:#x} bytes exceeds ring capacity {max_offset:#x}"
            )));
        }
        let queue_offset = self.queue_offset()?;

        let first_len = length.min(max_offset - relative_offset);
        let mut bytes = self.region.read(queue_offset + relative_offset, first_len);
        if bytes.len() != first_len as usize {
            return Err(SmmLoggerError::Buffer(format!(
                "ring read only read {} of {first_len} bytes",
                bytes.len()
            )));
        }
        if first_len < length {
            let wrapped_len = length - first_len;
            let wrapped = self.region.read(queue_offset, wrapped_len);
            if wrapped.len() != wrapped_len as usize {
                return Err(SmmLoggerError::Buffer(format!(
                    "wrapped ring read only read {} of {wrapped_len} bytes",
                    wrapped.len()
                )));
            }
            bytes.extend_from_slice(&wrapped);
        }

        self.update_read_ptr((relative_offset + length) % max_offset)?;
        Ok(Bytes::from(bytes))
    }

    /// Read the entry header at the current read pointer and advance past it.
    pub fn read_entry_header(&mut self) -> Result<QueueEntryHeader> {
        let read_ptr = self.cached_header.bmc_read_ptr;
        let bytes = self.wraparound_read(read_ptr, ENTRY_HEADER_SIZE as u32)?;
        // wraparound_read returned exactly ENTRY_HEADER_SIZE bytes.
        Ok(QueueEntryHeader::decode(&bytes).expect("entry header length already checked"))
    }

    /// Read one complete entry (header + payload) and verify its checksum.
    ///
    /// The XOR over all header and payload bytes must be zero.
    pub fn read_entry(&mut self) -> Result<EntryPair> {
        let header = self.read_entry_header()?;
        let payload =
            self.wraparound_read(self.cached_header.bmc_read_ptr, u32::from(header.entry_size))?;

        let mut checksum = header.encode().iter().fold(0u8, |acc, b| acc ^ b);
        checksum = payload.iter().fold(checksum, |acc, b| acc ^ b);
        if checksum != 0 {
            return Err(SmmLoggerError::Buffer(format!(
                "entry checksum failed: sequence {}, residue {checksum:#04x}",
                header.sequence_id
            )));
        }
        Ok((header, payload))
    }

    /// Drain every complete entry between the read and write pointers.
    ///
    /// Refreshes the header first; after a successful drain the read pointer
    /// has caught up with the observed write pointer.
    pub fn read_error_logs(&mut self) -> Result<Vec<EntryPair>> {
        self.read_buffer_header()?;
        let max_offset = self.max_offset()?;

        let write_ptr = self.cached_header.bios_write_ptr;
        let read_ptr = self.cached_header.bmc_read_ptr;
        if write_ptr > max_offset {
            return Err(SmmLoggerError::Buffer(format!(
                "BIOS write pointer {write_ptr:#x} is outside the ring (max {max_offset:#x})"
            )));
        }
        if read_ptr > max_offset {
            return Err(SmmLoggerError::Buffer(format!(
                "BMC read pointer {read_ptr:#x} is outside the ring (max {max_offset:#x})"
            )));
        }
        if write_ptr == read_ptr {
            return Ok(Vec::new());
        }

        let bytes_to_read = if write_ptr > read_ptr {
            write_ptr - read_ptr
        } else {
            (max_offset - read_ptr) + write_ptr
        };

        let mut entries = Vec::new();
        let mut bytes_read = 0u32;
        while bytes_read < bytes_to_read {
            let (header, payload) = self.read_entry()?;
            bytes_read += ENTRY_HEADER_SIZE as u32 + payload.len() as u32;
            entries.push((header, payload));
        }

        if self.cached_header.bmc_read_ptr != write_ptr {
            return Err(SmmLoggerError::Buffer(format!(
                "drain ended at {:#x} instead of the write pointer {write_ptr:#x}",
                self.cached_header.bmc_read_ptr
            )));
        }
        Ok(entries)
    }

    /// Collect the UE reserved region if BIOS handed it over.
    ///
    /// Returns `None` when no UE region is configured or the `UE_SWITCH`
    /// bits are in sync. The caller toggles the BMC bit after successfully
    /// processing the returned bytes; overflow acknowledgement, by contrast,
    /// is handled entirely inside
    /// [`check_for_overflow_and_acknowledge`](Self::check_for_overflow_and_acknowledge).
    pub fn read_ue_log_from_reserved_region(&mut self) -> Result<Option<Bytes>> {
        self.read_buffer_header()?;
        self.check_configured_sizes()?;

        let ue_region_size = u32::from(self.cached_header.ue_region_size);
        if ue_region_size == 0 {
            return Ok(None);
        }
        if !flags::toggled(
            self.cached_header.bios_flags,
            self.cached_header.bmc_flags,
            flags::UE_SWITCH,
        ) {
            return Ok(None);
        }

        let bytes = self.region.read(UE_REGION_OFFSET, ue_region_size);
        if bytes.len() != ue_region_size as usize {
            return Err(SmmLoggerError::Buffer(format!(
                "UE region read only read {} of {ue_region_size} bytes",
                bytes.len()
            )));
        }
        Ok(Some(Bytes::from(bytes)))
    }

    /// Acknowledge a pending overflow notification from BIOS.
    ///
    /// Returns `true` when an overflow was pending and has now been
    /// acknowledged by toggling the BMC bit. Drain behavior is unaffected;
    /// the notification is advisory.
    pub fn check_for_overflow_and_acknowledge(&mut self) -> Result<bool> {
        self.read_buffer_header()?;
        if flags::toggled(
            self.cached_header.bios_flags,
            self.cached_header.bmc_flags,
            flags::OVERFLOW,
        ) {
            let acked = self.cached_header.bmc_flags ^ flags::OVERFLOW;
            self.update_bmc_flags(acked)?;
            return Ok(true);
        }
        Ok(false)
    }
}
