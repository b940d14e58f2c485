//! Mapped `/dev/mem` PCI window shared with the BIOS producer.
//!
//! BIOS mutates its half of the mailbox concurrently, so every access goes
//! through volatile loads/stores; the compiler must neither cache nor reorder
//! accesses to the mapping. The protocol itself relies on x86 store ordering
//! between payload reads and the read-pointer update.

use std::fs::OpenOptions;
use std::ptr;

use memmap2::{MmapOptions, MmapRaw};

use super::{clipped_len, DataRegion};
use crate::error::Result;

const DEVMEM_PATH: &str = "/dev/mem";

/// Byte region over a mapped window of host physical memory.
pub struct PciRegion {
    map: MmapRaw,
    region_size: usize,
}

impl PciRegion {
    /// Map `region_size` bytes of `/dev/mem` at physical `region_offset`.
    pub fn open(region_offset: u64, region_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(DEVMEM_PATH)?;
        let map = MmapOptions::new()
            .offset(region_offset)
            .len(region_size)
            .map_raw(&file)?;
        Ok(Self { map, region_size })
    }
}

impl DataRegion for PciRegion {
    fn region_size(&self) -> usize {
        self.region_size
    }

    fn read(&self, offset: u32, length: u32) -> Vec<u8> {
        let len = clipped_len(offset, length as usize, self.region_size);
        let mut out = Vec::with_capacity(len);
        let base = self.map.as_ptr();
        for i in 0..len {
            // SAFETY: offset + i < region_size, and the mapping is valid for
            // region_size bytes for the lifetime of self.
            out.push(unsafe { ptr::read_volatile(base.add(offset as usize + i)) });
        }
        out
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> u32 {
        let len = clipped_len(offset, bytes.len(), self.region_size);
        let base = self.map.as_mut_ptr();
        for (i, byte) in bytes[..len].iter().enumerate() {
            // SAFETY: offset + i < region_size, see read().
            unsafe { ptr::write_volatile(base.add(offset as usize + i), *byte) };
        }
        len as u32
    }
}

// Mapping /dev/mem needs root and real hardware, so PciRegion is exercised
// on target only; the access semantics shared with MemRegion are covered by
// the region tests.
