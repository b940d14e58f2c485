//! Daemon configuration.
//!
//! Loaded from a JSON file shipped with the platform image. The magic number
//! words are hex strings in the file; sizes are plain integers. Validation
//! rejects configurations whose queue cannot hold the buffer header and the
//! UE region, since every later size computation assumes it can.

use std::time::Duration;

use serde::Deserialize;

use crate::buffer::BufferParams;
use crate::error::{Result, SmmLoggerError};
use crate::protocol::BUFFER_HEADER_SIZE;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/usr/share/smm-error-logger/config.json";

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "BMCInterfaceVersion")]
    bmc_interface_version: u32,
    #[serde(rename = "MagicNumber")]
    magic_number: Vec<String>,
    #[serde(rename = "QueueSizeBytes")]
    queue_size: u32,
    #[serde(rename = "UERegionSizeBytes")]
    ue_region_size: u16,
    #[serde(rename = "MemoryRegionSize")]
    memory_region_size: usize,
    #[serde(rename = "MemoryRegionOffset")]
    memory_region_offset: u64,
    #[serde(rename = "PollingIntervalMS")]
    polling_interval_ms: u64,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// BMC-side protocol version written into the buffer header.
    pub bmc_interface_version: u32,
    /// Magic number words written into the buffer header.
    pub magic_number: [u32; 4],
    /// Total region size governed by the buffer header.
    pub queue_size: u32,
    /// Bytes reserved for the UE log.
    pub ue_region_size: u16,
    /// Length of the mapped host window.
    pub memory_region_size: usize,
    /// Physical address of the mapped host window.
    pub memory_region_offset: u64,
    /// Delay between drain ticks.
    pub poll_interval: Duration,
}

impl Config {
    /// Load and validate the configuration at `path`.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SmmLoggerError::Config(format!("cannot read '{path}': {e}")))?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)
            .map_err(|e| SmmLoggerError::Config(format!("malformed config: {e}")))?;

        if raw.magic_number.len() != 4 {
            return Err(SmmLoggerError::Config(format!(
                "MagicNumber needs 4 words, got {}",
                raw.magic_number.len()
            )));
        }
        let mut magic_number = [0u32; 4];
        for (word, text) in magic_number.iter_mut().zip(&raw.magic_number) {
            let digits = text.trim_start_matches("0x").trim_start_matches("0X");
            *word = u32::from_str_radix(digits, 16).map_err(|e| {
                SmmLoggerError::Config(format!("MagicNumber word '{text}' is not hex: {e}"))
            })?;
        }

        let minimum = BUFFER_HEADER_SIZE as u32 + u32::from(raw.ue_region_size);
        if raw.queue_size <= minimum {
            return Err(SmmLoggerError::Config(format!(
                "QueueSizeBytes {:#x} leaves no ring after header and UE region ({minimum:#x})",
                raw.queue_size
            )));
        }
        if raw.queue_size as usize > raw.memory_region_size {
            return Err(SmmLoggerError::Config(format!(
                "QueueSizeBytes {:#x} exceeds MemoryRegionSize {:#x}",
                raw.queue_size, raw.memory_region_size
            )));
        }

        Ok(Self {
            bmc_interface_version: raw.bmc_interface_version,
            magic_number,
            queue_size: raw.queue_size,
            ue_region_size: raw.ue_region_size,
            memory_region_size: raw.memory_region_size,
            memory_region_offset: raw.memory_region_offset,
            poll_interval: Duration::from_millis(raw.polling_interval_ms),
        })
    }

    /// Buffer header parameters derived from this configuration.
    pub fn buffer_params(&self) -> BufferParams {
        BufferParams {
            bmc_interface_version: self.bmc_interface_version,
            queue_size: self.queue_size,
            ue_region_size: self.ue_region_size,
            magic_number: self.magic_number,
        }
    }
}
