//! # Harness Configuration
//!
//! JSON configuration for a harness run. Every field has a default, so an empty
//! object is a complete configuration and command line flags only need to override
//! what differs.
//!
//! ## Configuration File Format
//!
//! ```json
//! {
//!   "cpu_count": 4,
//!   "trace_path": "trace.log",
//!   "symbol_map_path": "linux-2.6.34/System.map",
//!   "scenario_path": "configs/scenarios/boot_smoke.json",
//!   "schedule": { "rounds_per_tick": 100, "slice_instructions": 10000, "max_ticks": 50 },
//!   "firmware": { "table_base": 917504, "ioapic_base": 655360, "ioapic_placement": "natural" },
//!   "decoder": { "bitness": 32 },
//!   "instruction_trace": false
//! }
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use rusty_harness::config::HarnessConfig;
//!
//! let config = HarnessConfig::from_json_str("{\"cpu_count\": 4}").expect("valid config");
//! assert_eq!(config.cpu_count, 4);
//! assert_eq!(config.schedule.slice_instructions, 10_000);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::firmware::sfi::{DEFAULT_IOAPIC_MMIO_BASE, DEFAULT_TABLE_BASE};
use crate::firmware::{IoApicPlacement, SfiBuilder};
use crate::types::PhysAddr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub cpu_count: usize,
    /// Trace destination; stdout when absent.
    pub trace_path: Option<PathBuf>,
    /// Saved engine state to resume from.
    pub snapshot_path: Option<PathBuf>,
    pub symbol_map_path: Option<PathBuf>,
    /// Event script for the replay engine.
    pub scenario_path: Option<PathBuf>,
    pub schedule: ScheduleConfig,
    pub firmware: FirmwareConfig,
    pub decoder: DecoderConfig,
    pub instruction_trace: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cpu_count: 2,
            trace_path: None,
            snapshot_path: None,
            symbol_map_path: None,
            scenario_path: None,
            schedule: ScheduleConfig::default(),
            firmware: FirmwareConfig::default(),
            decoder: DecoderConfig::default(),
            instruction_trace: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Round-robin passes over all processors between timer interrupts.
    pub rounds_per_tick: u32,
    /// Instruction budget of one processor time slice.
    pub slice_instructions: u64,
    /// Stop after this many timer ticks even if the guest never finishes.
    pub max_ticks: Option<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rounds_per_tick: 100,
            slice_instructions: 10_000,
            max_ticks: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    pub table_base: u64,
    pub ioapic_base: u64,
    pub ioapic_placement: IoApicPlacement,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            table_base: DEFAULT_TABLE_BASE,
            ioapic_base: DEFAULT_IOAPIC_MMIO_BASE,
            ioapic_placement: IoApicPlacement::default(),
        }
    }
}

impl FirmwareConfig {
    pub fn builder(&self) -> SfiBuilder {
        SfiBuilder::new(PhysAddr::new(self.table_base), PhysAddr::new(self.ioapic_base))
            .with_placement(self.ioapic_placement)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub bitness: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { bitness: 32 }
    }
}

impl HarnessConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Checks the merged configuration. Loading does not validate, so command line
    /// overrides can repair a file before this runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_count == 0 {
            return Err(ConfigError::Invalid("cpu_count must be at least 1".to_string()));
        }
        if self.schedule.rounds_per_tick == 0 {
            return Err(ConfigError::Invalid("schedule.rounds_per_tick must be positive".to_string()));
        }
        if self.schedule.slice_instructions == 0 {
            return Err(ConfigError::Invalid(
                "schedule.slice_instructions must be positive".to_string(),
            ));
        }
        if !matches!(self.decoder.bitness, 16 | 32 | 64) {
            return Err(ConfigError::Invalid(format!(
                "decoder.bitness must be 16, 32 or 64, not {}",
                self.decoder.bitness
            )));
        }
        if let Err(err) = self.firmware.builder().layout(self.cpu_count) {
            return Err(ConfigError::Invalid(format!(
                "firmware.table_base 0x{:x} leaves no room for the tables: {err}",
                self.firmware.table_base
            )));
        }
        Ok(())
    }
}
