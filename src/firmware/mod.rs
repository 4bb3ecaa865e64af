//! Firmware description tables (SFI) placed in guest memory before boot.

pub mod checksum;
pub mod sfi;

pub use sfi::{IoApicPlacement, SfiBuilder, SfiLayout, SfiTable, SfiTables};
