//! # Rusty Harness Library
//!
//! An instrumentation harness for full-system guest simulators written in Rust.
//!
//! This library provides:
//! - SFI firmware tables (system, CPU list and IO-APIC) written into guest memory at boot
//! - Quiet emulation of the legacy PC ports a booting kernel probes, with a CMOS index latch
//! - A two-phase event dispatcher that renders simulator callbacks into a line-oriented trace
//! - A round-robin driver loop and a deterministic replay engine behind a narrow engine trait

pub mod config;
pub mod devices;
pub mod driver;
pub mod engine;
pub mod error;
pub mod firmware;
pub mod symbols;
pub mod trace;
pub mod types;

// Re-export commonly used items for easier importing
pub use config::HarnessConfig;
pub use driver::{Driver, RunSummary};
pub use engine::{EventListener, GuestMemory, HookSet, SimulationEngine};
pub use error::{EngineError, HarnessError};
pub use firmware::SfiBuilder;
pub use symbols::SymbolMap;
pub use trace::{EventDispatcher, Lifecycle, TraceSink};
pub use types::{AccessKind, CpuId, InstClass, PhysAddr};
