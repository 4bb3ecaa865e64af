//! # Simulation Engine Interface
//!
//! The harness never executes guest code itself. It talks to a full-system simulator
//! through three narrow seams:
//!
//! - [`GuestMemory`]: byte-granular reads and writes of guest physical memory, used
//!   once at start to place the firmware tables.
//! - [`SimulationEngine`]: processor count, per-CPU time slices, the periodic timer
//!   interrupt and the guest console.
//! - [`EventListener`]: the callbacks the engine invokes while a slice runs. The
//!   listener publishes the [`HookSet`] it currently wants and the engine only
//!   delivers events in that set.
//!
//! [`replay::ReplayEngine`] is a deterministic engine that plays back a scripted
//! event stream; it backs the binary and the test suite.

pub mod replay;

use std::io::Write;

use bitflags::bitflags;

use crate::error::EngineError;
use crate::types::{AccessKind, CpuId, InstClass, PhysAddr};

bitflags! {
    /// Callback hooks a listener can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HookSet: u16 {
        const INSTRUCTION = 1 << 0;
        const ATOMIC = 1 << 1;
        const MEMORY = 1 << 2;
        const INTERRUPT = 1 << 3;
        const IO = 1 << 4;
        const REGISTER = 1 << 5;
        const APP_START = 1 << 6;
        const APP_END = 1 << 7;
    }
}

impl HookSet {
    /// Hooks held while waiting for the guest application to start.
    pub const BOOTSTRAP: HookSet = HookSet::INSTRUCTION
        .union(HookSet::IO)
        .union(HookSet::APP_START);

    /// Hooks held once the guest application is running.
    pub const FULL: HookSet = HookSet::BOOTSTRAP
        .union(HookSet::ATOMIC)
        .union(HookSet::MEMORY)
        .union(HookSet::INTERRUPT)
        .union(HookSet::REGISTER)
        .union(HookSet::APP_END);
}

/// Acknowledgment returned from the interrupt and atomic hooks. Carries no
/// request; the engine resumes the guest unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack;

/// Guest physical memory as exposed by the engine.
pub trait GuestMemory {
    fn write(&mut self, addr: PhysAddr, bytes: &[u8]) -> Result<(), EngineError>;
    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> Result<(), EngineError>;
}

pub trait SimulationEngine: GuestMemory {
    fn cpu_count(&self) -> usize;

    /// Advances `cpu` by up to `instructions` retired instructions, delivering events
    /// to `listener` synchronously. Returns the number of instructions retired.
    fn run(
        &mut self,
        cpu: CpuId,
        instructions: u64,
        listener: &mut dyn EventListener,
    ) -> Result<u64, EngineError>;

    /// Raises the periodic timer interrupt on every processor.
    fn timer_interrupt(&mut self);

    /// Routes guest console output to `console`.
    fn connect_console(&mut self, console: Box<dyn Write>);
}

/// Callbacks invoked by the engine while guest code runs.
///
/// Every call completes before the next one begins; implementations need no locking.
pub trait EventListener {
    /// Hooks the engine should currently deliver.
    fn hooks(&self) -> HookSet;

    fn on_instruction(
        &mut self,
        cpu: CpuId,
        vaddr: u64,
        paddr: u64,
        bytes: &[u8],
        class: InstClass,
    );

    /// `size` is in bytes.
    fn on_memory_access(&mut self, cpu: CpuId, vaddr: u64, paddr: u64, size: u8, kind: AccessKind);

    fn on_interrupt(&mut self, cpu: CpuId, vector: u8) -> Ack;

    /// Returns the data the guest should observe for reads, if the listener
    /// emulates the port.
    fn on_io(&mut self, cpu: CpuId, port: u16, size: u8, kind: AccessKind, value: u32)
        -> Option<u32>;

    /// A `size` of zero reports a flags change where `reg` is the flag mask.
    fn on_register_change(&mut self, cpu: CpuId, reg: u32, size: u8, kind: AccessKind);

    fn on_atomic(&mut self, cpu: CpuId) -> Ack;

    fn on_app_start(&mut self, cpu: CpuId);

    fn on_app_end(&mut self, cpu: CpuId);
}
