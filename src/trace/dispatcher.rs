//! # Event Dispatcher
//!
//! Receives simulator callbacks and renders them into the trace stream. Subscription
//! happens in two phases:
//!
//! 1. On construction only the instruction, I/O and application-start hooks are
//!    held, so the kernel can boot without flooding the trace.
//! 2. The first application-start event swaps in the full hook set. Later start
//!    events (one per processor) change nothing.
//!
//! The application-end event is terminal: the dispatcher drops every hook and the
//! driver loop stops at the next tick boundary.
//!
//! A guest restored from saved state already delivered its start event before the
//! state was saved, so [`EventDispatcher::resume_from_saved_state`] performs the
//! second phase directly.

use std::fmt;
use std::sync::Arc;

use crate::devices::{CmosBackend, PortIoDevice};
use crate::engine::{Ack, EventListener, HookSet};
use crate::trace::decoder::{IcedDecoder, InstructionDecoder};
use crate::trace::sink::TraceSink;
use crate::symbols::SymbolMap;
use crate::types::{AccessKind, CpuId, InstClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    AwaitingStart,
    Active,
    Finished,
}

impl Lifecycle {
    pub fn hooks(self) -> HookSet {
        match self {
            Lifecycle::Created | Lifecycle::Finished => HookSet::empty(),
            Lifecycle::AwaitingStart => HookSet::BOOTSTRAP,
            Lifecycle::Active => HookSet::FULL,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-hook event counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub instructions: u64,
    pub memory_accesses: u64,
    pub interrupts: u64,
    pub io_accesses: u64,
    pub register_changes: u64,
    pub atomics: u64,
    pub symbol_hits: u64,
    /// Instructions whose bytes did not decode to exactly one instruction.
    pub decode_failures: u64,
    pub unsupported_ports: u64,
}

pub struct EventDispatcher {
    state: Lifecycle,
    trace: TraceSink,
    markers: TraceSink,
    symbols: Arc<SymbolMap>,
    decoder: Box<dyn InstructionDecoder>,
    ports: PortIoDevice,
    instruction_trace: bool,
    stats: DispatcherStats,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("state", &self.state)
            .field("ports", &self.ports)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher holding the bootstrap hooks. Symbol boundary markers
    /// go to stderr until [`EventDispatcher::with_markers`] says otherwise.
    pub fn new(trace: TraceSink, symbols: Arc<SymbolMap>) -> Self {
        let mut dispatcher = EventDispatcher {
            state: Lifecycle::Created,
            trace,
            markers: TraceSink::stderr(),
            symbols,
            decoder: Box::new(IcedDecoder::new(32)),
            ports: PortIoDevice::default(),
            instruction_trace: false,
            stats: DispatcherStats::default(),
        };
        dispatcher.transition(Lifecycle::AwaitingStart);
        dispatcher
    }

    pub fn with_markers(mut self, markers: TraceSink) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_decoder(mut self, decoder: Box<dyn InstructionDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_cmos(mut self, cmos: Box<dyn CmosBackend>) -> Self {
        self.ports = PortIoDevice::new(cmos);
        self
    }

    /// Also render every decoded instruction into the trace.
    pub fn with_instruction_trace(mut self, enabled: bool) -> Self {
        self.instruction_trace = enabled;
        self
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn has_finished(&self) -> bool {
        self.state == Lifecycle::Finished
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    pub fn ports(&self) -> &PortIoDevice {
        &self.ports
    }

    /// Activates the full hook set without waiting for an application-start event.
    pub fn resume_from_saved_state(&mut self) {
        if matches!(self.state, Lifecycle::Created | Lifecycle::AwaitingStart) {
            tracing::info!("resumed guest: application start already delivered");
            self.transition(Lifecycle::Active);
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.trace.flush()?;
        self.markers.flush()
    }

    /// Flushes both outputs and returns the final counts.
    pub fn finish(self) -> std::io::Result<DispatcherStats> {
        tracing::debug!(
            trace = self.trace.lines_written(),
            markers = self.markers.lines_written(),
            "closing trace outputs"
        );
        self.trace.finish()?;
        self.markers.finish()?;
        Ok(self.stats)
    }

    fn transition(&mut self, next: Lifecycle) {
        tracing::debug!(from = %self.state, to = %next, hooks = ?next.hooks(), "dispatcher transition");
        self.state = next;
    }

    fn wants(&self, hook: HookSet) -> bool {
        self.state.hooks().contains(hook)
    }
}

impl EventListener for EventDispatcher {
    fn hooks(&self) -> HookSet {
        self.state.hooks()
    }

    fn on_instruction(&mut self, cpu: CpuId, vaddr: u64, paddr: u64, bytes: &[u8], class: InstClass) {
        if !self.wants(HookSet::INSTRUCTION) {
            return;
        }
        self.stats.instructions += 1;

        if let Some(symbol) = self.symbols.lookup(vaddr) {
            self.stats.symbol_hits += 1;
            self.markers.line(format_args!("==={symbol}()=== - {cpu}"));
        }

        let decoded = self.decoder.decode(bytes);
        if !decoded.is_clean() {
            self.stats.decode_failures += 1;
        }

        if self.instruction_trace {
            if decoded.is_clean() {
                self.trace.line(format_args!(
                    "{cpu}: Inst@(0x{vaddr:x}/0x{paddr:x}): {} {} ({class})",
                    decoded.mnemonic, decoded.operands
                ));
            } else {
                self.trace.line(format_args!(
                    "{cpu}: Inst@(0x{vaddr:x}/0x{paddr:x}): [Decoding Error] ({class})"
                ));
            }
        }
    }

    fn on_memory_access(&mut self, cpu: CpuId, vaddr: u64, paddr: u64, size: u8, kind: AccessKind) {
        if !self.wants(HookSet::MEMORY) {
            return;
        }
        self.stats.memory_accesses += 1;
        self.trace.line(format_args!(
            "{cpu}:  {kind}(0x{vaddr:x}/0x{paddr:x}): {} bits.",
            u32::from(size) * 8
        ));
    }

    fn on_interrupt(&mut self, cpu: CpuId, vector: u8) -> Ack {
        if !self.wants(HookSet::INTERRUPT) {
            return Ack;
        }
        self.stats.interrupts += 1;
        self.trace.line(format_args!("{cpu}: Interrupt 0x{vector:02x}"));
        Ack
    }

    fn on_io(&mut self, cpu: CpuId, port: u16, size: u8, kind: AccessKind, value: u32) -> Option<u32> {
        if !self.wants(HookSet::IO) {
            return None;
        }
        self.stats.io_accesses += 1;

        let bits = u32::from(size) * 8;
        match kind {
            AccessKind::Write => self.trace.line(format_args!(
                "{cpu}: I/O {kind}: (0x{port:x}): {bits} bits: 0x{value:x}"
            )),
            AccessKind::Read => self
                .trace
                .line(format_args!("{cpu}: I/O {kind}: (0x{port:x}): {bits} bits")),
        }

        let response = self.ports.handle(port, size, kind, value);
        if response.is_unsupported() {
            self.stats.unsupported_ports += 1;
        }
        response.data.map(u32::from)
    }

    fn on_register_change(&mut self, cpu: CpuId, reg: u32, size: u8, kind: AccessKind) {
        if !self.wants(HookSet::REGISTER) {
            return;
        }
        self.stats.register_changes += 1;
        if size == 0 {
            self.trace.line(format_args!("{cpu}: Flag {kind}: mask=0x{reg:x}"));
        } else {
            self.trace.line(format_args!(
                "{cpu}: Reg {kind} {reg}: {} bits.",
                u32::from(size) * 8
            ));
        }
    }

    fn on_atomic(&mut self, cpu: CpuId) -> Ack {
        if !self.wants(HookSet::ATOMIC) {
            return Ack;
        }
        self.stats.atomics += 1;
        self.trace.line(format_args!("{cpu}: Atomic"));
        Ack
    }

    fn on_app_start(&mut self, cpu: CpuId) {
        if self.state == Lifecycle::AwaitingStart {
            tracing::info!(cpu, "application started; full tracing enabled");
            self.transition(Lifecycle::Active);
        }
    }

    fn on_app_end(&mut self, cpu: CpuId) {
        if self.state == Lifecycle::Active {
            tracing::info!(cpu, "application finished");
            self.transition(Lifecycle::Finished);
        }
    }
}
