//! Mock implementations for testing the harness
//!
//! This module provides recording guest memory, a capturing trace buffer and a
//! scripted engine so the firmware builder, dispatcher and driver can be observed
//! without a real simulator.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;

use rusty_harness::engine::{EventListener, GuestMemory, HookSet, SimulationEngine};
use rusty_harness::error::EngineError;
use rusty_harness::types::{CpuId, PhysAddr};
use rusty_harness::{EventDispatcher, SymbolMap, TraceSink};

/// Cloneable in-memory writer; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Rc<RefCell<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> TraceSink {
        TraceSink::new(Box::new(self.clone()))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.borrow()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer whose every write fails; flushing with nothing to write succeeds.
pub struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Guest memory that records every access in order.
#[derive(Debug, Default)]
pub struct RecordingMemory {
    pub bytes: HashMap<u64, u8>,
    pub writes: Vec<(u64, Vec<u8>)>,
    pub reads: RefCell<usize>,
    /// Writes ending past this address fail.
    pub limit: Option<u64>,
}

impl RecordingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn slice(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.bytes.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }

    pub fn read_count(&self) -> usize {
        *self.reads.borrow()
    }
}

impl GuestMemory for RecordingMemory {
    fn write(&mut self, addr: PhysAddr, bytes: &[u8]) -> Result<(), EngineError> {
        if let Some(limit) = self.limit {
            if addr.value() + bytes.len() as u64 > limit {
                return Err(EngineError::OutOfRange {
                    addr,
                    len: bytes.len(),
                });
            }
        }
        for (i, &b) in bytes.iter().enumerate() {
            self.bytes.insert(addr.value() + i as u64, b);
        }
        self.writes.push((addr.value(), bytes.to_vec()));
        Ok(())
    }

    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> Result<(), EngineError> {
        *self.reads.borrow_mut() += 1;
        for (i, out) in buf.iter_mut().enumerate() {
            *out = self.bytes.get(&(addr.value() + i as u64)).copied().unwrap_or(0);
        }
        Ok(())
    }
}

/// Engine that records the schedule it is driven with and raises lifecycle events
/// at chosen slice numbers (1-based).
#[derive(Debug, Default)]
pub struct MockEngine {
    pub cpus: usize,
    pub memory: RecordingMemory,
    pub slices: Vec<(CpuId, u64)>,
    pub timer_ticks: u64,
    pub start_at_slice: Option<usize>,
    pub end_at_slice: Option<usize>,
    /// Hook sets observed at the start of each slice.
    pub observed_hooks: Vec<HookSet>,
}

impl MockEngine {
    pub fn new(cpus: usize) -> Self {
        Self {
            cpus,
            ..Self::default()
        }
    }

    pub fn starting_at(mut self, slice: usize) -> Self {
        self.start_at_slice = Some(slice);
        self
    }

    pub fn ending_at(mut self, slice: usize) -> Self {
        self.end_at_slice = Some(slice);
        self
    }
}

impl GuestMemory for MockEngine {
    fn write(&mut self, addr: PhysAddr, bytes: &[u8]) -> Result<(), EngineError> {
        self.memory.write(addr, bytes)
    }

    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> Result<(), EngineError> {
        self.memory.read(addr, buf)
    }
}

impl SimulationEngine for MockEngine {
    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn run(
        &mut self,
        cpu: CpuId,
        instructions: u64,
        listener: &mut dyn EventListener,
    ) -> Result<u64, EngineError> {
        self.slices.push((cpu, instructions));
        self.observed_hooks.push(listener.hooks());
        let slice = self.slices.len();

        if self.start_at_slice == Some(slice) && listener.hooks().contains(HookSet::APP_START) {
            listener.on_app_start(cpu);
        }
        if self.end_at_slice == Some(slice) && listener.hooks().contains(HookSet::APP_END) {
            listener.on_app_end(cpu);
        }
        Ok(instructions)
    }

    fn timer_interrupt(&mut self) {
        self.timer_ticks += 1;
    }

    fn connect_console(&mut self, _console: Box<dyn Write>) {}
}

/// Dispatcher whose trace and marker outputs are captured.
pub struct Capture {
    pub dispatcher: EventDispatcher,
    pub trace: SharedBuffer,
    pub markers: SharedBuffer,
}

impl Capture {
    pub fn new(symbols: SymbolMap) -> Self {
        let trace = SharedBuffer::new();
        let markers = SharedBuffer::new();
        let dispatcher =
            EventDispatcher::new(trace.sink(), Arc::new(symbols)).with_markers(markers.sink());
        Self {
            dispatcher,
            trace,
            markers,
        }
    }

    pub fn trace_lines(&mut self) -> Vec<String> {
        self.dispatcher.flush().expect("flush trace");
        self.trace.lines()
    }

    pub fn marker_lines(&mut self) -> Vec<String> {
        self.dispatcher.flush().expect("flush markers");
        self.markers.lines()
    }
}
