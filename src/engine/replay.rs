//! # Replay Engine
//!
//! A deterministic [`SimulationEngine`] driven by a JSON scenario instead of a CPU
//! model. Each processor owns a queue of guest events; a time slice pops events from
//! that processor's queue until its instruction budget is spent.
//!
//! ## Scenario Format
//!
//! ```json
//! {
//!   "cpu_count": 2,
//!   "timer_vector": 239,
//!   "cpus": [
//!     [
//!       {"kind": "instruction", "vaddr": 3221225472, "paddr": 1048576, "bytes": [144]},
//!       {"kind": "io", "port": 112, "size": 1, "access": "write", "value": 10},
//!       {"kind": "app_start"}
//!     ],
//!     []
//!   ]
//! }
//! ```
//!
//! The whole engine (memory, remaining queues, pending interrupts) can be written to
//! and restored from a JSON snapshot.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{EventListener, GuestMemory, HookSet, SimulationEngine};
use crate::error::EngineError;
use crate::types::{AccessKind, CpuId, InstClass, PhysAddr};

pub const PAGE_SIZE: u64 = 4096;
pub const DEFAULT_MEMORY_SIZE: u64 = 1 << 30;
/// Linux local timer vector.
pub const DEFAULT_TIMER_VECTOR: u8 = 0xef;

fn default_timer_vector() -> u8 {
    DEFAULT_TIMER_VECTOR
}

fn default_memory_size() -> u64 {
    DEFAULT_MEMORY_SIZE
}

/// One scripted guest event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuestEvent {
    Instruction {
        vaddr: u64,
        paddr: u64,
        bytes: Vec<u8>,
        #[serde(default)]
        class: InstClass,
    },
    Memory {
        vaddr: u64,
        paddr: u64,
        size: u8,
        access: AccessKind,
    },
    Interrupt {
        vector: u8,
    },
    Io {
        port: u16,
        size: u8,
        access: AccessKind,
        #[serde(default)]
        value: u32,
    },
    Register {
        reg: u32,
        size: u8,
        access: AccessKind,
    },
    Atomic,
    AppStart,
    AppEnd,
    /// Text the guest prints on its console.
    Console {
        text: String,
    },
}

impl GuestEvent {
    /// Hook that must be subscribed for this event to be delivered; console output
    /// is not a hook and always flows.
    pub fn hook(&self) -> Option<HookSet> {
        let hook = match self {
            GuestEvent::Instruction { .. } => HookSet::INSTRUCTION,
            GuestEvent::Memory { .. } => HookSet::MEMORY,
            GuestEvent::Interrupt { .. } => HookSet::INTERRUPT,
            GuestEvent::Io { .. } => HookSet::IO,
            GuestEvent::Register { .. } => HookSet::REGISTER,
            GuestEvent::Atomic => HookSet::ATOMIC,
            GuestEvent::AppStart => HookSet::APP_START,
            GuestEvent::AppEnd => HookSet::APP_END,
            GuestEvent::Console { .. } => return None,
        };
        Some(hook)
    }

    fn deliver(&self, cpu: CpuId, listener: &mut dyn EventListener) {
        match self {
            GuestEvent::Instruction {
                vaddr,
                paddr,
                bytes,
                class,
            } => listener.on_instruction(cpu, *vaddr, *paddr, bytes, *class),
            GuestEvent::Memory {
                vaddr,
                paddr,
                size,
                access,
            } => listener.on_memory_access(cpu, *vaddr, *paddr, *size, *access),
            GuestEvent::Interrupt { vector } => {
                listener.on_interrupt(cpu, *vector);
            }
            GuestEvent::Io {
                port,
                size,
                access,
                value,
            } => {
                if let Some(data) = listener.on_io(cpu, *port, *size, *access, *value) {
                    tracing::trace!(cpu, port, data, "port read satisfied by listener");
                }
            }
            GuestEvent::Register { reg, size, access } => {
                listener.on_register_change(cpu, *reg, *size, *access)
            }
            GuestEvent::Atomic => {
                listener.on_atomic(cpu);
            }
            GuestEvent::AppStart => listener.on_app_start(cpu),
            GuestEvent::AppEnd => listener.on_app_end(cpu),
            GuestEvent::Console { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub cpu_count: usize,
    #[serde(default = "default_timer_vector")]
    pub timer_vector: u8,
    #[serde(default = "default_memory_size")]
    pub memory_size: u64,
    #[serde(default)]
    pub cpus: Vec<Vec<GuestEvent>>,
}

impl Scenario {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        read_json(path.as_ref(), "scenario")
    }
}

/// Serialised engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub cpu_count: usize,
    pub timer_vector: u8,
    pub memory_size: u64,
    /// Page number to page contents.
    pub memory: BTreeMap<u64, Vec<u8>>,
    pub queues: Vec<Vec<GuestEvent>>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &'static str) -> Result<T, EngineError> {
    let content = fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| EngineError::Format {
        what,
        path: path.to_path_buf(),
        source,
    })
}

/// Sparse byte-addressed guest memory. Untouched bytes read as zero.
#[derive(Debug, Clone, Default)]
struct SparseMemory {
    size: u64,
    pages: BTreeMap<u64, Vec<u8>>,
}

impl SparseMemory {
    fn check(&self, addr: PhysAddr, len: usize) -> Result<(), EngineError> {
        let end = addr.value().checked_add(len as u64);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(EngineError::OutOfRange { addr, len }),
        }
    }

    fn write(&mut self, addr: PhysAddr, bytes: &[u8]) -> Result<(), EngineError> {
        self.check(addr, bytes.len())?;
        for (i, &b) in bytes.iter().enumerate() {
            let a = addr.value() + i as u64;
            let page = self
                .pages
                .entry(a / PAGE_SIZE)
                .or_insert_with(|| vec![0; PAGE_SIZE as usize]);
            page[(a % PAGE_SIZE) as usize] = b;
        }
        Ok(())
    }

    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> Result<(), EngineError> {
        self.check(addr, buf.len())?;
        for (i, out) in buf.iter_mut().enumerate() {
            let a = addr.value() + i as u64;
            *out = self
                .pages
                .get(&(a / PAGE_SIZE))
                .map_or(0, |page| page[(a % PAGE_SIZE) as usize]);
        }
        Ok(())
    }
}

pub struct ReplayEngine {
    queues: Vec<VecDeque<GuestEvent>>,
    timer_vector: u8,
    memory: SparseMemory,
    console: Option<Box<dyn Write>>,
}

impl ReplayEngine {
    pub fn new(scenario: Scenario) -> Result<Self, EngineError> {
        if scenario.cpu_count == 0 {
            return Err(EngineError::InvalidState("scenario has no processors".to_string()));
        }
        if scenario.cpus.len() > scenario.cpu_count {
            return Err(EngineError::InvalidState(format!(
                "scenario scripts {} processors but declares {}",
                scenario.cpus.len(),
                scenario.cpu_count
            )));
        }

        let mut queues: Vec<VecDeque<GuestEvent>> =
            scenario.cpus.into_iter().map(VecDeque::from).collect();
        queues.resize_with(scenario.cpu_count, VecDeque::new);

        Ok(ReplayEngine {
            queues,
            timer_vector: scenario.timer_vector,
            memory: SparseMemory {
                size: scenario.memory_size,
                pages: BTreeMap::new(),
            },
            console: None,
        })
    }

    /// An engine with `cpu_count` idle processors.
    pub fn idle(cpu_count: usize) -> Result<Self, EngineError> {
        ReplayEngine::new(Scenario {
            cpu_count,
            timer_vector: DEFAULT_TIMER_VECTOR,
            memory_size: DEFAULT_MEMORY_SIZE,
            cpus: Vec::new(),
        })
    }

    pub fn from_scenario_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        ReplayEngine::new(Scenario::from_json_file(path)?)
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, EngineError> {
        if snapshot.queues.len() != snapshot.cpu_count {
            return Err(EngineError::InvalidState(format!(
                "{} queues saved for {} processors",
                snapshot.queues.len(),
                snapshot.cpu_count
            )));
        }
        if let Some((page, _)) = snapshot
            .memory
            .iter()
            .find(|(_, bytes)| bytes.len() != PAGE_SIZE as usize)
        {
            return Err(EngineError::InvalidState(format!("page {page:#x} has the wrong size")));
        }

        let mut engine = ReplayEngine::new(Scenario {
            cpu_count: snapshot.cpu_count,
            timer_vector: snapshot.timer_vector,
            memory_size: snapshot.memory_size,
            cpus: snapshot.queues,
        })?;
        engine.memory.pages = snapshot.memory;
        Ok(engine)
    }

    /// Restores an engine saved with [`ReplayEngine::save_snapshot`].
    pub fn restore(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let engine = ReplayEngine::from_snapshot(read_json(path, "snapshot")?)?;
        tracing::info!(path = %path.display(), cpus = engine.cpu_count(), "restored saved state");
        Ok(engine)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            cpu_count: self.queues.len(),
            timer_vector: self.timer_vector,
            memory_size: self.memory.size,
            memory: self.memory.pages.clone(),
            queues: self
                .queues
                .iter()
                .map(|q| q.iter().cloned().collect())
                .collect(),
        }
    }

    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref();
        let json = serde_json::to_string(&self.snapshot()).map_err(|source| EngineError::Format {
            what: "snapshot",
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "saved engine state");
        Ok(())
    }

    /// Events still queued for `cpu`.
    pub fn pending(&self, cpu: CpuId) -> usize {
        self.queues.get(cpu).map_or(0, VecDeque::len)
    }

    pub fn is_drained(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    fn emit_console(&mut self, text: &str) {
        if let Some(console) = self.console.as_mut() {
            if let Err(err) = console.write_all(text.as_bytes()).and_then(|()| console.flush()) {
                tracing::warn!(%err, "guest console output lost");
            }
        }
    }
}

impl GuestMemory for ReplayEngine {
    fn write(&mut self, addr: PhysAddr, bytes: &[u8]) -> Result<(), EngineError> {
        self.memory.write(addr, bytes)
    }

    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> Result<(), EngineError> {
        self.memory.read(addr, buf)
    }
}

impl SimulationEngine for ReplayEngine {
    fn cpu_count(&self) -> usize {
        self.queues.len()
    }

    fn run(
        &mut self,
        cpu: CpuId,
        instructions: u64,
        listener: &mut dyn EventListener,
    ) -> Result<u64, EngineError> {
        let count = self.queues.len();
        if cpu >= count {
            return Err(EngineError::NoSuchCpu { cpu, count });
        }

        let mut retired = 0;
        while retired < instructions {
            let Some(event) = self.queues[cpu].pop_front() else {
                break;
            };
            if matches!(event, GuestEvent::Instruction { .. }) {
                retired += 1;
            }

            match event.hook() {
                None => {
                    if let GuestEvent::Console { text } = &event {
                        self.emit_console(text);
                    }
                }
                Some(hook) if listener.hooks().contains(hook) => event.deliver(cpu, listener),
                Some(_) => {}
            }
        }
        Ok(retired)
    }

    fn timer_interrupt(&mut self) {
        let vector = self.timer_vector;
        for queue in &mut self.queues {
            queue.push_front(GuestEvent::Interrupt { vector });
        }
    }

    fn connect_console(&mut self, console: Box<dyn Write>) {
        self.console = Some(console);
    }
}
