use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a simulated processor.
pub type CpuId = usize;

/// Direction of a guest access as reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    /// Two-letter tag used in trace lines.
    pub fn tag(self) -> &'static str {
        match self {
            AccessKind::Read => "RD",
            AccessKind::Write => "WR",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Coarse instruction class attached to every retired instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstClass {
    #[default]
    Null,
    IntBasic,
    IntMul,
    IntDiv,
    Stack,
    Branch,
    Call,
    Return,
    Trap,
    FpBasic,
    FpMul,
    FpDiv,
}

impl InstClass {
    pub fn name(self) -> &'static str {
        match self {
            InstClass::Null => "QSIM_INST_NULL",
            InstClass::IntBasic => "QSIM_INST_INTBASIC",
            InstClass::IntMul => "QSIM_INST_INTMUL",
            InstClass::IntDiv => "QSIM_INST_INTDIV",
            InstClass::Stack => "QSIM_INST_STACK",
            InstClass::Branch => "QSIM_INST_BR",
            InstClass::Call => "QSIM_INST_CALL",
            InstClass::Return => "QSIM_INST_RET",
            InstClass::Trap => "QSIM_INST_TRAP",
            InstClass::FpBasic => "QSIM_INST_FPBASIC",
            InstClass::FpMul => "QSIM_INST_FPMUL",
            InstClass::FpDiv => "QSIM_INST_FPDIV",
        }
    }
}

impl fmt::Display for InstClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Guest physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysAddr(u64);

impl PhysAddr {
    pub const fn new(value: u64) -> Self {
        PhysAddr(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// `self + bytes`, or `None` past the end of the 64-bit address space.
    pub const fn offset(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(value) => Some(PhysAddr(value)),
            None => None,
        }
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for PhysAddr {
    fn from(value: u64) -> Self {
        PhysAddr::new(value)
    }
}

impl From<PhysAddr> for u64 {
    fn from(value: PhysAddr) -> Self {
        value.value()
    }
}
