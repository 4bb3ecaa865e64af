use serde::{Deserialize, Serialize};

use crate::engine::GuestMemory;
use crate::error::EngineError;
use crate::firmware::checksum;
use crate::types::PhysAddr;

/// Table signatures in guest memory order (first byte at the lowest address).
pub const SYSTEM_SIGNATURE: [u8; 4] = *b"SYST";
pub const CPUS_SIGNATURE: [u8; 4] = *b"CPUS";
pub const IOAPIC_SIGNATURE: [u8; 4] = *b"APIC";

pub const VENDOR_ID: [u8; 6] = *b"qsim00";
pub const OEM_TABLE_ID: [u8; 8] = [0; 8];
pub const REVISION: u8 = 1;

pub const HEADER_LEN: usize = 24;
pub const CHECKSUM_OFFSET: usize = 9;

pub const DEFAULT_TABLE_BASE: u64 = 0xe0000;
pub const DEFAULT_IOAPIC_MMIO_BASE: u64 = 0xa0000;
pub const CPU_TABLE_OFFSET: u64 = 0x30;

const SYSTEM_TABLE_LEN: usize = HEADER_LEN + 2 * 8;
const IOAPIC_TABLE_LEN: usize = HEADER_LEN + 8;

/// Where the IO-APIC table sits relative to the CPU table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoApicPlacement {
    /// Directly after the CPU table: `24 + 4 * n`.
    #[default]
    Natural,
    /// One 16-byte block per four processors: `24 + (n / 4) * 16`. Overlaps the
    /// tail of the CPU table when `n` is not a multiple of four.
    Packed,
}

impl IoApicPlacement {
    pub fn offset(self, processor_count: usize) -> u64 {
        let n = processor_count as u64;
        match self {
            IoApicPlacement::Natural => HEADER_LEN as u64 + 4 * n,
            IoApicPlacement::Packed => HEADER_LEN as u64 + (n / 4) * 16,
        }
    }
}

/// Base addresses of the three tables for a given processor count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfiLayout {
    pub system: PhysAddr,
    pub cpus: PhysAddr,
    pub ioapic: PhysAddr,
    pub processor_count: usize,
}

/// `base + bytes`, failing like an out-of-range guest write when the sum wraps.
fn advance(base: PhysAddr, bytes: u64) -> Result<PhysAddr, EngineError> {
    base.offset(bytes).ok_or_else(|| EngineError::OutOfRange {
        addr: base,
        len: usize::try_from(bytes).unwrap_or(usize::MAX),
    })
}

impl SfiLayout {
    /// Fails when any table would extend past the end of the address space.
    pub fn new(
        base: PhysAddr,
        processor_count: usize,
        placement: IoApicPlacement,
    ) -> Result<Self, EngineError> {
        let cpus = advance(base, CPU_TABLE_OFFSET)?;
        let layout = SfiLayout {
            system: base,
            cpus,
            ioapic: advance(cpus, placement.offset(processor_count))?,
            processor_count,
        };
        advance(layout.cpus, layout.cpus_len() as u64)?;
        advance(layout.ioapic, IOAPIC_TABLE_LEN as u64)?;
        Ok(layout)
    }

    pub fn cpus_len(&self) -> usize {
        HEADER_LEN + 4 * self.processor_count
    }
}

/// A table as it was written into guest memory, checksum included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfiTable {
    pub signature: [u8; 4],
    pub base: PhysAddr,
    pub bytes: Vec<u8>,
}

impl SfiTable {
    pub fn declared_len(&self) -> u32 {
        u32::from_le_bytes([self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]])
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[CHECKSUM_OFFSET]
    }

    pub fn vendor_id(&self) -> &[u8] {
        &self.bytes[10..16]
    }
}

#[derive(Debug, Clone)]
pub struct SfiTables {
    pub layout: SfiLayout,
    pub system: SfiTable,
    pub cpus: SfiTable,
    pub ioapic: SfiTable,
}

impl SfiTables {
    pub fn iter(&self) -> impl Iterator<Item = &SfiTable> {
        [&self.system, &self.cpus, &self.ioapic].into_iter()
    }
}

/// Issues field writes for one table and keeps a copy of every byte written, so the
/// checksum is computed without reading guest memory back.
struct TableWriter<'m, M: GuestMemory + ?Sized> {
    memory: &'m mut M,
    signature: [u8; 4],
    base: PhysAddr,
    image: Vec<u8>,
}

impl<'m, M: GuestMemory + ?Sized> TableWriter<'m, M> {
    fn begin(
        memory: &'m mut M,
        signature: [u8; 4],
        base: PhysAddr,
        len: usize,
    ) -> Result<Self, EngineError> {
        let mut writer = TableWriter {
            memory,
            signature,
            base,
            image: vec![0; len],
        };

        writer.put(0, &signature)?;
        writer.put(4, &(len as u32).to_le_bytes())?;
        writer.put(8, &[REVISION])?;
        writer.put(10, &VENDOR_ID)?;
        writer.put(16, &OEM_TABLE_ID)?;
        Ok(writer)
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), EngineError> {
        debug_assert!(offset + bytes.len() <= self.image.len());
        self.memory.write(advance(self.base, offset as u64)?, bytes)?;
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn seal(mut self) -> Result<SfiTable, EngineError> {
        let sum = checksum::compute(&self.image, CHECKSUM_OFFSET);
        self.put(CHECKSUM_OFFSET, &[sum])?;

        tracing::debug!(
            table = %String::from_utf8_lossy(&self.signature),
            base = %self.base,
            bytes = ?self.image,
            checksum = format_args!("{sum:02x}"),
            "wrote firmware table"
        );

        Ok(SfiTable {
            signature: self.signature,
            base: self.base,
            bytes: self.image,
        })
    }
}

/// Writes the SYST, CPUS and APIC tables the guest kernel scans for at boot.
#[derive(Debug, Clone, Copy)]
pub struct SfiBuilder {
    base: PhysAddr,
    ioapic_mmio: PhysAddr,
    placement: IoApicPlacement,
}

impl Default for SfiBuilder {
    fn default() -> Self {
        SfiBuilder::new(
            PhysAddr::new(DEFAULT_TABLE_BASE),
            PhysAddr::new(DEFAULT_IOAPIC_MMIO_BASE),
        )
    }
}

impl SfiBuilder {
    pub fn new(base: PhysAddr, ioapic_mmio: PhysAddr) -> Self {
        SfiBuilder {
            base,
            ioapic_mmio,
            placement: IoApicPlacement::default(),
        }
    }

    pub fn with_placement(mut self, placement: IoApicPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn layout(&self, processor_count: usize) -> Result<SfiLayout, EngineError> {
        SfiLayout::new(self.base, processor_count, self.placement)
    }

    /// Writes all three tables in order. Any write the engine rejects aborts the build.
    pub fn build<M: GuestMemory + ?Sized>(
        &self,
        memory: &mut M,
        processor_count: usize,
    ) -> Result<SfiTables, EngineError> {
        let layout = self.layout(processor_count)?;

        if self.placement == IoApicPlacement::Packed && processor_count % 4 != 0 {
            tracing::warn!(
                processor_count,
                "packed IO-APIC placement overlaps the CPU table; its checksum will not hold"
            );
        }

        let mut system = TableWriter::begin(memory, SYSTEM_SIGNATURE, layout.system, SYSTEM_TABLE_LEN)?;
        system.put(24, &layout.cpus.value().to_le_bytes())?;
        system.put(32, &layout.ioapic.value().to_le_bytes())?;
        let system = system.seal()?;

        let mut cpus = TableWriter::begin(memory, CPUS_SIGNATURE, layout.cpus, layout.cpus_len())?;
        for i in 0..processor_count {
            // Local APIC id of each processor is its index.
            cpus.put(HEADER_LEN + 4 * i, &(i as u32).to_le_bytes())?;
        }
        let cpus = cpus.seal()?;

        let mut ioapic = TableWriter::begin(memory, IOAPIC_SIGNATURE, layout.ioapic, IOAPIC_TABLE_LEN)?;
        ioapic.put(24, &self.ioapic_mmio.value().to_le_bytes())?;
        let ioapic = ioapic.seal()?;

        tracing::info!(
            system = %layout.system,
            cpus = %layout.cpus,
            ioapic = %layout.ioapic,
            processor_count,
            "SFI tables in place"
        );

        Ok(SfiTables {
            layout,
            system,
            cpus,
            ioapic,
        })
    }
}
