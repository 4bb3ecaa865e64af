/// Result of a CMOS register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmosStatus {
    /// Register read produced a value for the guest.
    Read(u8),
    Written,
    /// No register is implemented at this index. `None` means the guest never
    /// selected an index before touching the data port.
    Unsupported { index: Option<u8> },
}

/// Register file behind the CMOS index/data port pair.
pub trait CmosBackend {
    fn read(&mut self, index: u8) -> CmosStatus;
    fn write(&mut self, index: u8, data: u8) -> CmosStatus;
}

/// Backend with no registers; every index is reported unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedCmos;

impl CmosBackend for UnimplementedCmos {
    fn read(&mut self, index: u8) -> CmosStatus {
        tracing::debug!(index = format_args!("0x{index:02x}"), "CMOS read");
        CmosStatus::Unsupported { index: Some(index) }
    }

    fn write(&mut self, index: u8, data: u8) -> CmosStatus {
        tracing::debug!(
            index = format_args!("0x{index:02x}"),
            data = format_args!("0x{data:02x}"),
            "CMOS write"
        );
        CmosStatus::Unsupported { index: Some(index) }
    }
}
