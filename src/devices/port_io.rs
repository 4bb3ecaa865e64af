//! # Legacy Port I/O
//!
//! Minimal emulation of the PC port space. Nothing here models real hardware: the
//! goal is that a booting kernel's probes of the interrupt controllers, timer,
//! keyboard controller, serial port and friends are acknowledged quietly, while
//! anything unexpected is reported.
//!
//! The only state is the CMOS index latch. A write to [`CMOS_INDEX_PORT`] selects a
//! register and the next access to [`CMOS_DATA_PORT`] is forwarded to the
//! [`CmosBackend`] with that index. The data port is handled on its own; it never
//! continues into another port's handling.

use std::fmt;

use crate::devices::cmos::{CmosBackend, CmosStatus, UnimplementedCmos};
use crate::types::AccessKind;

pub const CMOS_INDEX_PORT: u16 = 0x70;
pub const CMOS_DATA_PORT: u16 = 0x71;

/// Devices whose ports are acknowledged without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyDevice {
    Pic,
    Pit,
    Keyboard,
    PostDelay,
    MathCoprocessor,
    Serial,
    EisaElcr,
}

impl fmt::Display for LegacyDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LegacyDevice::Pic => "8259 PIC",
            LegacyDevice::Pit => "8254 PIT",
            LegacyDevice::Keyboard => "keyboard controller",
            LegacyDevice::PostDelay => "delay port",
            LegacyDevice::MathCoprocessor => "80x87 control",
            LegacyDevice::Serial => "COM1",
            LegacyDevice::EisaElcr => "EISA edge/level control",
        };
        f.write_str(name)
    }
}

/// Ports the guest may write without a diagnostic.
fn silent_write(port: u16) -> Option<LegacyDevice> {
    match port {
        0x20 | 0x21 | 0xa0 | 0xa1 => Some(LegacyDevice::Pic),
        0x40..=0x43 => Some(LegacyDevice::Pit),
        0x61 => Some(LegacyDevice::Keyboard),
        // Linux writes here as an I/O delay.
        0x80 => Some(LegacyDevice::PostDelay),
        0xf0 | 0xf1 => Some(LegacyDevice::MathCoprocessor),
        0x3f8..=0x3ff => Some(LegacyDevice::Serial),
        0x4d0 | 0x4d1 => Some(LegacyDevice::EisaElcr),
        _ => None,
    }
}

/// Ports the guest may read without a diagnostic.
fn silent_read(port: u16) -> Option<LegacyDevice> {
    match port {
        0x21 => Some(LegacyDevice::Pic),
        0x40..=0x42 => Some(LegacyDevice::Pit),
        0x60 | 0x61 | 0x64 => Some(LegacyDevice::Keyboard),
        0x3f8..=0x3ff => Some(LegacyDevice::Serial),
        0x4d0 | 0x4d1 => Some(LegacyDevice::EisaElcr),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    /// Acknowledged with no effect.
    Accepted(LegacyDevice),
    /// CMOS index latch updated.
    IndexSelected(u8),
    /// Data port access forwarded to the CMOS backend.
    Cmos(CmosStatus),
    UnsupportedPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortResponse {
    pub status: PortStatus,
    /// Byte the guest observes; only CMOS reads of implemented registers set it.
    pub data: Option<u8>,
}

impl PortResponse {
    fn status(status: PortStatus) -> Self {
        PortResponse { status, data: None }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(
            self.status,
            PortStatus::UnsupportedPort | PortStatus::Cmos(CmosStatus::Unsupported { .. })
        )
    }
}

pub struct PortIoDevice {
    selected_index: Option<u8>,
    cmos: Box<dyn CmosBackend>,
}

impl Default for PortIoDevice {
    fn default() -> Self {
        PortIoDevice::new(Box::new(UnimplementedCmos))
    }
}

impl fmt::Debug for PortIoDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortIoDevice")
            .field("selected_index", &self.selected_index)
            .finish_non_exhaustive()
    }
}

impl PortIoDevice {
    pub fn new(cmos: Box<dyn CmosBackend>) -> Self {
        PortIoDevice {
            selected_index: None,
            cmos,
        }
    }

    pub fn selected_index(&self) -> Option<u8> {
        self.selected_index
    }

    /// Emulates one guest port access. `size` is in bytes and only reported.
    pub fn handle(&mut self, port: u16, size: u8, kind: AccessKind, value: u32) -> PortResponse {
        let response = match (kind, port) {
            (AccessKind::Write, CMOS_INDEX_PORT) => {
                let index = value as u8;
                tracing::debug!(index = format_args!("0x{index:02x}"), "CMOS address");
                self.selected_index = Some(index);
                PortResponse::status(PortStatus::IndexSelected(index))
            }
            (AccessKind::Write, CMOS_DATA_PORT) => {
                let status = match self.selected_index {
                    Some(index) => self.cmos.write(index, value as u8),
                    None => CmosStatus::Unsupported { index: None },
                };
                PortResponse::status(PortStatus::Cmos(status))
            }
            (AccessKind::Read, CMOS_DATA_PORT) => {
                let status = match self.selected_index {
                    Some(index) => self.cmos.read(index),
                    None => CmosStatus::Unsupported { index: None },
                };
                let data = match status {
                    CmosStatus::Read(byte) => Some(byte),
                    _ => None,
                };
                PortResponse {
                    status: PortStatus::Cmos(status),
                    data,
                }
            }
            (AccessKind::Write, _) => match silent_write(port) {
                Some(device) => PortResponse::status(PortStatus::Accepted(device)),
                None => PortResponse::status(PortStatus::UnsupportedPort),
            },
            (AccessKind::Read, _) => match silent_read(port) {
                Some(device) => PortResponse::status(PortStatus::Accepted(device)),
                None => PortResponse::status(PortStatus::UnsupportedPort),
            },
        };

        match response.status {
            PortStatus::UnsupportedPort => tracing::warn!(
                port = format_args!("0x{port:x}"),
                size,
                access = %kind,
                "unsupported port address"
            ),
            PortStatus::Cmos(CmosStatus::Unsupported { index }) => tracing::warn!(
                ?index,
                access = %kind,
                "unsupported CMOS address"
            ),
            _ => {}
        }

        response
    }
}
