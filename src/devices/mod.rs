pub mod cmos;
pub mod port_io;

pub use cmos::{CmosBackend, CmosStatus, UnimplementedCmos};
pub use port_io::{PortIoDevice, PortResponse, PortStatus};
