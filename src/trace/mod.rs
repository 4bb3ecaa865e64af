pub mod decoder;
pub mod dispatcher;
pub mod sink;

pub use decoder::{Decoded, IcedDecoder, InstructionDecoder};
pub use dispatcher::{DispatcherStats, EventDispatcher, Lifecycle};
pub use sink::TraceSink;
