//! Integration tests for the event dispatcher
//!
//! These tests drive the dispatcher directly through the listener interface and
//! check the subscription lifecycle and the rendered trace lines.

mod mocks;

use mocks::{BrokenPipe, Capture};
use rusty_harness::devices::port_io::{CMOS_DATA_PORT, CMOS_INDEX_PORT};
use rusty_harness::engine::Ack;
use rusty_harness::trace::{Decoded, InstructionDecoder};
use rusty_harness::{AccessKind, EventListener, HookSet, InstClass, Lifecycle, SymbolMap};

const NOP: &[u8] = &[0x90];

fn symbols() -> SymbolMap {
    [(0xc0100000u64, "start_kernel"), (0xc0100200, "schedule")]
        .into_iter()
        .collect()
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_fresh_run_needs_exactly_one_start() {
        let mut cap = Capture::new(SymbolMap::new());
        assert_eq!(cap.dispatcher.state(), Lifecycle::AwaitingStart);
        assert_eq!(cap.dispatcher.hooks(), HookSet::BOOTSTRAP);

        cap.dispatcher.on_app_start(1);
        assert_eq!(cap.dispatcher.state(), Lifecycle::Active);
        assert_eq!(cap.dispatcher.hooks(), HookSet::FULL);

        // Other processors report the start too.
        cap.dispatcher.on_app_start(0);
        cap.dispatcher.on_app_start(3);
        assert_eq!(cap.dispatcher.state(), Lifecycle::Active);
    }

    #[test]
    fn test_resume_activates_without_start_event() {
        let mut cap = Capture::new(SymbolMap::new());
        cap.dispatcher.resume_from_saved_state();
        assert_eq!(cap.dispatcher.state(), Lifecycle::Active);

        cap.dispatcher.on_interrupt(0, 0xef);
        assert_eq!(cap.trace_lines(), vec!["0: Interrupt 0xef"]);
    }

    #[test]
    fn test_end_sets_finished_once_and_silences_everything() {
        let mut cap = Capture::new(SymbolMap::new());
        cap.dispatcher.on_app_start(0);
        cap.dispatcher.on_app_end(1);
        assert!(cap.dispatcher.has_finished());
        assert!(cap.dispatcher.hooks().is_empty());

        cap.dispatcher.on_app_end(0);
        cap.dispatcher.on_instruction(0, 0xc0100000, 0x100000, NOP, InstClass::Call);
        cap.dispatcher.on_memory_access(0, 0x1000, 0x1000, 8, AccessKind::Write);
        cap.dispatcher.on_interrupt(0, 0x30);
        assert_eq!(cap.dispatcher.on_io(0, 0x80, 1, AccessKind::Write, 0), None);
        cap.dispatcher.on_register_change(0, 1, 4, AccessKind::Write);
        cap.dispatcher.on_atomic(0);

        assert!(cap.dispatcher.has_finished());
        assert!(cap.trace_lines().is_empty());
        assert!(cap.marker_lines().is_empty());
        assert_eq!(cap.dispatcher.stats().instructions, 0);
    }

    #[test]
    fn test_bootstrap_traces_io_but_not_memory() {
        let mut cap = Capture::new(SymbolMap::new());
        cap.dispatcher.on_memory_access(0, 0x1000, 0x1000, 4, AccessKind::Read);
        cap.dispatcher.on_interrupt(0, 0x20);
        cap.dispatcher.on_register_change(0, 3, 4, AccessKind::Read);
        cap.dispatcher.on_atomic(0);
        cap.dispatcher.on_io(0, 0x80, 1, AccessKind::Write, 0);

        assert_eq!(cap.trace_lines(), vec!["0: I/O WR: (0x80): 8 bits: 0x0"]);
    }
}

#[cfg(test)]
mod rendering_tests {
    use super::*;

    fn active() -> Capture {
        let mut cap = Capture::new(SymbolMap::new());
        cap.dispatcher.on_app_start(0);
        cap
    }

    #[test]
    fn test_memory_access_line() {
        let mut cap = active();
        cap.dispatcher.on_memory_access(1, 0xc0123456, 0x123456, 4, AccessKind::Read);
        cap.dispatcher.on_memory_access(0, 0xffff8800, 0x8800, 8, AccessKind::Write);
        assert_eq!(
            cap.trace_lines(),
            vec![
                "1:  RD(0xc0123456/0x123456): 32 bits.",
                "0:  WR(0xffff8800/0x8800): 64 bits.",
            ]
        );
    }

    #[test]
    fn test_interrupt_line_pads_vector() {
        let mut cap = active();
        assert_eq!(cap.dispatcher.on_interrupt(2, 0x0e), Ack);
        assert_eq!(cap.trace_lines(), vec!["2: Interrupt 0x0e"]);
    }

    #[test]
    fn test_io_lines() {
        let mut cap = active();
        cap.dispatcher.on_io(0, 0x3f8, 1, AccessKind::Write, 0x41);
        cap.dispatcher.on_io(1, 0x64, 1, AccessKind::Read, 0);
        cap.dispatcher.on_io(0, 0xcf8, 4, AccessKind::Write, 0x8000_0000);
        assert_eq!(
            cap.trace_lines(),
            vec![
                "0: I/O WR: (0x3f8): 8 bits: 0x41",
                "1: I/O RD: (0x64): 8 bits",
                "0: I/O WR: (0xcf8): 32 bits: 0x80000000",
            ]
        );
        assert_eq!(cap.dispatcher.stats().unsupported_ports, 1);
    }

    #[test]
    fn test_register_and_flag_lines() {
        let mut cap = active();
        cap.dispatcher.on_register_change(0, 3, 4, AccessKind::Write);
        cap.dispatcher.on_register_change(1, 0x8d5, 0, AccessKind::Read);
        assert_eq!(
            cap.trace_lines(),
            vec!["0: Reg WR 3: 32 bits.", "1: Flag RD: mask=0x8d5"]
        );
    }

    #[test]
    fn test_atomic_line() {
        let mut cap = active();
        assert_eq!(cap.dispatcher.on_atomic(3), Ack);
        assert_eq!(cap.trace_lines(), vec!["3: Atomic"]);
    }

    #[test]
    fn test_io_is_delegated_to_port_device() {
        let mut cap = active();
        cap.dispatcher.on_io(0, CMOS_INDEX_PORT, 1, AccessKind::Write, 0x0a);
        assert_eq!(cap.dispatcher.ports().selected_index(), Some(0x0a));

        let data = cap.dispatcher.on_io(0, CMOS_DATA_PORT, 1, AccessKind::Read, 0);
        assert_eq!(data, None);
        assert_eq!(cap.dispatcher.stats().unsupported_ports, 1);
        assert_eq!(cap.dispatcher.stats().io_accesses, 2);
    }
}

#[cfg(test)]
mod instruction_tests {
    use super::*;

    /// Decoder that fails on every other call.
    struct Flaky {
        calls: usize,
    }

    impl InstructionDecoder for Flaky {
        fn decode(&mut self, _bytes: &[u8]) -> Decoded {
            self.calls += 1;
            Decoded {
                count: self.calls % 2,
                mnemonic: "nop".to_string(),
                operands: String::new(),
            }
        }
    }

    #[test]
    fn test_symbol_hit_emits_one_marker() {
        let mut cap = Capture::new(symbols());
        cap.dispatcher.on_instruction(2, 0xc0100000, 0x100000, NOP, InstClass::Call);
        assert_eq!(cap.marker_lines(), vec!["===start_kernel()=== - 2"]);
        assert!(cap.trace_lines().is_empty());
    }

    #[test]
    fn test_marker_and_trace_reach_writers_without_flush() {
        let mut cap = Capture::new(symbols());
        cap.dispatcher.on_instruction(1, 0xc0100200, 0x100200, NOP, InstClass::Call);
        assert_eq!(cap.markers.contents(), "===schedule()=== - 1\n");

        cap.dispatcher.on_app_start(1);
        cap.dispatcher.on_atomic(1);
        assert_eq!(cap.trace.contents(), "1: Atomic\n");
    }

    #[test]
    fn test_misses_emit_nothing() {
        let mut cap = Capture::new(symbols());
        for i in 0..1000u64 {
            cap.dispatcher.on_instruction(0, 0xc0100001 + i, 0x100001 + i, NOP, InstClass::IntBasic);
        }
        assert!(cap.marker_lines().is_empty());
        assert_eq!(cap.dispatcher.stats().instructions, 1000);
        assert_eq!(cap.dispatcher.stats().symbol_hits, 0);
    }

    #[test]
    fn test_marker_per_hit_regardless_of_misses() {
        let mut cap = Capture::new(symbols());
        cap.dispatcher.on_instruction(0, 0x1234, 0x1234, NOP, InstClass::IntBasic);
        cap.dispatcher.on_instruction(1, 0xc0100200, 0x100200, NOP, InstClass::Call);
        cap.dispatcher.on_instruction(0, 0x5678, 0x5678, NOP, InstClass::IntBasic);
        assert_eq!(cap.marker_lines(), vec!["===schedule()=== - 1"]);
    }

    #[test]
    fn test_decode_failures_are_counted_not_rendered() {
        let mut cap = Capture::new(SymbolMap::new());
        cap.dispatcher = cap
            .dispatcher
            .with_decoder(Box::new(Flaky { calls: 0 }));
        for _ in 0..4 {
            cap.dispatcher.on_instruction(0, 0x1000, 0x1000, NOP, InstClass::Null);
        }
        assert_eq!(cap.dispatcher.stats().decode_failures, 2);
        assert!(cap.trace_lines().is_empty());
        assert!(cap.marker_lines().is_empty());
    }

    #[test]
    fn test_optional_instruction_trace() {
        let mut cap = Capture::new(SymbolMap::new());
        cap.dispatcher = cap.dispatcher.with_instruction_trace(true);

        cap.dispatcher
            .on_instruction(0, 0xc0100000, 0x100000, &[0xb8, 0x01, 0x00, 0x00, 0x00], InstClass::IntBasic);
        cap.dispatcher.on_instruction(1, 0xc0100005, 0x100005, &[0x0f], InstClass::Null);

        assert_eq!(
            cap.trace_lines(),
            vec![
                "0: Inst@(0xc0100000/0x100000): mov eax,1 (QSIM_INST_INTBASIC)",
                "1: Inst@(0xc0100005/0x100005): [Decoding Error] (QSIM_INST_NULL)",
            ]
        );
    }

    #[test]
    fn test_trace_failure_is_reported_at_finish() {
        let cap = Capture::new(SymbolMap::new());
        let mut dispatcher = cap
            .dispatcher
            .with_markers(rusty_harness::TraceSink::new(Box::new(BrokenPipe)));
        dispatcher.on_instruction(0, 0, 0, NOP, InstClass::Null);
        dispatcher.on_instruction(0, 0, 0, NOP, InstClass::Null);
        assert!(dispatcher.finish().is_ok());

        let cap = Capture::new(symbols());
        let mut dispatcher = cap
            .dispatcher
            .with_markers(rusty_harness::TraceSink::new(Box::new(BrokenPipe)));
        dispatcher.on_instruction(0, 0xc0100000, 0, NOP, InstClass::Null);
        assert!(dispatcher.finish().is_err());
    }
}
