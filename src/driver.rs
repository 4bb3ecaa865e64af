use crate::config::{FirmwareConfig, ScheduleConfig};
use crate::engine::SimulationEngine;
use crate::error::HarnessError;
use crate::firmware::SfiTables;
use crate::trace::EventDispatcher;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub instructions: u64,
    /// The guest application reported completion.
    pub finished: bool,
}

/// Owns the engine and dispatcher and drives the engine in fixed round-robin slices.
pub struct Driver<E: SimulationEngine> {
    engine: E,
    dispatcher: EventDispatcher,
    schedule: ScheduleConfig,
    tables: SfiTables,
}

impl<E: SimulationEngine> Driver<E> {
    /// Writes the firmware tables into guest memory and prepares the loop. When
    /// `resumed` is set the guest came from saved state and the dispatcher is
    /// switched to full tracing immediately.
    pub fn boot(
        mut engine: E,
        mut dispatcher: EventDispatcher,
        firmware: &FirmwareConfig,
        schedule: ScheduleConfig,
        resumed: bool,
    ) -> Result<Self, HarnessError> {
        let cpus = engine.cpu_count();
        let tables = firmware.builder().build(&mut engine, cpus)?;

        if resumed {
            dispatcher.resume_from_saved_state();
        }

        Ok(Driver {
            engine,
            dispatcher,
            schedule,
            tables,
        })
    }

    pub fn tables(&self) -> &SfiTables {
        &self.tables
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Runs until the dispatcher reports the guest application finished, checking
    /// only between ticks. A tick is `rounds_per_tick` passes over every processor
    /// followed by one timer interrupt.
    pub fn run(&mut self) -> Result<RunSummary, HarnessError> {
        let cpus = self.engine.cpu_count();
        let mut summary = RunSummary {
            ticks: 0,
            instructions: 0,
            finished: false,
        };

        while !self.dispatcher.has_finished() {
            if self.schedule.max_ticks.is_some_and(|max| summary.ticks >= max) {
                tracing::warn!(ticks = summary.ticks, "tick limit reached before the guest finished");
                break;
            }

            for _ in 0..self.schedule.rounds_per_tick {
                for cpu in 0..cpus {
                    summary.instructions +=
                        self.engine
                            .run(cpu, self.schedule.slice_instructions, &mut self.dispatcher)?;
                }
            }
            self.engine.timer_interrupt();
            summary.ticks += 1;
            tracing::trace!(tick = summary.ticks, state = %self.dispatcher.state(), "tick");
        }

        summary.finished = self.dispatcher.has_finished();
        tracing::info!(
            ticks = summary.ticks,
            instructions = summary.instructions,
            finished = summary.finished,
            "run complete"
        );
        Ok(summary)
    }

    pub fn into_parts(self) -> (E, EventDispatcher) {
        (self.engine, self.dispatcher)
    }
}
