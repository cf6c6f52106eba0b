//! Envelope duration measurement for OPL3 FM instrument banks.
//!
//! Every instrument of a bank is played on an emulated chip, and the time
//! its sound needs to settle after key-on and to fade out after key-off is
//! derived from the windowed RMS of the output. Results are cached on disk
//! by instrument content so unchanged instruments are never measured twice.

#[cfg(test)]
#[path = "./lib_test.rs"]
mod lib_test;

pub mod analyzer;
pub mod bank;
pub mod cache;
pub mod chip;
pub mod error;
pub mod history;
pub mod instrument;
pub mod pool;
pub mod programmer;
pub mod scheduler;

#[cfg(test)]
mod testing;

use std::thread;

pub use analyzer::{measure, EnvelopeResult};
pub use chip::{Chip, OplChip};
pub use error::MeasureError;
pub use instrument::InstrumentDefinition;
pub use scheduler::{Progress, ProgressSnapshot, Scheduler};

pub struct MeasureSettings {
    /// Measurements allowed to run at the same time.
    pub capacity: usize,
    /// Fail the run when the emulator disagrees with the register based
    /// silence prediction.
    pub verify_silence: bool,
}

impl Default for MeasureSettings {
    fn default() -> Self {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        MeasureSettings {
            capacity: cores * 2,
            verify_silence: true,
        }
    }
}

/// A scheduler running every measurement on its own dbopl chip.
pub fn dbopl_scheduler(settings: MeasureSettings) -> Scheduler<fn() -> Chip> {
    let new_chip: fn() -> Chip = || Chip::new(programmer::OUTPUT_RATE);
    Scheduler::new(settings, new_chip)
}
