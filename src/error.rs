use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("instrument {instrument} references unknown operator {index}")]
    UnknownOperator { instrument: usize, index: i64 },

    #[error("instrument {instrument} references unknown patch {index}")]
    UnknownPatch { instrument: usize, index: usize },

    #[error(
        "{instrument:04} - {mode} AN={active} NN={voices} -- con1={con1}, con2={con2}\n\
         {predicted} computed - {measured} actual ({peak} peak, {min}<{max})"
    )]
    SilenceMismatch {
        instrument: usize,
        mode: &'static str,
        active: usize,
        voices: usize,
        con1: u8,
        con2: u8,
        predicted: &'static str,
        measured: &'static str,
        peak: f64,
        min: i16,
        max: i16,
    },

    #[error("measurement worker panicked")]
    WorkerPanicked,

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}
