//! Envelope analysis of a single instrument.
//!
//! The instrument is keyed on and rendered in 1/150 s periods until its
//! windowed RMS falls to a small fraction of the peak, then keyed off and
//! rendered until the release tail has faded. The two settle times are what
//! a MIDI player needs to know about when it can steal a channel.

use std::f64::consts::PI;

use log::debug;

use crate::cache::Durations;
use crate::chip::OplChip;
use crate::history::AudioHistory;
use crate::instrument::InstrumentDefinition;
use crate::programmer::{Programmer, OUTPUT_RATE};

/// Analysis periods per second.
pub const PERIODS_PER_SECOND: u32 = 150;

const SAMPLES_PER_PERIOD: usize = (OUTPUT_RATE / PERIODS_PER_SECOND) as usize;

/// Seconds of audio the RMS window looks back over.
const HISTORY_SECONDS: f64 = 0.1;

const MAX_PERIODS_ON: usize = 40 * PERIODS_PER_SECOND as usize;
const MAX_PERIODS_OFF: usize = 60 * PERIODS_PER_SECOND as usize;
/// Early exits are only taken after this many periods.
const MIN_PERIODS: usize = 6 * PERIODS_PER_SECOND as usize;

const MIN_COEFFICIENT_ON: f64 = 0.008;
const MIN_COEFFICIENT_OFF: f64 = 0.2;

/// Frames rendered per chip call.
const BLOCK_FRAMES: usize = 256;

/// Sample values within this distance of zero count as silence.
pub const SILENCE_EPSILON: i16 = 1;

fn history_capacity() -> usize {
    (HISTORY_SECONDS * OUTPUT_RATE as f64).ceil() as usize
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvelopeResult {
    pub peak_amplitude_time: usize,
    pub peak_amplitude_value: f64,
    pub begin_amplitude: f64,
    /// Periods after key-on until the RMS settled below the on threshold.
    pub quarter_amplitude_time: usize,
    /// Periods after key-off until the RMS fell below the off threshold.
    pub keyoff_out_time: usize,
    pub ms_sound_kon: i64,
    pub ms_sound_koff: i64,
    pub nosound: bool,
    pub sound_min: i16,
    pub sound_max: i16,
}

impl EnvelopeResult {
    pub fn durations(&self) -> Durations {
        Durations {
            ms_sound_kon: self.ms_sound_kon,
            ms_sound_koff: self.ms_sound_koff,
            nosound: self.nosound,
        }
    }
}

/// Fills `window` with a Hann window over its whole length.
pub fn hann_window(window: &mut [f64]) {
    let n = window.len();
    if n < 2 {
        window.fill(1.0);
        return;
    }
    let scale = 2.0 * PI / (n - 1) as f64;
    for (i, w) in window.iter_mut().enumerate() {
        *w = 0.5 * (1.0 - (scale * i as f64).cos());
    }
}

/// Standard deviation of the windowed samples.
pub fn measure_rms(signal: &[f64], window: &[f64]) -> f64 {
    let n = signal.len().min(window.len());
    if n < 2 {
        return 0.0;
    }
    let weighted = || signal.iter().zip(window).map(|(s, w)| s * w);
    let mean = weighted().sum::<f64>() / n as f64;
    let square_sum: f64 = weighted().map(|x| (x - mean) * (x - mean)).sum();
    (square_sum / (n - 1) as f64).sqrt()
}

struct Session<'c, C: ?Sized> {
    chip: &'c mut C,
    history: AudioHistory<f64>,
    window: Vec<f64>,
    buffer: [i16; 2 * BLOCK_FRAMES],
    sound_min: i16,
    sound_max: i16,
}

impl<'c, C: OplChip + ?Sized> Session<'c, C> {
    fn new(chip: &'c mut C) -> Session<'c, C> {
        Session {
            chip,
            history: AudioHistory::new(history_capacity()),
            window: Vec::new(),
            buffer: [0; 2 * BLOCK_FRAMES],
            sound_min: 0,
            sound_max: 0,
        }
    }

    /// Renders one period into the history, optionally tracking the range
    /// of the left channel.
    fn render_period(&mut self, track_range: bool) {
        let mut done = 0;
        while done < SAMPLES_PER_PERIOD {
            let block = (SAMPLES_PER_PERIOD - done).min(BLOCK_FRAMES);
            self.chip.generate(&mut self.buffer, block);
            for frame in self.buffer[..block * 2].chunks_exact(2) {
                let s = frame[0];
                self.history.add(s as f64);
                if track_range {
                    self.sound_min = self.sound_min.min(s);
                    self.sound_max = self.sound_max.max(s);
                }
            }
            done += block;
        }
    }

    fn rms(&mut self) -> f64 {
        let size = self.history.size();
        if self.window.len() != size {
            self.window.resize(size, 0.0);
            hann_window(&mut self.window);
        }
        measure_rms(self.history.data(), &self.window)
    }

    fn is_silent(&self) -> bool {
        self.sound_min >= -SILENCE_EPSILON && self.sound_max <= SILENCE_EPSILON
    }
}

/// Measures the envelope of `def` on `chip`, which is reset first.
pub fn measure<C: OplChip + ?Sized>(chip: &mut C, def: &InstrumentDefinition) -> EnvelopeResult {
    let programmer = Programmer::new(def);
    let mut session = Session::new(chip);
    programmer.start(&mut *session.chip);

    let mut begin_amplitude = 0.0;
    let mut peak_value = 0.0;
    let mut peak_time = 0;
    let mut quarter_time = None;
    let mut highest = 0.0f64;

    let mut periods_on = 0;
    while periods_on < MAX_PERIODS_ON {
        let period = periods_on;
        session.render_period(true);
        let rms = session.rms();

        if period == 0 {
            begin_amplitude = rms;
            peak_value = rms;
            peak_time = 0;
        } else if rms > peak_value {
            peak_value = rms;
            peak_time = period;
            quarter_time = None;
        } else if quarter_time.is_none() && rms <= peak_value * MIN_COEFFICIENT_ON {
            quarter_time = Some(period);
        }
        highest = highest.max(rms);

        if period > MIN_PERIODS && (rms < highest * MIN_COEFFICIENT_ON || session.is_silent()) {
            break;
        }
        periods_on += 1;
    }
    let quarter_time = quarter_time.unwrap_or(periods_on);

    if periods_on < MAX_PERIODS_ON {
        // replay up to the peak so the release starts from full volume
        programmer.start(&mut *session.chip);
        session.history.reset(history_capacity());
        let mut period = 0;
        while (period < peak_time || period == 0) && period < MAX_PERIODS_ON {
            session.render_period(false);
            period += 1;
        }
    }
    programmer.note_off(&mut *session.chip);

    let mut keyoff_time = None;
    for period in 0..MAX_PERIODS_OFF {
        session.render_period(true);
        let rms = session.rms();

        if keyoff_time.is_none() && rms <= peak_value * MIN_COEFFICIENT_OFF {
            keyoff_time = Some(period);
        }
        if rms < highest * MIN_COEFFICIENT_OFF {
            break;
        }
        if period > MIN_PERIODS && session.is_silent() {
            break;
        }
    }
    let keyoff_time = keyoff_time.unwrap_or(0);

    let to_ms = |periods: usize| (periods as f64 * 1000.0 / PERIODS_PER_SECOND as f64) as i64;
    let result = EnvelopeResult {
        peak_amplitude_time: peak_time,
        peak_amplitude_value: peak_value,
        begin_amplitude,
        quarter_amplitude_time: quarter_time,
        keyoff_out_time: keyoff_time,
        ms_sound_kon: to_ms(quarter_time),
        ms_sound_koff: to_ms(keyoff_time),
        nosound: peak_value < 0.5 || session.is_silent(),
        sound_min: session.sound_min,
        sound_max: session.sound_max,
    };
    debug!(
        "{} envelope: peak {:.1} at {}, on {} ms, off {} ms{}",
        def.mode_name(),
        result.peak_amplitude_value,
        result.peak_amplitude_time,
        result.ms_sound_kon,
        result.ms_sound_koff,
        if result.nosound { ", silent" } else { "" }
    );
    result
}

#[cfg(test)]
#[path = "./analyzer_test.rs"]
mod analyzer_test;
