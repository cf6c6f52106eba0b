//! Chip doubles for unit tests.

use crate::chip::OplChip;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    SetRate(u32),
    Write(u16, u8),
    Generate(usize),
}

/// Records every call and renders silence.
#[derive(Default)]
pub struct RecordingChip {
    pub calls: Vec<Call>,
}

impl RecordingChip {
    pub fn writes(&self) -> Vec<(u16, u8)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Write(reg, val) => Some((*reg, *val)),
                _ => None,
            })
            .collect()
    }

    pub fn generated_frames(&self) -> usize {
        self.calls
            .iter()
            .map(|c| match c {
                Call::Generate(frames) => *frames,
                _ => 0,
            })
            .sum()
    }
}

impl OplChip for RecordingChip {
    fn set_rate(&mut self, rate: u32) {
        self.calls.push(Call::SetRate(rate));
    }

    fn write_reg(&mut self, reg: u16, val: u8) {
        self.calls.push(Call::Write(reg, val));
    }

    fn generate(&mut self, output: &mut [i16], frames: usize) {
        self.calls.push(Call::Generate(frames));
        output[..frames * 2].fill(0);
    }
}

/// Plays a full scale square wave on the left side while channel 0 is
/// keyed on.
#[derive(Default)]
pub struct SquareChip {
    pub amplitude: i16,
    keyed: bool,
    phase: usize,
}

impl SquareChip {
    pub fn new(amplitude: i16) -> SquareChip {
        SquareChip {
            amplitude,
            ..SquareChip::default()
        }
    }
}

impl OplChip for SquareChip {
    fn set_rate(&mut self, _rate: u32) {
        self.keyed = false;
        self.phase = 0;
    }

    fn write_reg(&mut self, reg: u16, val: u8) {
        if reg == 0xB0 {
            self.keyed = (val & 0x20) != 0;
        }
    }

    fn generate(&mut self, output: &mut [i16], frames: usize) {
        for frame in output[..frames * 2].chunks_exact_mut(2) {
            let sample = match (self.keyed, (self.phase / 50) % 2) {
                (false, _) => 0,
                (true, 0) => self.amplitude,
                (true, _) => -self.amplitude,
            };
            self.phase += 1;
            frame[0] = sample;
            frame[1] = 0;
        }
    }
}

/// Square wave on the left side whose level ramps up over `rise` frames
/// after key-on, falls back to zero over `fall` frames and, once keyed off,
/// fades from wherever it was over `release` frames. Frames are counted in
/// segments that start at every reset and every key-off.
#[derive(Default)]
pub struct RampChip {
    pub amplitude: f64,
    pub rise: usize,
    pub fall: usize,
    pub release: usize,
    pub segments: Vec<usize>,
    keyed: bool,
    since_on: usize,
    since_off: usize,
    released_from: f64,
}

impl RampChip {
    pub fn new(amplitude: f64, rise: usize, fall: usize, release: usize) -> RampChip {
        RampChip {
            amplitude,
            rise,
            fall,
            release,
            ..RampChip::default()
        }
    }

    fn keyed_level(&self) -> f64 {
        if self.since_on < self.rise {
            self.amplitude * self.since_on as f64 / self.rise as f64
        } else {
            let fallen = (self.since_on - self.rise) as f64 / self.fall as f64;
            self.amplitude * (1.0 - fallen).max(0.0)
        }
    }

    fn level(&self) -> f64 {
        if self.keyed {
            self.keyed_level()
        } else {
            let faded = self.since_off as f64 / self.release as f64;
            self.released_from * (1.0 - faded).max(0.0)
        }
    }
}

impl OplChip for RampChip {
    fn set_rate(&mut self, _rate: u32) {
        self.keyed = false;
        self.since_on = 0;
        self.since_off = 0;
        self.released_from = 0.0;
        self.segments.push(0);
    }

    fn write_reg(&mut self, reg: u16, val: u8) {
        if reg != 0xB0 {
            return;
        }
        let key_on = (val & 0x20) != 0;
        if key_on && !self.keyed {
            self.since_on = 0;
        } else if !key_on && self.keyed {
            self.released_from = self.keyed_level();
            self.since_off = 0;
            self.segments.push(0);
        }
        self.keyed = key_on;
    }

    fn generate(&mut self, output: &mut [i16], frames: usize) {
        for frame in output[..frames * 2].chunks_exact_mut(2) {
            let level = self.level() as i16;
            let phase = if self.keyed { self.since_on } else { self.since_off };
            frame[0] = if (phase / 50) % 2 == 0 { level } else { -level };
            frame[1] = 0;
            if self.keyed {
                self.since_on += 1;
            } else {
                self.since_off += 1;
            }
        }
        if let Some(last) = self.segments.last_mut() {
            *last += frames;
        }
    }
}
