//! Translates an instrument definition into register writes.

use log::warn;

use crate::chip::OplChip;
use crate::instrument::{InstrumentDefinition, OperatorRegs};

/// Sample rate every measurement is rendered at.
pub const OUTPUT_RATE: u32 = 49716;

/// Register writes following the key-off sweep of a reset. The trailing
/// 0x105 write leaves the chip in OPL3 mode so 4-op pairs are available.
const INIT_SEQUENCE: [(u16, u8); 8] = [
    (0x004, 96),
    (0x004, 128),
    (0x105, 0),
    (0x105, 1),
    (0x105, 0),
    (0x001, 32),
    (0x0BD, 0),
    (0x105, 1),
];

/// Base addresses of the 18 melodic channels.
const CHANNEL_OFFSETS: [u16; 18] = [
    0x000, 0x001, 0x002, 0x003, 0x004, 0x005, 0x006, 0x007, 0x008,
    0x100, 0x101, 0x102, 0x103, 0x104, 0x105, 0x106, 0x107, 0x108,
];

/// Modulator operator offset of channels 0-8; the carrier sits 3 above.
const OPERATOR_OFFSETS: [u16; 9] = [0x00, 0x01, 0x02, 0x08, 0x09, 0x0A, 0x10, 0x11, 0x12];

/// Channels the first and second voice are played on. Channel 3 is the
/// 4-op partner of channel 0.
pub const VOICE_CHANNELS: [usize; 2] = [0, 3];

const MAX_HERTZ: f64 = 131071.0;

/// An `A0`/`B0` register pair: key-on bit, block and fnum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrequencyWord(pub u16);

impl FrequencyWord {
    /// Encodes `tone` (a MIDI style note number) with the key-on bit set.
    /// The block saturates at 7 so the key-on bit can not be carried away.
    pub fn for_tone(tone: i32) -> FrequencyWord {
        let mut hertz = 172.00093 * (0.057762265 * tone as f64).exp();
        if hertz > MAX_HERTZ {
            warn!("tone {} produces {:.1} Hz, clamping to {}", tone, hertz, MAX_HERTZ);
            hertz = MAX_HERTZ;
        }
        let mut word = 0x2000u16;
        let mut block = 0;
        while hertz >= 1023.5 && block < 7 {
            hertz /= 2.0;
            word += 0x400;
            block += 1;
        }
        word += (hertz.round() as u16).min(0x3FF);
        FrequencyWord(word)
    }

    pub fn a0(self) -> u8 {
        self.0 as u8
    }

    pub fn b0(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn b0_released(self) -> u8 {
        self.b0() & 0xDF
    }

    pub fn block(self) -> u8 {
        (self.b0() >> 2) & 0x07
    }

    pub fn fnum(self) -> u16 {
        self.0 & 0x3FF
    }
}

/// Puts the chip into a known state at [`OUTPUT_RATE`].
pub fn reset_chip<C: OplChip + ?Sized>(chip: &mut C) {
    chip.set_rate(OUTPUT_RATE);
    for offset in CHANNEL_OFFSETS {
        chip.write_reg(0xB0 + offset, 0x00);
    }
    for (reg, val) in INIT_SEQUENCE {
        chip.write_reg(reg, val);
    }
}

fn write_operator<C: OplChip + ?Sized>(chip: &mut C, offset: u16, regs: &OperatorRegs) {
    // tremolo and vibrato would only blur the envelope
    chip.write_reg(0x20 + offset, regs.reg_20 & 0x3F);
    chip.write_reg(0x60 + offset, regs.reg_60);
    chip.write_reg(0x80 + offset, regs.reg_80);
    chip.write_reg(0xE0 + offset, regs.reg_e0);
}

/// Plays one instrument on a reset chip.
pub struct Programmer<'a> {
    def: &'a InstrumentDefinition,
    words: [FrequencyWord; 2],
}

impl<'a> Programmer<'a> {
    pub fn new(def: &'a InstrumentDefinition) -> Programmer<'a> {
        Programmer {
            def,
            words: def.frequency_words(),
        }
    }

    pub fn words(&self) -> &[FrequencyWord] {
        &self.words[..self.def.active_voices()]
    }

    pub fn program<C: OplChip + ?Sized>(&self, chip: &mut C) {
        chip.write_reg(0x104, if self.def.is_real_4op() { 0x3F } else { 0x00 });
        for (voice, &ch) in self.def.voices().iter().zip(&VOICE_CHANNELS) {
            let modulator = OPERATOR_OFFSETS[ch];
            let carrier = modulator + 3;
            write_operator(chip, modulator, &voice.modulator);
            write_operator(chip, carrier, &voice.carrier);
            chip.write_reg(0xC0 + CHANNEL_OFFSETS[ch], voice.fb_conn | 0x30);
            chip.write_reg(0x40 + modulator, voice.modulator.reg_40);
            chip.write_reg(0x40 + carrier, voice.carrier.reg_40);
        }
    }

    pub fn note_on<C: OplChip + ?Sized>(&self, chip: &mut C) {
        for (word, &ch) in self.words().iter().zip(&VOICE_CHANNELS) {
            chip.write_reg(0xA0 + CHANNEL_OFFSETS[ch], word.a0());
            chip.write_reg(0xB0 + CHANNEL_OFFSETS[ch], word.b0());
        }
    }

    pub fn note_off<C: OplChip + ?Sized>(&self, chip: &mut C) {
        for (word, &ch) in self.words().iter().zip(&VOICE_CHANNELS) {
            chip.write_reg(0xB0 + CHANNEL_OFFSETS[ch], word.b0_released());
        }
    }

    /// Reset, program and key-on in one go.
    pub fn start<C: OplChip + ?Sized>(&self, chip: &mut C) {
        reset_chip(chip);
        self.program(chip);
        self.note_on(chip);
    }
}

#[cfg(test)]
#[path = "./programmer_test.rs"]
mod programmer_test;
