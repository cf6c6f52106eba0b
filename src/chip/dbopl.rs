//! OPL2/OPL3 emulator in the DOSBox dbopl lineage.

use std::sync::Arc;

use core::array::from_fn;

use super::channel::{handler_for, BlockContext, Channel, Noise, SynthMode};
use super::operator::{
    total_level, operator_write_20, operator_write_40, operator_write_60, operator_write_80, operator_write_e0,
    ChipValues, LfoValues, Operator,
};
use super::tables::{
    env_silent, rate_tables, tables, RateTables, Tables, ENV_EXTRA, LFO_MAX, MUL_SH, NUM_CHANNELS,
    SHIFT_KEYCODE, SHIFT_KSLBASE, TREMOLO_TABLE_SIZE, VIBRATO_TABLE, WAVE_BASE_TABLE,
    WAVE_MASK_TABLE,
};
use super::OplChip;

const MIX_BLOCK: usize = 512;

//bit 6 marks the rhythm channels, bit 7 the silent half of a four op pair
static FOUR_MASK_TABLE: [u8; NUM_CHANNELS] = [
    0x01, 0x81, 0x02, 0x82, 0x04, 0x84, 0x40, 0x40, 0x40, 0x08, 0x88, 0x10, 0x90, 0x20, 0xa0, 0,
    0, 0,
];

type OperatorWrite = fn(op: &mut Operator, rates: &RateTables, chip: &ChipValues, val: u8);

pub struct Chip {
    channels: [Channel; NUM_CHANNELS],

    //this is used as the base counter for vibrato and tremolo
    lfo_counter: u32,
    lfo_add: u32,
    noise: Noise,

    reg_104: u8,
    reg_08: u8,
    reg_bd: u8,
    vibrato_index: u8,
    tremolo_index: u8,
    vibrato_sign: i8,
    vibrato_shift: u8,
    tremolo_value: u8,
    vibrato_strength: u8,
    tremolo_strength: u8,

    wave_form_mask: u8,
    //0 or 0xff
    opl3_active: u8,

    tables: &'static Tables,
    rates: Arc<RateTables>,
    mix_buffer: Vec<i32>,
}

impl Chip {
    /// A chip in its power-on state generating at `rate` Hz.
    pub fn new(rate: u32) -> Chip {
        let rates = rate_tables(rate);
        let mut chip = Chip {
            channels: from_fn(|i| {
                let mut chan = Channel::new();
                chan.four_mask = FOUR_MASK_TABLE[i];
                chan
            }),
            lfo_counter: 0,
            lfo_add: rates.lfo_add,
            noise: Noise::new(rates.noise_add),
            reg_104: 0,
            reg_08: 0,
            reg_bd: 0,
            vibrato_index: 0,
            tremolo_index: 0,
            vibrato_sign: 0,
            vibrato_shift: 0,
            tremolo_value: 0,
            vibrato_strength: 0,
            tremolo_strength: 0,
            wave_form_mask: 0,
            opl3_active: 0,
            tables: tables(),
            rates,
            mix_buffer: vec![0; MIX_BLOCK * 2],
        };
        chip.clear_registers();
        chip
    }

    fn clear_registers(&mut self) {
        //clear everything in opl3 mode
        self.write_reg(0x105, 0x1);
        for reg in 0..512 {
            if reg == 0x105 {
                continue;
            }
            self.write_reg(reg, 0xff);
            self.write_reg(reg, 0x0);
        }
        self.write_reg(0x105, 0x0);
        //clear everything in opl2 mode
        for reg in 0..255 {
            self.write_reg(reg, 0xff);
            self.write_reg(reg, 0x0);
        }
    }

    pub fn opl3_active(&self) -> bool {
        self.opl3_active != 0
    }

    pub fn write_reg(&mut self, reg: u32, val: u8) {
        match reg & 0xf0 {
            0x00 => match reg {
                0x01 => self.wave_form_mask = if (val & 0x20) != 0 { 0x7 } else { 0x0 },
                0x08 => self.reg_08 = val,
                0x104 => self.write_104(val),
                0x105 => self.write_105(val),
                _ => {}
            },
            0x10 | 0xd0 => {}
            0x20 | 0x30 => self.regop_write(reg, val, operator_write_20),
            0x40 | 0x50 => self.regop_write(reg, val, operator_write_40),
            0x60 | 0x70 => self.regop_write(reg, val, operator_write_60),
            0x80 | 0x90 => self.regop_write(reg, val, operator_write_80),
            0xa0 => {
                if let Some(ix) = self.chan_index(reg) {
                    self.channel_write_a0(ix, val);
                }
            }
            0xb0 => {
                if reg == 0xbd {
                    self.write_bd(val);
                } else if let Some(ix) = self.chan_index(reg) {
                    self.channel_write_b0(ix, val);
                }
            }
            0xc0 => {
                if let Some(ix) = self.chan_index(reg) {
                    self.channel_write_c0(ix, val);
                }
            }
            _ => self.regop_write(reg, val, operator_write_e0),
        }
    }

    fn write_104(&mut self, val: u8) {
        //only detect changes in lowest 6 bits
        if ((self.reg_104 ^ val) & 0x3f) == 0 {
            return;
        }
        //always keep the highest bit enabled, for checking > 0x80
        self.reg_104 = 0x80 | (val & 0x3f);
        self.update_synths();
    }

    fn write_105(&mut self, val: u8) {
        //mode changed, all synth handlers need to be re-selected
        if ((self.opl3_active ^ val) & 1) == 0 {
            return;
        }
        self.opl3_active = if (val & 1) != 0 { 0xff } else { 0 };
        self.update_synths();
    }

    fn write_bd(&mut self, val: u8) {
        let change = self.reg_bd ^ val;
        if change == 0 {
            return;
        }
        self.reg_bd = val;

        self.vibrato_strength = if (val & 0x40) != 0 { 0x00 } else { 0x01 };
        self.tremolo_strength = if (val & 0x80) != 0 { 0x00 } else { 0x02 };

        if (val & 0x20) != 0 {
            //drum was just enabled, make sure channel 6 has the right synth
            if (change & 0x20) != 0 {
                let mode = if self.opl3_active != 0 {
                    SynthMode::Sm3Percussion
                } else {
                    SynthMode::Sm2Percussion
                };
                self.channels[6].synth_handler = handler_for(mode);
            }
            // bass drum, hi-hat, snare, tom-tom, top cymbal
            let keys = [
                (6, 0, 0x10),
                (6, 1, 0x10),
                (7, 0, 0x01),
                (7, 1, 0x08),
                (8, 0, 0x04),
                (8, 1, 0x02),
            ];
            for (chan, op, bit) in keys {
                let op = &mut self.channels[chan].ops[op];
                if (val & bit) != 0 {
                    op.key_on(0x2);
                } else {
                    op.key_off(0x2);
                }
            }
        } else if (change & 0x20) != 0 {
            //reset the original synth handler and clear the drum keyon bits
            self.update_synth(6);
            for chan in &mut self.channels[6..9] {
                chan.ops[0].key_off(0x2);
                chan.ops[1].key_off(0x2);
            }
        }
    }

    fn regop_write(&mut self, reg: u32, val: u8, write: OperatorWrite) {
        let ix = (((reg >> 3) & 0x20) | (reg & 0x1f)) as usize;
        if let Some(offset) = self.tables.op_offset_table[ix] {
            let chip = ChipValues {
                wave_form_mask: self.wave_form_mask,
                opl3_active: self.opl3_active,
            };
            let op = &mut self.channels[offset.chan].ops[offset.op];
            write(op, &self.rates, &chip, val);
        }
    }

    fn chan_index(&self, reg: u32) -> Option<usize> {
        let ix = (((reg >> 4) & 0x10) | (reg & 0xf)) as usize;
        self.tables.chan_offset_table[ix]
    }

    fn four_op(&self, ix: usize) -> u8 {
        self.reg_104 & self.opl3_active & self.channels[ix].four_mask
    }

    fn channel_write_a0(&mut self, ix: usize, val: u8) {
        let four_op = self.four_op(ix);
        //don't handle writes to silent fourop channels
        if four_op > 0x80 {
            return;
        }
        let change = (self.channels[ix].chan_data ^ val as u32) & 0xff;
        if change != 0 {
            self.channels[ix].chan_data ^= change;
            self.channel_update_frequency(ix, four_op);
        }
    }

    fn channel_write_b0(&mut self, ix: usize, val: u8) {
        let four_op = self.four_op(ix);
        //don't handle writes to silent fourop channels
        if four_op > 0x80 {
            return;
        }
        let change = (self.channels[ix].chan_data ^ ((val as u32) << 8)) & 0x1f00;
        if change != 0 {
            self.channels[ix].chan_data ^= change;
            self.channel_update_frequency(ix, four_op);
        }
        //check for a change in the keyon/off state
        if ((val ^ self.channels[ix].reg_b0) & 0x20) == 0 {
            return;
        }
        self.channels[ix].reg_b0 = val;
        let pair = if (four_op & 0x3f) != 0 { ix..ix + 2 } else { ix..ix + 1 };
        for chan in &mut self.channels[pair] {
            for op in chan.ops.iter_mut() {
                if (val & 0x20) != 0 {
                    op.key_on(0x1);
                } else {
                    op.key_off(0x1);
                }
            }
        }
    }

    fn channel_write_c0(&mut self, ix: usize, val: u8) {
        let chan = &mut self.channels[ix];
        if (val ^ chan.reg_c0) == 0 {
            return;
        }
        chan.reg_c0 = val;
        chan.set_feedback(val);
        self.update_synth(ix);
    }

    fn channel_update_frequency(&mut self, ix: usize, four_op: u8) {
        //extract the frequency bits
        let mut data = self.channels[ix].chan_data & 0xffff;
        let ksl_base = self.tables.ksl_table[(data >> 6) as usize] as u32;
        let mut key_code = (data & 0x1c00) >> 9;
        if (self.reg_08 & 0x40) != 0 {
            //notesel == 1
            key_code |= (data & 0x100) >> 8;
        } else {
            //notesel == 0
            key_code |= (data & 0x200) >> 9;
        }
        //add the keycode and ksl into the highest bits of chan_data
        data |= (key_code << SHIFT_KEYCODE) | (ksl_base << SHIFT_KSLBASE);
        self.channels[ix].set_chan_data(&self.rates, data);
        if (four_op & 0x3f) != 0 {
            self.channels[ix + 1].set_chan_data(&self.rates, data);
        }
    }

    fn update_synths(&mut self) {
        for ix in 0..NUM_CHANNELS {
            self.update_synth(ix);
        }
    }

    fn update_synth(&mut self, ix: usize) {
        let four_mask = self.channels[ix].four_mask;
        let rhythm = (four_mask & 0x40) != 0 && (self.reg_bd & 0x20) != 0;
        if self.opl3_active != 0 {
            if (self.reg_104 & four_mask & 0x3f) != 0 {
                let first = if (four_mask & 0x80) == 0 { ix } else { ix - 1 };
                let synth = (self.channels[first].reg_c0 & 1)
                    | ((self.channels[first + 1].reg_c0 & 1) << 1);
                let mode = match synth {
                    0 => SynthMode::Sm3FmFm,
                    1 => SynthMode::Sm3AmFm,
                    2 => SynthMode::Sm3FmAm,
                    _ => SynthMode::Sm3AmAm,
                };
                self.channels[first].synth_handler = handler_for(mode);
            } else if !rhythm {
                let mode = if (self.channels[ix].reg_c0 & 1) != 0 {
                    SynthMode::Sm3Am
                } else {
                    SynthMode::Sm3Fm
                };
                self.channels[ix].synth_handler = handler_for(mode);
            }
            let chan = &mut self.channels[ix];
            chan.mask_left = if (chan.reg_c0 & 0x10) != 0 { -1 } else { 0 };
            chan.mask_right = if (chan.reg_c0 & 0x20) != 0 { -1 } else { 0 };
        } else if !rhythm {
            let mode = if (self.channels[ix].reg_c0 & 1) != 0 {
                SynthMode::Sm2Am
            } else {
                SynthMode::Sm2Fm
            };
            self.channels[ix].synth_handler = handler_for(mode);
        }
    }

    fn forward_lfo(&mut self, samples: u32) -> u32 {
        //current vibrato value, runs 4x slower than tremolo
        let vibrato = VIBRATO_TABLE[(self.vibrato_index >> 2) as usize];
        self.vibrato_sign = vibrato >> 7;
        self.vibrato_shift = (vibrato & 7) as u8 + self.vibrato_strength;
        self.tremolo_value =
            self.tables.tremolo_table[self.tremolo_index as usize] >> self.tremolo_strength;

        //check how many samples there can be done before the value changes
        let todo = LFO_MAX - self.lfo_counter;
        let mut count = todo.div_ceil(self.lfo_add);
        if count > samples {
            count = samples;
            self.lfo_counter += count * self.lfo_add;
        } else {
            self.lfo_counter += count * self.lfo_add;
            self.lfo_counter &= LFO_MAX - 1;
            //maximum of 7 vibrato value * 4
            self.vibrato_index = (self.vibrato_index + 1) & 31;
            //clip tremolo to the the table size
            if ((self.tremolo_index + 1) as usize) < TREMOLO_TABLE_SIZE {
                self.tremolo_index += 1;
            } else {
                self.tremolo_index = 0;
            }
        }
        count
    }

    fn lfo_values(&self) -> LfoValues {
        LfoValues {
            tremolo_value: self.tremolo_value,
            vibrato_shift: self.vibrato_shift,
            vibrato_sign: self.vibrato_sign,
        }
    }

    /// Mixes `total` mono frames of the 9 OPL2 channels into `output`.
    fn generate_block_2(&mut self, total: usize, output: &mut [i32]) {
        output[..total].fill(0);
        self.run_channels(total, output, 9, 1);
    }

    /// Mixes `total` interleaved stereo frames of all 18 channels into `output`.
    fn generate_block_3(&mut self, total: usize, output: &mut [i32]) {
        output[..total * 2].fill(0);
        self.run_channels(total, output, NUM_CHANNELS, 2);
    }

    fn run_channels(&mut self, total: usize, output: &mut [i32], count: usize, width: usize) {
        let tables = self.tables;
        let mut offset = 0;
        let mut left = total;
        while left > 0 {
            let samples = self.forward_lfo(left as u32) as usize;
            let lfo = self.lfo_values();
            let mut ch = 0;
            while ch < count {
                let handler = self.channels[ch].synth_handler;
                let mut ctx = BlockContext {
                    tables,
                    lfo,
                    noise: &mut self.noise,
                };
                let out = &mut output[offset * width..];
                ch += handler(&mut self.channels[ch..], &mut ctx, samples, out);
            }
            left -= samples;
            offset += samples;
        }
    }
}

/// Lowest and highest sample a single operator puts out at the top of its
/// envelope, played at `block`/`fnum` in OPL3 mode with tremolo off.
pub fn operator_range(reg_40: u8, reg_e0: u8, block: u8, fnum: u16) -> (i32, i32) {
    let tables = tables();
    let ksl_index = ((block as usize & 0x07) << 4) | ((fnum as usize >> 6) & 0x0f);
    let level = total_level(reg_40, tables.ksl_table[ksl_index] as i32);
    if env_silent(level) {
        return (0, 0);
    }
    let mul = tables.mul_table[(level >> ENV_EXTRA) as usize] as i32;
    let wave = (reg_e0 & 0x07) as usize;
    let base = WAVE_BASE_TABLE[wave];
    let mask = WAVE_MASK_TABLE[wave] as usize;
    (0..1024)
        .map(|i| (tables.wave_table[base + (i & mask)] as i32 * mul) >> MUL_SH)
        .fold((0, 0), |(lo, hi), s| (lo.min(s), hi.max(s)))
}

impl OplChip for Chip {
    fn set_rate(&mut self, rate: u32) {
        *self = Chip::new(rate);
    }

    fn write_reg(&mut self, reg: u16, val: u8) {
        Chip::write_reg(self, reg as u32, val);
    }

    fn generate(&mut self, output: &mut [i16], frames: usize) {
        let mut mix = std::mem::take(&mut self.mix_buffer);
        let mut done = 0;
        while done < frames {
            let block = (frames - done).min(MIX_BLOCK);
            let out = &mut output[done * 2..(done + block) * 2];
            if self.opl3_active != 0 {
                self.generate_block_3(block, &mut mix);
                for (dst, src) in out.iter_mut().zip(&mix[..block * 2]) {
                    *dst = clip(*src);
                }
            } else {
                self.generate_block_2(block, &mut mix);
                //opl2 renders mono, duplicate it on both sides
                for (frame, src) in out.chunks_exact_mut(2).zip(&mix[..block]) {
                    let sample = clip(*src);
                    frame[0] = sample;
                    frame[1] = sample;
                }
            }
            done += block;
        }
        self.mix_buffer = mix;
    }
}

fn clip(sample: i32) -> i16 {
    sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
#[path = "./dbopl_test.rs"]
mod dbopl_test;
