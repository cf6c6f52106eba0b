use super::operator::{LfoValues, Operator};
use super::tables::{env_silent, RateTables, Tables, LFO_SH, SHIFT_KEYCODE, SHIFT_KSLBASE, WAVE_MASK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SynthMode {
    Sm2Am,
    Sm2Fm,
    Sm3Am,
    Sm3Fm,
    Sm3FmFm,
    Sm3AmFm,
    Sm3FmAm,
    Sm3AmAm,
    Sm2Percussion,
    Sm3Percussion,
}

impl SynthMode {
    /// Channels consumed by one handler call.
    fn span(self) -> usize {
        match self {
            SynthMode::Sm3FmFm | SynthMode::Sm3AmFm | SynthMode::Sm3FmAm | SynthMode::Sm3AmAm => 2,
            SynthMode::Sm2Percussion | SynthMode::Sm3Percussion => 3,
            _ => 1,
        }
    }
}

/// Per block state handed to every synth handler.
pub(super) struct BlockContext<'a> {
    pub tables: &'a Tables,
    pub lfo: LfoValues,
    pub noise: &'a mut Noise,
}

pub(super) struct Noise {
    counter: u32,
    add: u32,
    value: u32,
}

impl Noise {
    pub(super) fn new(add: u32) -> Noise {
        Noise {
            counter: 0,
            add,
            value: 1,
        }
    }

    fn forward(&mut self) -> u32 {
        self.counter = self.counter.wrapping_add(self.add);
        let count = self.counter >> LFO_SH;
        self.counter &= WAVE_MASK;
        for _ in 0..count {
            //the noise generator is a 23 bit lfsr
            self.value ^= 0x800302 & 0u32.wrapping_sub(self.value & 1);
            self.value >>= 1;
        }
        self.value
    }
}

pub(super) type SynthHandler = fn(
    chans: &mut [Channel],
    ctx: &mut BlockContext,
    samples: usize,
    output: &mut [i32],
) -> usize;

pub(super) struct Channel {
    pub(super) ops: [Operator; 2],
    pub(super) synth_handler: SynthHandler,
    //frequency/octave and derived values
    pub(super) chan_data: u32,
    //old data for feedback
    old: [i32; 2],

    feedback: u8,
    pub(super) reg_b0: u8,
    pub(super) reg_c0: u8,
    //this should correspond with reg104, bit 6 indicates a percussion channel, bit 7 indicates a silent channel
    pub(super) four_mask: u8,
    pub(super) mask_left: i32,
    pub(super) mask_right: i32,
}

impl Channel {
    pub(super) fn new() -> Channel {
        Channel {
            ops: [Operator::new(), Operator::new()],
            synth_handler: block_sm2fm,
            chan_data: 0,
            old: [0, 0],
            feedback: 31,
            reg_b0: 0,
            reg_c0: 0,
            four_mask: 0,
            mask_left: -1,
            mask_right: -1,
        }
    }

    pub(super) fn set_chan_data(&mut self, rates: &RateTables, data: u32) {
        let change = self.chan_data ^ data;
        self.chan_data = data;
        for op in self.ops.iter_mut() {
            op.chan_data = data;
            //a frequency update triggered this, always update frequency
            op.update_frequency();
            if (change & (0xff << SHIFT_KSLBASE)) != 0 {
                op.update_attenuation();
            }
            if (change & (0xff << SHIFT_KEYCODE)) != 0 {
                op.update_rates(rates);
            }
        }
    }

    pub(super) fn set_feedback(&mut self, val: u8) {
        self.feedback = (val >> 1) & 7;
        self.feedback = if self.feedback != 0 {
            9 - self.feedback
        } else {
            31
        };
    }

    fn silence(&mut self) {
        self.old = [0, 0];
    }

    fn feedback_modulation(&self) -> i32 {
        (self.old[0].wrapping_add(self.old[1]) as u32 >> self.feedback) as i32
    }
}

pub(super) fn handler_for(mode: SynthMode) -> SynthHandler {
    match mode {
        SynthMode::Sm2Am => block_sm2am,
        SynthMode::Sm2Fm => block_sm2fm,
        SynthMode::Sm3Am => block_sm3am,
        SynthMode::Sm3Fm => block_sm3fm,
        SynthMode::Sm3FmFm => block_sm3fmfm,
        SynthMode::Sm3AmFm => block_sm3amfm,
        SynthMode::Sm3FmAm => block_sm3fmam,
        SynthMode::Sm3AmAm => block_sm3amam,
        SynthMode::Sm2Percussion => block_sm2percussion,
        SynthMode::Sm3Percussion => block_sm3percussion,
    }
}

// Channel block templates

fn block_sm2am(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm2Am)
}

fn block_sm2fm(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm2Fm)
}

fn block_sm3am(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm3Am)
}

fn block_sm3fm(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm3Fm)
}

fn block_sm3fmfm(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm3FmFm)
}

fn block_sm3amfm(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm3AmFm)
}

fn block_sm3fmam(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm3FmAm)
}

fn block_sm3amam(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm3AmAm)
}

fn block_sm2percussion(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm2Percussion)
}

fn block_sm3percussion(c: &mut [Channel], x: &mut BlockContext, n: usize, o: &mut [i32]) -> usize {
    block_template(c, x, n, o, SynthMode::Sm3Percussion)
}

/// Operator `ix` counted across consecutive channels, two per channel.
fn op(chans: &mut [Channel], ix: usize) -> &mut Operator {
    &mut chans[ix >> 1].ops[ix & 1]
}

fn carriers_silent(chans: &[Channel], mode: SynthMode) -> bool {
    let silent = |ix: usize| chans[ix >> 1].ops[ix & 1].silent();
    match mode {
        SynthMode::Sm2Am | SynthMode::Sm3Am => silent(0) && silent(1),
        SynthMode::Sm2Fm | SynthMode::Sm3Fm => silent(1),
        SynthMode::Sm3FmFm => silent(3),
        SynthMode::Sm3AmFm => silent(0) && silent(3),
        SynthMode::Sm3FmAm => silent(1) && silent(3),
        SynthMode::Sm3AmAm => silent(0) && silent(2) && silent(3),
        SynthMode::Sm2Percussion | SynthMode::Sm3Percussion => false,
    }
}

fn block_template(
    chans: &mut [Channel],
    ctx: &mut BlockContext,
    samples: usize,
    output: &mut [i32],
    mode: SynthMode,
) -> usize {
    let span = mode.span();
    if carriers_silent(chans, mode) {
        chans[0].silence();
        return span;
    }

    //init the operators with the current vibrato and tremolo values
    let lfo = ctx.lfo;
    for ch in chans[..span].iter_mut() {
        ch.ops[0].prepare(&lfo);
        ch.ops[1].prepare(&lfo);
    }

    let tables = ctx.tables;
    for i in 0..samples {
        match mode {
            SynthMode::Sm2Percussion => {
                generate_percussion(chans, ctx, &mut output[i..=i], false);
                continue;
            }
            SynthMode::Sm3Percussion => {
                generate_percussion(chans, ctx, &mut output[i * 2..i * 2 + 2], true);
                continue;
            }
            _ => {}
        }

        //do unsigned shift so we can shift out all bits but still stay in 10 bit range otherwise
        let modulation = chans[0].feedback_modulation();
        chans[0].old[0] = chans[0].old[1];
        chans[0].old[1] = chans[0].ops[0].get_sample(tables, modulation);
        let out0 = chans[0].old[0];

        let sample = match mode {
            SynthMode::Sm2Am | SynthMode::Sm3Am => out0 + op(chans, 1).get_sample(tables, 0),
            SynthMode::Sm2Fm | SynthMode::Sm3Fm => op(chans, 1).get_sample(tables, out0),
            SynthMode::Sm3FmFm => {
                let next = op(chans, 1).get_sample(tables, out0);
                let next = op(chans, 2).get_sample(tables, next);
                op(chans, 3).get_sample(tables, next)
            }
            SynthMode::Sm3AmFm => {
                let next = op(chans, 1).get_sample(tables, 0);
                let next = op(chans, 2).get_sample(tables, next);
                out0 + op(chans, 3).get_sample(tables, next)
            }
            SynthMode::Sm3FmAm => {
                let first = op(chans, 1).get_sample(tables, out0);
                let next = op(chans, 2).get_sample(tables, 0);
                first + op(chans, 3).get_sample(tables, next)
            }
            SynthMode::Sm3AmAm => {
                let next = op(chans, 1).get_sample(tables, 0);
                let second = op(chans, 2).get_sample(tables, next);
                out0 + second + op(chans, 3).get_sample(tables, 0)
            }
            SynthMode::Sm2Percussion | SynthMode::Sm3Percussion => unreachable!(),
        };

        match mode {
            SynthMode::Sm2Am | SynthMode::Sm2Fm => output[i] += sample,
            _ => {
                output[i * 2] += sample & chans[0].mask_left;
                output[i * 2 + 1] += sample & chans[0].mask_right;
            }
        }
    }
    span
}

/// Rhythm mode: bass drum on the first channel, hi-hat and snare on the
/// second, tom and cymbal on the third.
fn generate_percussion(chans: &mut [Channel], ctx: &mut BlockContext, output: &mut [i32], opl3: bool) {
    let tables = ctx.tables;

    //bass drum
    let modulation = chans[0].feedback_modulation();
    chans[0].old[0] = chans[0].old[1];
    chans[0].old[1] = chans[0].ops[0].get_sample(tables, modulation);
    //when bassdrum is in AM mode first operator is ignored
    let modulation = if (chans[0].reg_c0 & 1) != 0 {
        0
    } else {
        chans[0].old[0]
    };
    let mut sample = chans[0].ops[1].get_sample(tables, modulation);

    //precalculate stuff used by other outputs
    let noise_bit = ctx.noise.forward() & 0x1;
    let c2 = op(chans, 2).forward_wave();
    let c5 = op(chans, 5).forward_wave();
    let phase_bit: u32 =
        if (((c2 & 0x88) ^ ((c2 << 5) & 0x80)) | ((c5 ^ (c5 << 2)) & 0x20)) != 0 {
            0x02
        } else {
            0x00
        };

    //hi-hat
    let hh_vol = op(chans, 2).forward_volume();
    if !env_silent(hh_vol as i32) {
        let hh_index = (phase_bit << 8) | (0x34 << (phase_bit ^ (noise_bit << 1)));
        sample += op(chans, 2).get_wave(tables, hh_index, hh_vol);
    }
    //snare drum
    let sd_vol = op(chans, 3).forward_volume();
    if !env_silent(sd_vol as i32) {
        let sd_index = (0x100 + (c2 & 0x100)) ^ (noise_bit << 8);
        sample += op(chans, 3).get_wave(tables, sd_index, sd_vol);
    }
    //tom-tom
    sample += op(chans, 4).get_sample(tables, 0);
    //top cymbal
    let tc_vol = op(chans, 5).forward_volume();
    if !env_silent(tc_vol as i32) {
        let tc_index = (1 + phase_bit) << 8;
        sample += op(chans, 5).get_wave(tables, tc_index, tc_vol);
    }

    sample <<= 1;
    output[0] += sample;
    if opl3 {
        output[1] += sample;
    }
}
