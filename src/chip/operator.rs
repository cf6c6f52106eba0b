use super::tables::{
    env_silent, RateTables, Tables, ENV_BITS, ENV_EXTRA, ENV_MAX, ENV_MIN, KSL_SHIFT_TABLE, MUL_SH,
    RATE_MASK, RATE_SH, SHIFT_KEYCODE, SHIFT_KSLBASE, WAVE_BASE_TABLE, WAVE_MASK_TABLE,
    WAVE_SH, WAVE_START_TABLE,
};

const MASK_KSR: u8 = 0x10;
const MASK_SUSTAIN: u8 = 0x20;
const MASK_VIBRATO: u8 = 0x40;

#[repr(u8)]
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(super) enum EnvelopeState {
    Off,
    Release,
    Sustain,
    Decay,
    Attack,
}

impl EnvelopeState {
    fn bit(self) -> u8 {
        1 << self as u8
    }
}

type VolumeHandler = fn(op: &mut Operator) -> i32;

static VOLUME_HANDLER_TABLE: [VolumeHandler; 5] = [
    volume_off,
    volume_release,
    volume_sustain,
    volume_decay,
    volume_attack,
];

/// Chip wide values an operator register write depends on.
pub(super) struct ChipValues {
    pub wave_form_mask: u8,
    pub opl3_active: u8,
}

/// LFO state sampled once per generated block.
#[derive(Clone, Copy, Default)]
pub(super) struct LfoValues {
    pub tremolo_value: u8,
    pub vibrato_shift: u8,
    pub vibrato_sign: i8,
}

pub(super) struct Operator {
    vol_handler: VolumeHandler,

    wave_base: usize,
    wave_mask: u32,
    wave_start: u32,
    wave_index: u32,
    wave_add: u32,
    wave_current: u32,

    pub(super) chan_data: u32,
    freq_mul: u32,
    vibrato: u32,
    sustain_level: i32,
    total_level: i32,
    current_level: u32,
    volume: i32,

    attack_add: u32,
    decay_add: u32,
    release_add: u32,
    rate_index: u32,

    rate_zero: u8,
    key_on: u8,
    //registers, also used to check for changes
    reg_20: u8,
    reg_40: u8,
    reg_60: u8,
    reg_80: u8,
    reg_e0: u8,
    state: EnvelopeState,
    tremolo_mask: u8,
    vib_strength: u8,
    ksr: u8,
}

impl Operator {
    pub(super) fn new() -> Operator {
        Operator {
            vol_handler: volume_off,
            wave_base: 0,
            wave_mask: 0,
            wave_start: 0,
            wave_index: 0,
            wave_add: 0,
            wave_current: 0,
            chan_data: 0,
            freq_mul: 0,
            vibrato: 0,
            sustain_level: ENV_MAX,
            total_level: ENV_MAX,
            current_level: ENV_MAX as u32,
            volume: ENV_MAX,
            attack_add: 0,
            decay_add: 0,
            release_add: 0,
            rate_index: 0,
            rate_zero: EnvelopeState::Off.bit(),
            key_on: 0,
            reg_20: 0,
            reg_40: 0,
            reg_60: 0,
            reg_80: 0,
            reg_e0: 0,
            state: EnvelopeState::Off,
            tremolo_mask: 0,
            vib_strength: 0,
            ksr: 0,
        }
    }

    pub(super) fn key_on(&mut self, mask: u8) {
        if self.key_on == 0 {
            //restart the frequency generator
            self.wave_index = self.wave_start;
            self.rate_index = 0;
            self.set_state(EnvelopeState::Attack);
        }
        self.key_on |= mask;
    }

    pub(super) fn key_off(&mut self, mask: u8) {
        self.key_on &= !mask;
        if self.key_on == 0 && self.state != EnvelopeState::Off {
            self.set_state(EnvelopeState::Release);
        }
    }

    fn set_state(&mut self, s: EnvelopeState) {
        self.state = s;
        self.vol_handler = VOLUME_HANDLER_TABLE[s as usize];
    }

    /// True when the envelope is below audibility and cannot rise on its own.
    pub(super) fn silent(&self) -> bool {
        env_silent(self.total_level + self.volume) && (self.rate_zero & self.state.bit()) != 0
    }

    pub(super) fn prepare(&mut self, lfo: &LfoValues) {
        self.current_level =
            (self.total_level + (lfo.tremolo_value & self.tremolo_mask) as i32) as u32;
        self.wave_current = self.wave_add;
        if (self.vib_strength as u32 >> lfo.vibrato_shift) != 0 {
            let neg = lfo.vibrato_sign as i32;
            let add = (self.vibrato >> lfo.vibrato_shift) as i32;
            //sign flip without a branch
            self.wave_current = self.wave_current.wrapping_add(((add ^ neg) - neg) as u32);
        }
    }

    pub(super) fn forward_volume(&mut self) -> u32 {
        let handler = self.vol_handler;
        self.current_level.wrapping_add(handler(self) as u32)
    }

    pub(super) fn forward_wave(&mut self) -> u32 {
        self.wave_index = self.wave_index.wrapping_add(self.wave_current);
        self.wave_index >> WAVE_SH
    }

    pub(super) fn get_wave(&self, tables: &Tables, index: u32, vol: u32) -> i32 {
        let sample = tables.wave_table[self.wave_base + (index & self.wave_mask) as usize] as i32;
        let mul = tables.mul_table[(vol >> ENV_EXTRA as u32) as usize] as i32;
        (sample * mul) >> MUL_SH
    }

    pub(super) fn get_sample(&mut self, tables: &Tables, modulation: i32) -> i32 {
        let vol = self.forward_volume();
        if env_silent(vol as i32) {
            //simply forward the wave
            self.wave_index = self.wave_index.wrapping_add(self.wave_current);
            0
        } else {
            let index = self.forward_wave().wrapping_add(modulation as u32);
            self.get_wave(tables, index, vol)
        }
    }

    fn rate_forward(&mut self, add: u32) -> i32 {
        self.rate_index = self.rate_index.wrapping_add(add);
        let ret = (self.rate_index >> RATE_SH) as i32;
        self.rate_index &= RATE_MASK;
        ret
    }

    pub(super) fn update_frequency(&mut self) {
        let freq = self.chan_data & ((1 << 10) - 1);
        let block = (self.chan_data >> 10) & 0xff;
        self.wave_add = (freq << block).wrapping_mul(self.freq_mul);
        if (self.reg_20 & MASK_VIBRATO) != 0 {
            self.vib_strength = (freq >> 7) as u8;
            self.vibrato = ((self.vib_strength as u32) << block).wrapping_mul(self.freq_mul);
        } else {
            self.vib_strength = 0;
            self.vibrato = 0;
        }
    }

    pub(super) fn update_attenuation(&mut self) {
        let ksl_base = ((self.chan_data >> SHIFT_KSLBASE) & 0xff) as i32;
        self.total_level = total_level(self.reg_40, ksl_base);
    }

    pub(super) fn update_rates(&mut self, rates: &RateTables) {
        let mut new_ksr = ((self.chan_data >> SHIFT_KEYCODE) & 0xff) as u8;
        if (self.reg_20 & MASK_KSR) == 0 {
            new_ksr >>= 2;
        }
        if self.ksr == new_ksr {
            return;
        }
        self.ksr = new_ksr;
        self.update_attack(rates);
        self.update_decay(rates);
        self.update_release(rates);
    }

    fn update_attack(&mut self, rates: &RateTables) {
        let rate = self.reg_60 >> 4;
        if rate != 0 {
            self.attack_add = rates.attack_rates[((rate << 2) + self.ksr) as usize];
            self.rate_zero &= !EnvelopeState::Attack.bit();
        } else {
            self.attack_add = 0;
            self.rate_zero |= EnvelopeState::Attack.bit();
        }
    }

    fn update_decay(&mut self, rates: &RateTables) {
        let rate = self.reg_60 & 0x0f;
        if rate != 0 {
            self.decay_add = rates.linear_rates[((rate << 2) + self.ksr) as usize];
            self.rate_zero &= !EnvelopeState::Decay.bit();
        } else {
            self.decay_add = 0;
            self.rate_zero |= EnvelopeState::Decay.bit();
        }
    }

    fn update_release(&mut self, rates: &RateTables) {
        let rate = self.reg_80 & 0x0f;
        if rate != 0 {
            self.release_add = rates.linear_rates[((rate << 2) + self.ksr) as usize];
            self.rate_zero &= !EnvelopeState::Release.bit();
            if (self.reg_20 & MASK_SUSTAIN) == 0 {
                self.rate_zero &= !EnvelopeState::Sustain.bit();
            }
        } else {
            self.release_add = 0;
            self.rate_zero |= EnvelopeState::Release.bit();
            if (self.reg_20 & MASK_SUSTAIN) == 0 {
                self.rate_zero |= EnvelopeState::Sustain.bit();
            }
        }
    }
}

// Register writes

pub(super) fn operator_write_20(op: &mut Operator, rates: &RateTables, _: &ChipValues, val: u8) {
    let change = op.reg_20 ^ val;
    if change == 0 {
        return;
    }
    op.reg_20 = val;
    //shift the tremolo bit over the entire register
    op.tremolo_mask = ((val as i8) >> 7) as u8;
    op.tremolo_mask &= !(((1 << ENV_EXTRA) - 1) as u8);
    if (change & MASK_KSR) != 0 {
        op.update_rates(rates);
    }
    //with sustain enable the volume doesn't change
    if (op.reg_20 & MASK_SUSTAIN) != 0 || op.release_add == 0 {
        op.rate_zero |= EnvelopeState::Sustain.bit();
    } else {
        op.rate_zero &= !EnvelopeState::Sustain.bit();
    }
    //frequency multiplier or vibrato changed
    if (change & (0x0f | MASK_VIBRATO)) != 0 {
        op.freq_mul = rates.freq_mul[(val & 0x0f) as usize];
        op.update_frequency();
    }
}

/// Attenuation set by the TL and KSL fields of `reg_40` for a channel whose
/// frequency selected `ksl_base`.
pub(super) fn total_level(reg_40: u8, ksl_base: i32) -> i32 {
    let tl = (reg_40 & 0x3f) as i32;
    let ksl_shift = KSL_SHIFT_TABLE[(reg_40 >> 6) as usize];
    //total level goes 2 bits below max
    (tl << (ENV_BITS - 7)) + ((ksl_base << ENV_EXTRA) >> ksl_shift)
}

pub(super) fn operator_write_40(op: &mut Operator, _: &RateTables, _: &ChipValues, val: u8) {
    if (op.reg_40 ^ val) == 0 {
        return;
    }
    op.reg_40 = val;
    op.update_attenuation();
}

pub(super) fn operator_write_60(op: &mut Operator, rates: &RateTables, _: &ChipValues, val: u8) {
    let change = op.reg_60 ^ val;
    op.reg_60 = val;
    if (change & 0x0f) != 0 {
        op.update_decay(rates);
    }
    if (change & 0xf0) != 0 {
        op.update_attack(rates);
    }
}

pub(super) fn operator_write_80(op: &mut Operator, rates: &RateTables, _: &ChipValues, val: u8) {
    let change = op.reg_80 ^ val;
    if change == 0 {
        return;
    }
    op.reg_80 = val;
    let mut sustain = val >> 4;
    //turn 0xf into 0x1f
    sustain |= (sustain + 1) & 0x10;
    op.sustain_level = (sustain as i32) << (ENV_BITS - 5);
    if (change & 0x0f) != 0 {
        op.update_release(rates);
    }
}

pub(super) fn operator_write_e0(op: &mut Operator, _: &RateTables, chip: &ChipValues, val: u8) {
    if (op.reg_e0 ^ val) == 0 {
        return;
    }
    //in opl3 mode you can always select 7 waveforms regardless of waveformselect
    let wave_form = (val & ((0x03 & chip.wave_form_mask) | (0x07 & chip.opl3_active))) as usize;
    op.reg_e0 = val;
    op.wave_base = WAVE_BASE_TABLE[wave_form];
    op.wave_start = (WAVE_START_TABLE[wave_form] as u32) << WAVE_SH;
    op.wave_mask = WAVE_MASK_TABLE[wave_form] as u32;
}

// Volume handlers, one per envelope state

fn volume_off(op: &mut Operator) -> i32 {
    envelope_step(op, EnvelopeState::Off)
}

fn volume_release(op: &mut Operator) -> i32 {
    envelope_step(op, EnvelopeState::Release)
}

fn volume_sustain(op: &mut Operator) -> i32 {
    envelope_step(op, EnvelopeState::Sustain)
}

fn volume_decay(op: &mut Operator) -> i32 {
    envelope_step(op, EnvelopeState::Decay)
}

fn volume_attack(op: &mut Operator) -> i32 {
    envelope_step(op, EnvelopeState::Attack)
}

fn envelope_step(op: &mut Operator, state: EnvelopeState) -> i32 {
    let mut vol = op.volume;
    match state {
        EnvelopeState::Off => return ENV_MAX,
        EnvelopeState::Attack => {
            let change = op.rate_forward(op.attack_add);
            if change == 0 {
                return vol;
            }
            vol += (!vol * change) >> 3;
            if vol < ENV_MIN {
                op.volume = ENV_MIN;
                op.rate_index = 0;
                op.set_state(EnvelopeState::Decay);
                return ENV_MIN;
            }
        }
        EnvelopeState::Decay => {
            vol += op.rate_forward(op.decay_add);
            if vol >= op.sustain_level {
                //check if we didn't overshoot max attenuation, then just go off
                if vol >= ENV_MAX {
                    op.volume = ENV_MAX;
                    op.set_state(EnvelopeState::Off);
                    return ENV_MAX;
                }
                //continue as sustain
                op.rate_index = 0;
                op.set_state(EnvelopeState::Sustain);
            }
        }
        EnvelopeState::Sustain | EnvelopeState::Release => {
            if state == EnvelopeState::Sustain && (op.reg_20 & MASK_SUSTAIN) != 0 {
                return vol;
            }
            //in sustain phase, but not sustaining, do regular release
            vol += op.rate_forward(op.release_add);
            if vol >= ENV_MAX {
                op.volume = ENV_MAX;
                op.set_state(EnvelopeState::Off);
                return ENV_MAX;
            }
        }
    }
    op.volume = vol;
    vol
}
