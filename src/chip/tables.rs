use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, OnceLock};

use core::array::from_fn;
use parking_lot::Mutex;

pub(super) const OPL_RATE: f64 = 14318180.0 / 288.0;

pub(super) const TREMOLO_TABLE_SIZE: usize = 52;

pub(super) const NUM_CHANNELS: usize = 18;

const WAVE_BITS: u32 = 10;
pub(super) const WAVE_SH: u32 = 32 - WAVE_BITS;
pub(super) const WAVE_MASK: u32 = (1 << WAVE_SH) - 1;

pub(super) const LFO_SH: u32 = WAVE_SH - 10;
pub(super) const LFO_MAX: u32 = 256 << LFO_SH;

pub(super) const ENV_BITS: i32 = 9;
pub(super) const ENV_MIN: i32 = 0;
pub(super) const ENV_EXTRA: i32 = ENV_BITS - 9;
pub(super) const ENV_MAX: i32 = 511 << ENV_EXTRA;
pub(super) const ENV_LIMIT: i32 = (12 * 256) >> (3 - ENV_EXTRA);

pub(super) const RATE_SH: u32 = 24;
pub(super) const RATE_MASK: u32 = (1 << RATE_SH) - 1;

pub(super) const MUL_SH: u32 = 16;

pub(super) const SHIFT_KSLBASE: u32 = 16;
pub(super) const SHIFT_KEYCODE: u32 = 24;

//how much to substract from the base value for the final attenuation
static KSL_CREATE_TABLE: [u8; 16] = [
    //0 will always be be lower than 7 * 8
    64, 32, 24, 19, 16, 12, 11, 10, 8, 6, 5, 4, 3, 2, 1, 0,
];

static FREQ_CREATE_TABLE: [u8; 16] = [1, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 20, 24, 24, 30, 30];
static ATTACK_SAMPLES_TABLE: [u8; 13] = [69, 55, 46, 40, 35, 29, 23, 20, 19, 15, 11, 10, 9];
static ENVELOPE_INCREASE_TABLE: [u8; 13] = [4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 32];

//distance into WaveTable the wave starts
pub(super) static WAVE_BASE_TABLE: [usize; 8] = [0x000, 0x200, 0x200, 0x800, 0xa00, 0xc00, 0x100, 0x400];

//mask the counter with this
pub(super) static WAVE_MASK_TABLE: [u16; 8] = [1023, 1023, 511, 511, 1023, 1023, 512, 1023];

//where to start the counter on at keyon
pub(super) static WAVE_START_TABLE: [u16; 8] = [512, 0, 0, 0, 0, 512, 512, 256];

//The lower bits are the shift of the operator vibrato value
//The highest bit is right shifted to generate -1 or 0 for negation
//So taking the highest input value of 7 this gives 3, 7, 3, 0, -3, -7, -3, 0
pub(super) static VIBRATO_TABLE: [i8; 8] = [1, 0, 1, 30, -127, -128, -127, -98];

pub(super) static KSL_SHIFT_TABLE: [u8; 4] = [31, 1, 2, 0];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct OpOffset {
    pub chan: usize,
    pub op: usize,
}

/// Rate independent lookup tables, shared by every chip instance.
pub(super) struct Tables {
    // register channel index -> linear channel index
    pub chan_offset_table: [Option<usize>; 32],
    // register operator index -> linear channel and operator
    pub op_offset_table: [Option<OpOffset>; 64],
    pub tremolo_table: [u8; TREMOLO_TABLE_SIZE],

    //Layout of the waveform table in 512 entry intervals
    //With overlapping waves we reduce the table to half it's size
    //
    //	|    |//\\|____|WAV7|//__|/\  |____|/\/\|
    //	|\\//|    |    |WAV7|    |  \/|    |    |
    //	|06  |0126|17  |7   |3   |4   |4 5 |5   |
    //
    //6 is just 0 shifted and masked
    pub wave_table: [i16; 8 * 512],
    pub mul_table: [u16; 384],
    pub ksl_table: [u8; 8 * 16],
}

/// Tables that depend on the output sample rate.
pub(super) struct RateTables {
    //frequency scales for the different multiplications
    pub freq_mul: [u32; 16],
    //rates for decay and release for rate of this chip
    pub linear_rates: [u32; 76],
    //best match attack rates for the rate of this chip
    pub attack_rates: [u32; 76],
    pub lfo_add: u32,
    pub noise_add: u32,
}

static TABLES: OnceLock<Tables> = OnceLock::new();
static RATE_TABLES: OnceLock<Mutex<HashMap<u32, Arc<RateTables>>>> = OnceLock::new();

pub(super) fn tables() -> &'static Tables {
    TABLES.get_or_init(init_tables)
}

/// The attack rate search is expensive, so tables are built once per rate
/// and shared between chips.
pub(super) fn rate_tables(rate: u32) -> Arc<RateTables> {
    let memo = RATE_TABLES.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(found) = memo.lock().get(&rate) {
        return Arc::clone(found);
    }
    let built = Arc::new(init_rate_tables(OPL_RATE / rate as f64));
    Arc::clone(memo.lock().entry(rate).or_insert(built))
}

fn init_tables() -> Tables {
    //multiplication based tables
    let mut mul_table = [0; 384];
    for (i, mul) in mul_table.iter_mut().enumerate() {
        let s = i as f64 * 8.0;
        *mul = (0.5 + (2.0f64).powf(-1.0 + (255.0 - s) * (1.0 / 256.0)) * (1 << MUL_SH) as f64)
            as u16;
    }

    let mut wave_table = [0; 8 * 512];
    //sine Wave Base
    for i in 0..512 {
        wave_table[0x0200 + i] = (((i as f64 + 0.5) * (PI / 512.0)).sin() * 4084.0) as i16;
        wave_table[i] = -wave_table[0x0200 + i];
    }
    //exponential wave
    for i in 0..256 {
        wave_table[0x0700 + i] = (0.5
            + ((2.0f64).powf(-1.0 + (255.0 - i as f64 * 8.0) * (1.0 / 256.0))) * 4085.0)
            as i16;
        wave_table[0x6ff - i] = -wave_table[0x0700 + i];
    }
    for i in 0..256 {
        //fill silence gaps
        wave_table[0x400 + i] = wave_table[0];
        wave_table[0x500 + i] = wave_table[0];
        wave_table[0x900 + i] = wave_table[0];
        wave_table[0xc00 + i] = wave_table[0];
        wave_table[0xd00 + i] = wave_table[0];
        //replicate sines in other pieces
        wave_table[0x800 + i] = wave_table[0x200 + i];
        //double speed sines
        wave_table[0xa00 + i] = wave_table[0x200 + i * 2];
        wave_table[0xb00 + i] = wave_table[i * 2];
        wave_table[0xe00 + i] = wave_table[0x200 + i * 2];
        wave_table[0xf00 + i] = wave_table[0x200 + i * 2];
    }

    //create the ksl table
    let mut ksl_table = [0; 8 * 16];
    for oct in 0..8 {
        let base = oct * 8;
        for i in 0..16 {
            let val = (base as i32 - KSL_CREATE_TABLE[i] as i32).max(0);
            //*4 for the final range to match attenuation range
            ksl_table[oct * 16 + i] = (val * 4) as u8;
        }
    }

    let chan_offset_table = from_fn(|i| {
        let mut index = i & 0xf;
        if index >= 9 {
            return None;
        }
        //make sure the four op channels follow eachother
        if index < 6 {
            index = (index % 3) * 2 + (index / 3);
        }
        //add back the bits for highest ones
        if i >= 16 {
            index += 9;
        }
        Some(index)
    });

    let op_offset_table = from_fn(|i| {
        if i % 8 >= 6 || ((i / 8) % 4 == 3) {
            return None;
        }
        let mut ch_num = (i / 8) * 3 + (i % 8) % 3;
        //use 16 and up for the 2nd range to match the chan offset gap
        if ch_num >= 12 {
            ch_num += 16 - 12;
        }
        let chan = chan_offset_table[ch_num]?;
        Some(OpOffset {
            chan,
            op: (i % 8) / 3,
        })
    });

    // create the Tremolo table, just increase and decrease a triangle wave
    let mut tremolo_table = [0; TREMOLO_TABLE_SIZE];
    for i in 0..(TREMOLO_TABLE_SIZE / 2) {
        let val = (i << ENV_EXTRA) as u8;
        tremolo_table[i] = val;
        tremolo_table[TREMOLO_TABLE_SIZE - 1 - i] = val;
    }

    Tables {
        chan_offset_table,
        op_offset_table,
        tremolo_table,
        wave_table,
        mul_table,
        ksl_table,
    }
}

fn init_rate_tables(scale: f64) -> RateTables {
    let freq_scale = (0.5 + scale * (1 << (WAVE_SH - 1 - 10)) as f64) as u32;
    let freq_mul = from_fn(|i| freq_scale * FREQ_CREATE_TABLE[i] as u32);

    //-3 since the real envelope takes 8 steps to reach the single value we supply
    let linear_rates = from_fn(|i| {
        let (ix, shift_select) = envelope_select(i as u8);
        let shift = RATE_SH + ENV_EXTRA as u32 - shift_select as u32 - 3;
        (scale * ((ENVELOPE_INCREASE_TABLE[ix as usize] as u32) << shift) as f64) as u32
    });

    //generate the best matching attack rate
    let mut attack_rates = [0; 76];
    for i in 0..62u8 {
        let (ix, shift_select) = envelope_select(i);
        //original amount of samples the attack would take
        let original = ((((ATTACK_SAMPLES_TABLE[ix as usize] as u32) << shift_select) as f64
            / scale) as u32)
            .max(1);

        let mut guess_add = (scale
            * ((ENVELOPE_INCREASE_TABLE[ix as usize] as u32) << (RATE_SH - shift_select as u32 - 3))
                as f64) as u32;
        let mut best_add = guess_add;
        let mut best_diff = 1u32 << 30;

        for _ in 0..16 {
            let mut volume = ENV_MAX;
            let mut samples = 0u32;
            let mut count = 0u32;

            while volume > 0 && samples < original.wrapping_mul(2) {
                count = count.wrapping_add(guess_add);
                let change = (count >> RATE_SH) as i32;
                count &= RATE_MASK;
                if change != 0 {
                    volume += (!volume * change) >> 3;
                }
                samples += 1;
            }
            let diff = original.wrapping_sub(samples) as i32;
            let l_diff = diff.unsigned_abs();
            //init last on first pass
            if l_diff < best_diff {
                best_diff = l_diff;
                best_add = guess_add;
                if best_diff == 0 {
                    break;
                }
            }
            let mul = (original.wrapping_sub(diff as u32) << 12) / original;
            if diff < 0 {
                //below our target
                guess_add = (guess_add.wrapping_mul(mul) >> 12).wrapping_add(1);
            } else if diff > 0 {
                guess_add = (guess_add.wrapping_mul(mul) >> 12).wrapping_sub(1);
            }
        }
        attack_rates[i as usize] = best_add;
    }
    //this should provide instant volume maximizing
    for rate in attack_rates.iter_mut().skip(62) {
        *rate = 8 << RATE_SH;
    }

    let lfo_add = (0.5 + scale * (1 << LFO_SH) as f64) as u32;
    RateTables {
        freq_mul,
        linear_rates,
        attack_rates,
        lfo_add,
        //noise counter runs at the same precision as the general waves
        noise_add: lfo_add,
    }
}

fn envelope_select(val: u8) -> (u8, u8) {
    if val < 13 * 4 {
        // rate 0 - 12
        (val & 3, 12 - (val >> 2))
    } else if val < 15 * 4 {
        // rate 13 - 14
        (val - 12 * 4, 0)
    } else {
        (12, 0)
    }
}

pub(super) fn env_silent(x: i32) -> bool {
    x >= ENV_LIMIT
}
