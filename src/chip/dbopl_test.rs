use super::{operator_range, Chip};
use crate::chip::tables::tables;
use crate::chip::OplChip;

const RATE: u32 = 49716;

fn render(chip: &mut Chip, frames: usize) -> Vec<i16> {
    let mut out = vec![0; frames * 2];
    OplChip::generate(chip, &mut out, frames);
    out
}

fn peak(samples: &[i16]) -> i32 {
    samples.iter().map(|s| (*s as i32).abs()).max().unwrap_or(0)
}

// plain sine carrier on channel 0, modulator fully attenuated
fn program_sine(chip: &mut Chip, release: u8) {
    chip.write_reg(0x20, 0x21);
    chip.write_reg(0x23, 0x21);
    chip.write_reg(0x40, 0x3f);
    chip.write_reg(0x43, 0x00);
    chip.write_reg(0x60, 0xf0);
    chip.write_reg(0x63, 0xf0);
    chip.write_reg(0x80, release);
    chip.write_reg(0x83, release);
    chip.write_reg(0xc0, 0x30);
    chip.write_reg(0xa0, 0x98);
}

#[test]
fn test_offset_tables() {
    let t = tables();
    assert_eq!(t.chan_offset_table[0], Some(0));
    assert_eq!(t.chan_offset_table[1], Some(2));
    assert_eq!(t.chan_offset_table[3], Some(1));
    assert_eq!(t.chan_offset_table[6], Some(6));
    assert_eq!(t.chan_offset_table[9], None);
    assert_eq!(t.chan_offset_table[16], Some(9));
    assert_eq!(t.chan_offset_table[24], Some(17));

    // 0x20 is the modulator of channel 0, 0x23 its carrier
    let op = t.op_offset_table[0].unwrap();
    assert_eq!((op.chan, op.op), (0, 0));
    let op = t.op_offset_table[3].unwrap();
    assert_eq!((op.chan, op.op), (0, 1));
    // 0x28 is the modulator of register channel 3, the second half of pair 0
    let op = t.op_offset_table[8].unwrap();
    assert_eq!((op.chan, op.op), (1, 0));
    assert!(t.op_offset_table[6].is_none());
    assert!(t.op_offset_table[0x18].is_none());
}

#[test]
fn test_silent_without_key_on() {
    let mut chip = Chip::new(RATE);
    program_sine(&mut chip, 0x0f);
    let out = render(&mut chip, 2048);
    assert_eq!(peak(&out), 0);
}

#[test]
fn test_keyed_carrier_sounds() {
    let mut chip = Chip::new(RATE);
    program_sine(&mut chip, 0x0f);
    chip.write_reg(0xb0, 0x31);
    let out = render(&mut chip, 4096);
    assert!(peak(&out) > 1000, "peak {}", peak(&out));
}

#[test]
fn test_opl2_output_is_mono_on_both_sides() {
    let mut chip = Chip::new(RATE);
    program_sine(&mut chip, 0x0f);
    chip.write_reg(0xb0, 0x31);
    let out = render(&mut chip, 1024);
    assert!(!chip.opl3_active());
    for frame in out.chunks_exact(2) {
        assert_eq!(frame[0], frame[1]);
    }
}

#[test]
fn test_opl3_panning() {
    let mut chip = Chip::new(RATE);
    chip.write_reg(0x105, 0x01);
    program_sine(&mut chip, 0x0f);
    // left only
    chip.write_reg(0xc0, 0x10);
    chip.write_reg(0xb0, 0x31);
    let out = render(&mut chip, 2048);
    assert!(chip.opl3_active());
    let left: Vec<i16> = out.iter().step_by(2).copied().collect();
    let right: Vec<i16> = out.iter().skip(1).step_by(2).copied().collect();
    assert!(peak(&left) > 1000);
    assert_eq!(peak(&right), 0);
}

#[test]
fn test_release_decays_to_silence() {
    let mut chip = Chip::new(RATE);
    program_sine(&mut chip, 0x0f);
    chip.write_reg(0xb0, 0x31);
    render(&mut chip, 2048);
    chip.write_reg(0xb0, 0x11);
    // fastest release drains the envelope within a few milliseconds
    render(&mut chip, 4096);
    let tail = render(&mut chip, 1024);
    assert_eq!(peak(&tail), 0);
}

#[test]
fn test_zero_attack_never_sounds() {
    let mut chip = Chip::new(RATE);
    program_sine(&mut chip, 0x0f);
    chip.write_reg(0x63, 0x00);
    chip.write_reg(0xb0, 0x31);
    let out = render(&mut chip, 4096);
    assert_eq!(peak(&out), 0);
}

#[test]
fn test_four_op_pair_keys_both_channels() {
    let mut chip = Chip::new(RATE);
    chip.write_reg(0x105, 0x01);
    chip.write_reg(0x104, 0x01);
    // FM-FM chain: only the last operator (carrier of channel 3) is audible
    for reg in [0x20, 0x23, 0x28, 0x2b] {
        chip.write_reg(reg, 0x21);
    }
    for reg in [0x40, 0x43, 0x48] {
        chip.write_reg(reg, 0x3f);
    }
    chip.write_reg(0x4b, 0x00);
    for reg in [0x60, 0x63, 0x68, 0x6b] {
        chip.write_reg(reg, 0xf0);
    }
    chip.write_reg(0xc0, 0x30);
    chip.write_reg(0xc3, 0x30);
    chip.write_reg(0xa0, 0x98);
    chip.write_reg(0xb0, 0x31);
    let out = render(&mut chip, 2048);
    assert!(peak(&out) > 1000, "peak {}", peak(&out));
}

#[test]
fn test_set_rate_resets_state() {
    let mut chip = Chip::new(RATE);
    program_sine(&mut chip, 0x0f);
    chip.write_reg(0xb0, 0x31);
    render(&mut chip, 512);
    OplChip::set_rate(&mut chip, RATE);
    let out = render(&mut chip, 1024);
    assert_eq!(peak(&out), 0);
}

#[test]
fn test_deterministic() {
    let run = || {
        let mut chip = Chip::new(RATE);
        program_sine(&mut chip, 0x04);
        chip.write_reg(0xb0, 0x31);
        render(&mut chip, 3000)
    };
    assert_eq!(run(), run());
}

#[test]
fn test_operator_range() {
    let (lo, hi) = operator_range(0x00, 0x00, 4, 0x200);
    assert!(hi > 4000 && lo < -4000, "{} {}", lo, hi);
    // half sine only dips into the silence gap
    let (lo, hi) = operator_range(0x00, 0x01, 4, 0x200);
    assert!(hi > 4000 && lo > -10, "{} {}", lo, hi);
    // TL 63 alone leaves a faint signal
    let (lo, hi) = operator_range(0x3f, 0x00, 4, 0x200);
    assert!(hi > 1 && hi < 32 && lo < -1, "{} {}", lo, hi);
    // key scaling on top pushes it past the limit
    assert_eq!(operator_range(0xff, 0x00, 7, 0x3ff), (0, 0));
}

// single sounding operator at `op_reg`, fastest attack and release
fn program_drum_op(chip: &mut Chip, op_reg: u32) {
    chip.write_reg(0x20 + op_reg, 0x01);
    chip.write_reg(0x40 + op_reg, 0x00);
    chip.write_reg(0x60 + op_reg, 0xf0);
    chip.write_reg(0x80 + op_reg, 0x0f);
    chip.write_reg(0xe0 + op_reg, 0x00);
}

fn program_bass_drum(chip: &mut Chip) {
    program_drum_op(chip, 0x13);
    chip.write_reg(0x50, 0x3f);
    chip.write_reg(0xc6, 0x30);
    chip.write_reg(0xa6, 0x98);
    // block 4 without the key-on bit
    chip.write_reg(0xb6, 0x11);
}

#[test]
fn test_rhythm_bass_drum() {
    let mut chip = Chip::new(RATE);
    program_bass_drum(&mut chip);
    chip.write_reg(0xbd, 0x20);
    assert_eq!(peak(&render(&mut chip, 1024)), 0);

    chip.write_reg(0xbd, 0x30);
    assert!(peak(&render(&mut chip, 2048)) > 1000);

    // leaving rhythm mode releases the drum keys
    chip.write_reg(0xbd, 0x00);
    render(&mut chip, 4096);
    assert_eq!(peak(&render(&mut chip, 1024)), 0);
}

#[test]
fn test_rhythm_needs_rhythm_mode() {
    let mut chip = Chip::new(RATE);
    program_bass_drum(&mut chip);
    // key bits alone do nothing
    chip.write_reg(0xbd, 0x10);
    assert_eq!(peak(&render(&mut chip, 2048)), 0);
}

#[test]
fn test_rhythm_hi_hat_is_deterministic() {
    let play = || {
        let mut chip = Chip::new(RATE);
        chip.write_reg(0x105, 0x01);
        program_drum_op(&mut chip, 0x11);
        chip.write_reg(0xa7, 0x40);
        chip.write_reg(0xb7, 0x09);
        chip.write_reg(0xa8, 0x60);
        chip.write_reg(0xb8, 0x0a);
        chip.write_reg(0xbd, 0x21);
        render(&mut chip, 4096)
    };
    let first = play();
    assert!(peak(&first) > 0);
    assert_eq!(first, play());
    // percussion is centred in OPL3 mode
    assert!(first.chunks_exact(2).all(|f| f[0] == f[1]));
}
