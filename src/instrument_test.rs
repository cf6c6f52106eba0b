use super::*;

fn op(reg_60: u8) -> OperatorRegs {
    OperatorRegs {
        reg_20: 0x01,
        reg_40: 0x00,
        reg_60,
        reg_80: 0x0f,
        reg_e0: 0x00,
    }
}

fn voice(modulator: u8, carrier: u8, fb_conn: u8) -> Voice {
    Voice {
        modulator: op(modulator),
        carrier: op(carrier),
        fb_conn,
        note_offset: 0,
    }
}

fn two_op(v: Voice) -> InstrumentDefinition {
    InstrumentDefinition {
        voices: [v, Voice::default()],
        voice_count: 1,
        second_voice_detune: 0.0,
        percussion_key: 0,
        flags: InstrumentFlags::empty(),
        representation: Representation::Indexed,
    }
}

fn four_op(first: Voice, second: Voice) -> InstrumentDefinition {
    InstrumentDefinition {
        voices: [first, second],
        voice_count: 2,
        flags: InstrumentFlags::FOUR_OP,
        ..two_op(first)
    }
}

#[test]
fn test_packed_operator_round_trip() {
    let regs = OperatorRegs::from_packed(0x0304_f221, 0x1a);
    assert_eq!(regs.reg_20, 0x21);
    assert_eq!(regs.reg_60, 0xf2);
    assert_eq!(regs.reg_80, 0x04);
    assert_eq!(regs.reg_e0, 0x03);
    assert_eq!(regs.reg_40, 0x1a);
    assert_eq!(regs.packed(), 0x0304_f221);
}

#[test]
fn test_patch_byte_order() {
    let data = [0x20, 0x21, 0x60, 0x61, 0x80, 0x81, 0x01, 0x02, 0x40, 0x41, 0x0e];
    let v = Voice::from_patch(&data, -3);
    assert_eq!(v.modulator.reg_20, 0x20);
    assert_eq!(v.carrier.reg_20, 0x21);
    assert_eq!(v.modulator.reg_60, 0x60);
    assert_eq!(v.carrier.reg_80, 0x81);
    assert_eq!(v.modulator.reg_e0, 0x01);
    assert_eq!(v.carrier.reg_40, 0x41);
    assert_eq!(v.fb_conn, 0x0e);
    assert_eq!(v.note_offset, -3);
}

#[test]
fn test_played_note_defaults() {
    let mut def = two_op(voice(0xf0, 0xf0, 0));
    assert_eq!(def.played_note(), 60);
    def.representation = Representation::Legacy;
    assert_eq!(def.played_note(), 25);
    def.percussion_key = 35;
    assert_eq!(def.played_note(), 35);
    def.percussion_key = 128 + 40;
    assert_eq!(def.played_note(), 40);
    // 128 wraps to 0, which is the default again
    def.percussion_key = 128;
    assert_eq!(def.played_note(), 25);
}

#[test]
fn test_active_voices() {
    let mut def = four_op(voice(0xf0, 0xf0, 0), voice(0xf0, 0xf0, 0));
    assert!(def.is_real_4op());
    assert_eq!(def.active_voices(), 1);

    def.flags = InstrumentFlags::FOUR_OP | InstrumentFlags::PSEUDO_4OP;
    assert!(!def.is_real_4op());
    assert!(def.is_pseudo_4op());
    assert_eq!(def.active_voices(), 2);
    assert_eq!(def.mode_name(), "pseudo4op");
}

#[test]
fn test_two_op_silence_prediction() {
    // FM: only the carrier matters
    assert!(two_op(voice(0xf0, 0x00, 0x00)).predicts_silence());
    assert!(!two_op(voice(0x00, 0xf0, 0x00)).predicts_silence());
    // AM: both operators are heard
    assert!(!two_op(voice(0xf0, 0x00, 0x01)).predicts_silence());
    assert!(two_op(voice(0x00, 0x00, 0x01)).predicts_silence());
}

#[test]
fn test_pseudo_four_op_needs_both_voices_silent() {
    let mut def = four_op(voice(0xf0, 0x00, 0), voice(0xf0, 0xf0, 0));
    def.flags = InstrumentFlags::PSEUDO_4OP;
    assert!(!def.predicts_silence());
    def.voices[1].carrier.reg_60 = 0x00;
    assert!(def.predicts_silence());
}

#[test]
fn test_four_op_carriers_by_connection() {
    // FM-FM: the last operator is the only carrier
    assert!(four_op(voice(0xf0, 0xf0, 0), voice(0xf0, 0x00, 0)).predicts_silence());
    assert!(!four_op(voice(0x00, 0x00, 0), voice(0x00, 0xf0, 0)).predicts_silence());
    // AM-FM: first modulator is heard directly
    assert!(!four_op(voice(0xf0, 0x00, 1), voice(0x00, 0x00, 0)).predicts_silence());
    // FM-AM: first carrier is heard directly
    assert!(!four_op(voice(0x00, 0xf0, 0), voice(0x00, 0x00, 1)).predicts_silence());
    assert!(four_op(voice(0xf0, 0x00, 0), voice(0xf0, 0x00, 1)).predicts_silence());
    // AM-AM: second modulator is heard too
    assert!(!four_op(voice(0x00, 0x00, 1), voice(0xf0, 0x00, 1)).predicts_silence());
}

#[test]
fn test_key_scaled_carrier_silent_at_high_keys() {
    // TL 63 with full key scaling drops below the output at high notes
    let mut def = two_op(voice(0xf0, 0xf0, 0));
    def.voices[0].carrier.reg_40 = 0xff;
    for key in [100, 110, 127] {
        def.percussion_key = key;
        assert!(def.predicts_silence(), "key {}", key);
    }
    def.percussion_key = 60;
    def.voices[0].carrier.reg_40 = 0x3f;
    assert!(!def.predicts_silence());
}

#[test]
fn test_attenuated_am_modulator_counts() {
    let mut def = two_op(voice(0xf0, 0x00, 0x01));
    def.percussion_key = 110;
    assert!(!def.predicts_silence());
    def.voices[0].modulator.reg_40 = 0xff;
    assert!(def.predicts_silence());
}

#[test]
fn test_frequency_words_follow_note_offsets() {
    let mut def = four_op(voice(0xf0, 0xf0, 0), voice(0xf0, 0xf0, 0));
    def.flags = InstrumentFlags::PSEUDO_4OP;
    def.voices[1].note_offset = 12;
    let [first, second] = def.frequency_words();
    assert_eq!(first, FrequencyWord::for_tone(60));
    assert_eq!(second, FrequencyWord::for_tone(72));

    def.flags = InstrumentFlags::FOUR_OP;
    assert_eq!(def.frequency_words()[1], FrequencyWord::default());
}
