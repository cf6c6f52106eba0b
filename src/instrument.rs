//! Normalized instrument view fed to the programmer and the analyzer.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::analyzer::SILENCE_EPSILON;
use crate::chip::dbopl;
use crate::programmer::FrequencyWord;

/// Raw register image of one operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorRegs {
    /// AM, VIB, EG-type, KSR, MULT
    pub reg_20: u8,
    /// KSL, TL
    pub reg_40: u8,
    /// AR, DR
    pub reg_60: u8,
    /// SL, RR
    pub reg_80: u8,
    /// waveform select
    pub reg_e0: u8,
}

impl OperatorRegs {
    /// Unpacks the `E0<<24 | 80<<16 | 60<<8 | 20` word used by the indexed
    /// operator table.
    pub fn from_packed(d_e862: u32, d_40: u8) -> OperatorRegs {
        OperatorRegs {
            reg_20: d_e862 as u8,
            reg_60: (d_e862 >> 8) as u8,
            reg_80: (d_e862 >> 16) as u8,
            reg_e0: (d_e862 >> 24) as u8,
            reg_40: d_40,
        }
    }

    pub fn packed(&self) -> u32 {
        u32::from_le_bytes([self.reg_20, self.reg_60, self.reg_80, self.reg_e0])
    }

    pub fn attack_rate(&self) -> u8 {
        self.reg_60 >> 4
    }

    /// An operator whose attack rate is zero never leaves maximum attenuation.
    pub fn is_mute(&self) -> bool {
        self.attack_rate() == 0
    }

    /// Lowest and highest sample of the operator heard on its own when
    /// played at `word`. Total level and key scaling are taken into account.
    pub fn output_range(&self, word: FrequencyWord) -> (i32, i32) {
        if self.is_mute() {
            return (0, 0);
        }
        dbopl::operator_range(self.reg_40, self.reg_e0, word.block(), word.fnum())
    }
}

/// One 2-op voice: modulator, carrier and the channel's C0 byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Voice {
    pub modulator: OperatorRegs,
    pub carrier: OperatorRegs,
    pub fb_conn: u8,
    pub note_offset: i16,
}

impl Voice {
    /// Decodes an 11 byte legacy patch:
    /// `20m 20c 60m 60c 80m 80c E0m E0c 40m 40c C0`.
    pub fn from_patch(data: &[u8; 11], note_offset: i16) -> Voice {
        Voice {
            modulator: OperatorRegs {
                reg_20: data[0],
                reg_60: data[2],
                reg_80: data[4],
                reg_e0: data[6],
                reg_40: data[8],
            },
            carrier: OperatorRegs {
                reg_20: data[1],
                reg_60: data[3],
                reg_80: data[5],
                reg_e0: data[7],
                reg_40: data[9],
            },
            fb_conn: data[10],
            note_offset,
        }
    }

    pub fn is_am(&self) -> bool {
        (self.fb_conn & 0x01) != 0
    }

    /// Operators of a standalone 2-op voice reaching the output: FM only
    /// hears the carrier, AM hears both.
    fn heard(&self) -> Vec<&OperatorRegs> {
        if self.is_am() {
            vec![&self.modulator, &self.carrier]
        } else {
            vec![&self.carrier]
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InstrumentFlags: u8 {
        const FOUR_OP = 0x01;
        const PSEUDO_4OP = 0x02;
        const IS_BLANK = 0x04;
        const RHYTHM_MASK = 0x38;
    }
}

/// Which database an instrument was taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Representation {
    Legacy,
    Indexed,
}

impl Representation {
    /// The note played when an instrument has no percussion key.
    pub fn default_note(self) -> i32 {
        match self {
            Representation::Legacy => 25,
            Representation::Indexed => 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentDefinition {
    pub voices: [Voice; 2],
    pub voice_count: usize,
    pub second_voice_detune: f64,
    pub percussion_key: u8,
    pub flags: InstrumentFlags,
    pub representation: Representation,
}

impl InstrumentDefinition {
    pub fn is_real_4op(&self) -> bool {
        self.flags.contains(InstrumentFlags::FOUR_OP) && !self.is_pseudo_4op()
    }

    pub fn is_pseudo_4op(&self) -> bool {
        self.flags.contains(InstrumentFlags::PSEUDO_4OP)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices[..self.voice_count.min(2)]
    }

    /// Voices that get their own key-on: a real 4-op pair is keyed once.
    pub fn active_voices(&self) -> usize {
        if self.is_real_4op() {
            1
        } else {
            self.voice_count.min(2)
        }
    }

    pub fn played_note(&self) -> i32 {
        let key = self.percussion_key as i32;
        let key = if key >= 128 { key - 128 } else { key };
        if key == 0 {
            self.representation.default_note()
        } else {
            key
        }
    }

    /// Frequency of every keyed voice; unused slots stay zero.
    pub fn frequency_words(&self) -> [FrequencyWord; 2] {
        let note = self.played_note();
        let mut words = [FrequencyWord::default(); 2];
        for (word, voice) in words.iter_mut().zip(self.voices()).take(self.active_voices()) {
            *word = FrequencyWord::for_tone(note + voice.note_offset as i32);
        }
        words
    }

    pub fn mode_name(&self) -> &'static str {
        if self.is_pseudo_4op() {
            "pseudo4op"
        } else if self.is_real_4op() {
            "4op"
        } else {
            "2op"
        }
    }

    /// Predicts from the registers alone whether the instrument can make any
    /// sound. The extremes of every operator reaching the output are summed,
    /// and the instrument counts as silent when they stay within the same
    /// epsilon the analyzer uses.
    pub fn predicts_silence(&self) -> bool {
        let words = self.frequency_words();
        let heard: Vec<(&OperatorRegs, FrequencyWord)> = if self.is_real_4op() {
            // the pair runs on the first voice's frequency
            let [first, second] = &self.voices;
            let ops = [
                &first.modulator,
                &first.carrier,
                &second.modulator,
                &second.carrier,
            ];
            let carriers: &[usize] = match (first.is_am(), second.is_am()) {
                (false, false) => &[3],
                (true, false) => &[0, 3],
                (false, true) => &[1, 3],
                (true, true) => &[0, 2, 3],
            };
            carriers.iter().map(|&ix| (ops[ix], words[0])).collect()
        } else {
            self.voices()
                .iter()
                .zip(words)
                .flat_map(|(voice, word)| voice.heard().into_iter().map(move |op| (op, word)))
                .collect()
        };
        let (lo, hi) = heard
            .into_iter()
            .map(|(op, word)| op.output_range(word))
            .fold((0, 0), |(lo, hi), (l, h)| (lo + l, hi + h));
        let epsilon = SILENCE_EPSILON as i32;
        lo >= -epsilon && hi <= epsilon
    }
}

#[cfg(test)]
#[path = "./instrument_test.rs"]
mod instrument_test;
