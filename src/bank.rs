//! Instrument databases as handed over by the bank parsers.
//!
//! Two shapes exist. The indexed database shares one operator table between
//! all instruments; the legacy database stores 11 byte patches and refers to
//! them by index. Both normalize to an [`InstrumentDefinition`] and both
//! carry the measured durations back in their instrument records.

use serde::{Deserialize, Serialize};

use crate::cache::{Durations, LegacyKey};
use crate::error::MeasureError;
use crate::instrument::{InstrumentDefinition, InstrumentFlags, OperatorRegs, Representation, Voice};

/// An instrument record that takes the measured durations back.
pub trait DurationSink {
    fn apply(&mut self, durations: &Durations);
}

/// An operator of the shared table: `E0<<24 | 80<<16 | 60<<8 | 20` plus 40.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorEntry {
    pub d_e862: u32,
    pub d_40: u8,
}

impl OperatorEntry {
    pub fn regs(&self) -> OperatorRegs {
        OperatorRegs::from_packed(self.d_e862, self.d_40)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentEntry {
    /// Indices into the operator table, negative when unused.
    pub ops: [i64; 4],
    /// C0 of the first voice in the low byte, of the second in the high byte.
    pub fb_conn: u16,
    pub note_offset1: i16,
    pub note_offset2: i16,
    pub percussion_key: u8,
    pub inst_flags: u8,
    pub second_voice_detune: i8,
    pub delay_on_ms: i64,
    pub delay_off_ms: i64,
    pub metas: Vec<String>,
}

impl InstrumentEntry {
    pub fn flags(&self) -> InstrumentFlags {
        InstrumentFlags::from_bits_truncate(self.inst_flags)
    }

    fn operator(
        &self,
        id: usize,
        operators: &[OperatorEntry],
        slot: usize,
    ) -> Result<OperatorRegs, MeasureError> {
        let index = self.ops[slot];
        usize::try_from(index)
            .ok()
            .and_then(|ix| operators.get(ix))
            .map(OperatorEntry::regs)
            .ok_or(MeasureError::UnknownOperator {
                instrument: id,
                index,
            })
    }

    pub fn definition(
        &self,
        id: usize,
        operators: &[OperatorEntry],
    ) -> Result<InstrumentDefinition, MeasureError> {
        let flags = self.flags();
        let pseudo = flags.contains(InstrumentFlags::PSEUDO_4OP);
        let voice_count = if pseudo || flags.contains(InstrumentFlags::FOUR_OP) {
            2
        } else {
            1
        };
        let offsets = [self.note_offset1, self.note_offset2];

        let mut voices = [Voice::default(); 2];
        for (n, voice) in voices.iter_mut().take(voice_count).enumerate() {
            *voice = Voice {
                modulator: self.operator(id, operators, n * 2)?,
                carrier: self.operator(id, operators, n * 2 + 1)?,
                fb_conn: (self.fb_conn >> (n * 8)) as u8,
                note_offset: offsets[n],
            };
        }

        Ok(InstrumentDefinition {
            voices,
            voice_count,
            second_voice_detune: if pseudo {
                self.second_voice_detune as f64
            } else {
                0.0
            },
            percussion_key: self.percussion_key,
            flags,
            representation: Representation::Indexed,
        })
    }

}

impl DurationSink for InstrumentEntry {
    fn apply(&mut self, durations: &Durations) {
        self.delay_on_ms = durations.ms_sound_kon;
        self.delay_off_ms = durations.ms_sound_koff;
        if durations.nosound {
            self.inst_flags |= InstrumentFlags::IS_BLANK.bits();
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankDatabase {
    pub operators: Vec<OperatorEntry>,
    pub instruments: Vec<InstrumentEntry>,
}

/// 11 register bytes in `20m 20c 60m 60c 80m 80c E0m E0c 40m 40c C0` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LegacyPatch {
    pub data: [u8; 11],
    pub finetune: i8,
    pub diff: bool,
}

impl LegacyPatch {
    pub fn voice(&self) -> Voice {
        Voice::from_patch(&self.data, self.finetune as i16)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyInstrument {
    pub insno1: usize,
    pub insno2: usize,
    pub note_num: u8,
    pub real_4op: bool,
    pub pseudo_4op: bool,
    pub voice2_fine_tune: f64,
    pub rhythm_drum: u8,
    pub ms_sound_kon: i64,
    pub ms_sound_koff: i64,
    pub nosound: bool,
}

impl LegacyInstrument {
    fn patches<'a>(
        &self,
        id: usize,
        patches: &'a [LegacyPatch],
    ) -> Result<(&'a LegacyPatch, &'a LegacyPatch), MeasureError> {
        let lookup = |index: usize| {
            patches.get(index).ok_or(MeasureError::UnknownPatch {
                instrument: id,
                index,
            })
        };
        Ok((lookup(self.insno1)?, lookup(self.insno2)?))
    }

    pub fn key(&self, id: usize, patches: &[LegacyPatch]) -> Result<LegacyKey, MeasureError> {
        let (first, second) = self.patches(id, patches)?;
        Ok(LegacyKey::new(self, *first, *second))
    }

    pub fn definition(
        &self,
        id: usize,
        patches: &[LegacyPatch],
    ) -> Result<InstrumentDefinition, MeasureError> {
        let (first, second) = self.patches(id, patches)?;
        let mut flags = InstrumentFlags::from_bits_truncate((self.rhythm_drum & 0x07) << 3);
        flags.set(InstrumentFlags::FOUR_OP, self.real_4op);
        flags.set(InstrumentFlags::PSEUDO_4OP, self.pseudo_4op);
        Ok(InstrumentDefinition {
            voices: [first.voice(), second.voice()],
            voice_count: if self.insno1 != self.insno2 { 2 } else { 1 },
            second_voice_detune: if self.pseudo_4op {
                self.voice2_fine_tune
            } else {
                0.0
            },
            percussion_key: self.note_num,
            flags,
            representation: Representation::Legacy,
        })
    }

}

impl DurationSink for LegacyInstrument {
    fn apply(&mut self, durations: &Durations) {
        self.ms_sound_kon = durations.ms_sound_kon;
        self.ms_sound_koff = durations.ms_sound_koff;
        self.nosound = durations.nosound;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyDatabase {
    pub patches: Vec<LegacyPatch>,
    pub instruments: Vec<LegacyInstrument>,
}

impl LegacyDatabase {
    /// First patch table index holding exactly `patch`.
    pub fn find_patch(&self, patch: &LegacyPatch) -> Option<usize> {
        self.patches.iter().position(|p| p == patch)
    }
}

#[cfg(test)]
#[path = "./bank_test.rs"]
mod bank_test;
