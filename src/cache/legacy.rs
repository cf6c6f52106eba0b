//! Legacy V1 layout keyed by patch content.
//!
//! ```text
//! magic   "ADLMIDI-DURATION-CACHE-FILE-V1.0"
//! record  u64 insno1, u64 insno2, patch1, patch2,
//!         u8 note, u8 real4op, u8 pseudo4op, i64 detune * 1e6,
//!         u8 found1, u8 found2, table patch1, table patch2,
//!         i64 kon ms, i64 koff ms, u8 nosound
//! patch   11 data bytes, i8 finetune, u8 diff
//! ```
//! Records repeat until the end of the file. The table patches are the
//! entries the patch indices pointed at when the file was written; they let
//! a record follow its patches when a bank is renumbered.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, info};

use super::{
    create_writer, open_reader, read_magic, read_or_eof, report_load, write_magic, CacheError,
    DurationCache, Durations, MAGIC_LEN,
};
use crate::bank::{LegacyDatabase, LegacyInstrument, LegacyPatch};

pub const MAGIC: &[u8; MAGIC_LEN] = b"ADLMIDI-DURATION-CACHE-FILE-V1.0";

const PATCH_LEN: usize = 13;

const RECORD_LEN: usize = 8 + 8 + PATCH_LEN * 2 + 3 + 8 + 2 + PATCH_LEN * 2 + 8 + 8 + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LegacyKey {
    pub insno1: u64,
    pub insno2: u64,
    pub patch1: LegacyPatch,
    pub patch2: LegacyPatch,
    pub note_num: u8,
    pub real_4op: bool,
    pub pseudo_4op: bool,
    /// Second voice detune in millionths.
    pub detune_micros: i64,
}

impl LegacyKey {
    pub fn new(ins: &LegacyInstrument, patch1: LegacyPatch, patch2: LegacyPatch) -> LegacyKey {
        LegacyKey {
            insno1: ins.insno1 as u64,
            insno2: ins.insno2 as u64,
            patch1,
            patch2,
            note_num: ins.note_num,
            real_4op: ins.real_4op,
            pseudo_4op: ins.pseudo_4op,
            detune_micros: (ins.voice2_fine_tune * 1_000_000.0) as i64,
        }
    }
}

struct Record {
    key: LegacyKey,
    found: [bool; 2],
    table: [LegacyPatch; 2],
    durations: Durations,
}

/// Byte cursor over one fixed size record.
struct Fields<'a> {
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[..N]);
        self.buf = &self.buf[N..];
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    fn patch(&mut self) -> LegacyPatch {
        LegacyPatch {
            data: self.take(),
            finetune: self.u8() as i8,
            diff: self.bool(),
        }
    }
}

fn decode(record: &[u8; RECORD_LEN]) -> Record {
    let mut f = Fields { buf: record };
    let key = LegacyKey {
        insno1: f.u64(),
        insno2: f.u64(),
        patch1: f.patch(),
        patch2: f.patch(),
        note_num: f.u8(),
        real_4op: f.bool(),
        pseudo_4op: f.bool(),
        detune_micros: f.i64(),
    };
    let found = [f.bool(), f.bool()];
    let table = [f.patch(), f.patch()];
    let durations = Durations {
        ms_sound_kon: f.i64(),
        ms_sound_koff: f.i64(),
        nosound: f.bool(),
    };
    Record {
        key,
        found,
        table,
        durations,
    }
}

/// Resolves one side of a record against the current patch table: the
/// stored index if it still holds the same patch, otherwise the first
/// index holding it.
fn rebind(db: &LegacyDatabase, index: u64, patch: &LegacyPatch) -> Option<u64> {
    let same = usize::try_from(index)
        .ok()
        .and_then(|ix| db.patches.get(ix))
        .is_some_and(|p| p == patch);
    if same {
        Some(index)
    } else {
        db.find_patch(patch).map(|ix| ix as u64)
    }
}

fn resolve(db: &LegacyDatabase, current: &HashSet<LegacyKey>, record: &Record) -> Option<LegacyKey> {
    if !record.found.iter().any(|&f| f) {
        return None;
    }
    let mut key = record.key;
    if record.found[0] {
        key.insno1 = rebind(db, key.insno1, &record.table[0])?;
    }
    if record.found[1] {
        key.insno2 = rebind(db, key.insno2, &record.table[1])?;
    }
    current.contains(&key).then_some(key)
}

/// Keys of every instrument currently in `db`.
fn current_keys(db: &LegacyDatabase) -> HashSet<LegacyKey> {
    db.instruments
        .iter()
        .enumerate()
        .filter_map(|(id, ins)| ins.key(id, &db.patches).ok())
        .collect()
}

/// Loads the cache at `path`, keeping only records that still describe an
/// instrument of `db`.
pub fn load(path: &Path, db: &LegacyDatabase) -> DurationCache<LegacyKey> {
    let cache = DurationCache::new();
    let result = open_reader(path).and_then(|mut r| read_from(&mut r, db, &cache));
    report_load("legacy duration cache", path, result, cache.len());
    cache
}

pub fn read_from<R: Read>(
    r: &mut R,
    db: &LegacyDatabase,
    cache: &DurationCache<LegacyKey>,
) -> Result<usize, CacheError> {
    read_magic(r, MAGIC)?;
    let current = current_keys(db);

    let mut record = [0u8; RECORD_LEN];
    let mut loaded = 0;
    let mut stale = 0;
    loop {
        match read_or_eof(r, &mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(CacheError::Truncated { loaded });
            }
            Err(e) => return Err(e.into()),
        }
        let record = decode(&record);
        match resolve(db, &current, &record) {
            Some(key) => {
                cache.insert(key, record.durations);
                loaded += 1;
            }
            None => stale += 1,
        }
    }
    if stale > 0 {
        debug!("{} cached records no longer match the bank", stale);
    }
    Ok(loaded)
}

pub fn save(cache: &DurationCache<LegacyKey>, path: &Path, db: &LegacyDatabase) -> Result<(), CacheError> {
    let mut w = create_writer(path)?;
    let written = write_to(&mut w, cache, db)?;
    w.flush()?;
    info!("legacy duration cache saved to {}: {} entries", path.display(), written);
    Ok(())
}

fn write_patch<W: Write>(w: &mut W, patch: &LegacyPatch) -> io::Result<()> {
    w.write_all(&patch.data)?;
    w.write_all(&[patch.finetune as u8, patch.diff as u8])
}

pub fn write_to<W: Write>(
    w: &mut W,
    cache: &DurationCache<LegacyKey>,
    db: &LegacyDatabase,
) -> Result<usize, CacheError> {
    let mut entries = cache.entries();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    write_magic(w, MAGIC)?;
    for (key, value) in &entries {
        w.write_all(&key.insno1.to_le_bytes())?;
        w.write_all(&key.insno2.to_le_bytes())?;
        write_patch(w, &key.patch1)?;
        write_patch(w, &key.patch2)?;
        w.write_all(&[key.note_num, key.real_4op as u8, key.pseudo_4op as u8])?;
        w.write_all(&key.detune_micros.to_le_bytes())?;

        let table = [key.insno1, key.insno2].map(|ix| {
            usize::try_from(ix)
                .ok()
                .and_then(|ix| db.patches.get(ix))
                .copied()
        });
        w.write_all(&table.map(|p| p.is_some() as u8))?;
        for patch in table {
            write_patch(w, &patch.unwrap_or_default())?;
        }

        w.write_all(&value.ms_sound_kon.to_le_bytes())?;
        w.write_all(&value.ms_sound_koff.to_le_bytes())?;
        w.write_all(&[value.nosound as u8])?;
    }
    Ok(entries.len())
}

#[cfg(test)]
#[path = "./legacy_test.rs"]
mod legacy_test;
